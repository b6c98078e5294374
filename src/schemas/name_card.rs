//! Name cards - the research dossier for a single candidate

use serde::{Deserialize, Serialize};

/// Nickname analysis for a name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nicknames {
    pub intended: Option<Vec<String>>,
    pub likely: Option<Vec<String>>,
    pub avoid: Option<Vec<String>>,
}

/// Popularity data for a name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Popularity {
    pub latest_rank: Option<i64>,
    pub peak_rank: Option<i64>,
    pub trend_notes: Option<String>,
}

/// Notable people who carry this name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotableBearers {
    pub positive: Option<Vec<String>>,
    pub fictional: Option<Vec<String>>,
    pub negative: Option<Vec<String>>,
}

/// How the name sits next to the family surname.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurnameFit {
    pub surname: Option<String>,
    pub notes: String,
}

/// How the name sits inside the sibling set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SibsetFit {
    pub siblings: Option<Vec<String>>,
    pub notes: String,
}

/// A first + middle name pairing with justification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Combo {
    pub first: String,
    pub middle: String,
    pub why: String,
}

/// Complete research card for a candidate name.
///
/// `name`, `ipa` and `syllables` are required; everything else depends on
/// what the researcher could establish for this particular name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameCard {
    pub name: String,
    pub ipa: String,
    pub syllables: i64,
    pub meaning: Option<String>,
    pub origins: Option<Vec<String>>,
    pub variants: Option<Vec<String>>,
    pub nicknames: Option<Nicknames>,
    pub popularity: Option<Popularity>,
    pub notable_bearers: Option<NotableBearers>,
    pub cultural_notes: Option<Vec<String>>,
    pub surname_fit: Option<SurnameFit>,
    pub sibset_fit: Option<SibsetFit>,
    pub honor_mapping: Option<Vec<String>>,
    pub combo_suggestions: Option<Vec<Combo>>,
    pub eliminations: Option<Vec<String>>,
    pub research_log: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_card_deserializes() {
        let json = r#"{"name": "Wren", "ipa": "/Wren/", "syllables": 1}"#;
        let card: NameCard = serde_json::from_str(json).unwrap();
        assert_eq!(card.name, "Wren");
        assert_eq!(card.syllables, 1);
        assert!(card.meaning.is_none());
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let json = r#"{"name": "Wren", "syllables": 1}"#;
        assert!(serde_json::from_str::<NameCard>(json).is_err());
    }

    #[test]
    fn test_full_card_round_trips() {
        let card = NameCard {
            name: "Juniper".to_string(),
            ipa: "/Juniper/".to_string(),
            syllables: 3,
            origins: Some(vec!["Latin".to_string()]),
            combo_suggestions: Some(vec![Combo {
                first: "Juniper".to_string(),
                middle: "Mae".to_string(),
                why: "balances length".to_string(),
            }]),
            ..Default::default()
        };
        let json = serde_json::to_string(&card).unwrap();
        let back: NameCard = serde_json::from_str(&json).unwrap();
        assert_eq!(card, back);
    }
}
