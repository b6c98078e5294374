//! Candidate names proposed by the generator stage

use serde::{Deserialize, Serialize};

/// A proposed name prior to research.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub lane: String,
    pub rationale: String,
    #[serde(default)]
    pub theme_links: Vec<String>,
}

impl Candidate {
    pub fn new(name: &str, lane: &str, rationale: String) -> Self {
        Candidate {
            name: name.to_string(),
            lane: lane.to_string(),
            rationale,
            theme_links: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theme_links_default_to_empty() {
        let json = r#"{"name": "Iris", "lane": "nature", "rationale": "short and bright"}"#;
        let candidate: Candidate = serde_json::from_str(json).unwrap();
        assert!(candidate.theme_links.is_empty());
    }
}
