//! Deterministic stage outputs for offline mode
//!
//! Every stage has a schema-valid synthetic fallback built from its inputs
//! and the phonetic heuristics alone. Stubs run when the backend credential
//! is absent, and when a live stage fails with stubs allowed.

use std::sync::OnceLock;

use regex::Regex;

use crate::schemas::candidate::Candidate;
use crate::schemas::name_card::{
    Combo, NameCard, Nicknames, NotableBearers, Popularity, SibsetFit, SurnameFit,
};
use crate::schemas::profile::{
    FamilyContext, LengthPref, NicknameTolerance, Preferences, SessionProfile,
};
use crate::schemas::result::Report;
use crate::schemas::selection::{ExpertSelection, Finalist, NearMiss};
use crate::tools::phonetics::{count_syllables, rough_ipa};

const DEFAULT_REGION: &str = "US";

/// Sample name lanes for stub generation.
pub const SAMPLE_LANES_GIRL: &[(&str, &[&str])] = &[
    ("traditional feminine", &["Eleanor", "Margot", "Vivienne", "Helena", "Clara"]),
    ("literary", &["Isolde", "Beatrice", "Ophelia", "Rowena", "Celeste"]),
    ("nature", &["Iris", "Willow", "Juniper", "Wren", "Marigold"]),
    ("modern-classic", &["Avery", "Emery", "Sloane", "Quinn", "Maren"]),
    ("heritage", &["Liora", "Mireille", "Annelise", "Sabine", "Selene"]),
];

pub const SAMPLE_LANES_BOY: &[(&str, &[&str])] = &[
    ("classic masculine", &["James", "William", "Thomas", "Henry", "Arthur"]),
    ("literary", &["Atticus", "Holden", "Sawyer", "Finn", "Sebastian"]),
    ("nature", &["River", "Rowan", "Jasper", "August", "Silas"]),
    ("modern-classic", &["Hudson", "Asher", "Milo", "Ezra", "Julian"]),
    ("heritage", &["Killian", "Otto", "Maddox", "Merrick", "Malcolm"]),
];

fn probe(pattern: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("hardcoded regex"))
}

fn surname_probe() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    probe(r"(?i)surname\s*:?\s*([A-Za-z'-]+)", &CELL)
}

fn siblings_probe() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    probe(r"(?i)siblings?\s*:?\s*([A-Za-z ,]+)", &CELL)
}

fn honor_probe() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    probe(r"(?i)honou?r\s*names?\s*:?\s*([A-Za-z ,]+)", &CELL)
}

fn initials_probe() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    probe(r"(?i)initials?\s*:?\s*([A-Za-z ,]+)", &CELL)
}

fn boy_probe() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    probe(r"(?i)\b(boy|son|brother|male)\b", &CELL)
}

fn girl_probe() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    probe(r"(?i)\b(girl|daughter|sister|female)\b", &CELL)
}

fn capture_list(pattern: &Regex, brief: &str) -> Option<Vec<String>> {
    pattern.captures(brief).map(|captures| {
        captures[1]
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// Derive a profile from the brief with regex heuristics alone.
pub fn stub_profile(brief: &str) -> SessionProfile {
    let surname = surname_probe()
        .captures(brief)
        .map(|captures| captures[1].trim().to_string());
    let siblings = capture_list(siblings_probe(), brief);
    let honor_names = capture_list(honor_probe(), brief);
    let initials = capture_list(initials_probe(), brief);

    // Gender heuristic; when both read, girl wins
    let mentions_girl = girl_probe().is_match(brief);
    let use_boy = boy_probe().is_match(brief) && !mentions_girl;

    let lanes = if use_boy { SAMPLE_LANES_BOY } else { SAMPLE_LANES_GIRL };
    let style_lanes: Vec<String> = lanes.iter().map(|(lane, _)| lane.to_string()).collect();

    SessionProfile {
        raw_brief: brief.to_string(),
        family: Some(FamilyContext {
            surname,
            siblings,
            honor_names,
            special_initials_include: initials,
            ..Default::default()
        }),
        preferences: Some(Preferences {
            style_lanes: Some(style_lanes),
            length_pref: Some(LengthPref::ShortToMedium),
            nickname_tolerance: Some(NicknameTolerance::Medium),
            ..Default::default()
        }),
        region: Some(vec![DEFAULT_REGION.to_string()]),
        comments: Some(format!(
            "Stubbed profile derived heuristically. Detected gender: {}.",
            if use_boy { "boy" } else { "girl" }
        )),
        ..Default::default()
    }
}

/// The canonical lane-set as generator candidates.
pub fn stub_candidates(profile: &SessionProfile) -> Vec<Candidate> {
    let is_girl = profile
        .preferences
        .as_ref()
        .and_then(|p| p.style_lanes.as_ref())
        .map(|lanes| lanes.iter().any(|l| l == "traditional feminine"))
        .unwrap_or(false);

    let source = if is_girl { SAMPLE_LANES_GIRL } else { SAMPLE_LANES_BOY };

    source
        .iter()
        .flat_map(|(lane, names)| {
            names.iter().map(move |name| {
                Candidate::new(
                    name,
                    lane,
                    format!("{} carries a {} energy that suits the brief.", name, lane),
                )
            })
        })
        .collect()
}

fn honor_combos(name: &str, honor_names: &[String]) -> Vec<Combo> {
    if honor_names.is_empty() {
        return vec![
            Combo {
                first: name.to_string(),
                middle: "Elise".to_string(),
                why: "Balances cadence with a nod to classic elegance.".to_string(),
            },
            Combo {
                first: name.to_string(),
                middle: "Ren".to_string(),
                why: "Honors Irene-like sounds while keeping things light.".to_string(),
            },
        ];
    }

    honor_names
        .iter()
        .take(3)
        .map(|source| Combo {
            first: name.to_string(),
            middle: source.clone(),
            why: format!("Directly honors {} while keeping rhythm gentle.", source),
        })
        .collect()
}

/// Synthetic research card for a candidate.
pub fn stub_card(name: &str, lane: &str, profile: &SessionProfile) -> NameCard {
    let syllables = count_syllables(name);
    let ipa = rough_ipa(name);

    let family = profile.family.as_ref();
    let honor_names: Vec<String> = family
        .and_then(|f| f.honor_names.clone())
        .unwrap_or_default();
    let surname = family
        .and_then(|f| f.surname.clone())
        .unwrap_or_else(|| "family surname".to_string());
    let siblings = family.and_then(|f| f.siblings.clone());

    let sibset_notes = match &siblings {
        Some(sibs) if !sibs.is_empty() => format!(
            "{} complements {} without repeating initials.",
            name,
            sibs.join(", ")
        ),
        _ => "No siblings listed; assuming flexible fit.".to_string(),
    };

    let prefix3: String = name.chars().take(3).collect();
    let prefix4: String = name.chars().take(4).collect();

    NameCard {
        name: name.to_string(),
        ipa,
        syllables,
        meaning: Some(format!("{} inspired meaning placeholder for {}.", lane, name)),
        origins: Some(vec!["Stub".to_string()]),
        variants: Some(vec![format!("{}a", name), format!("{}e", name)]),
        nicknames: Some(Nicknames {
            intended: Some(vec![prefix3]),
            likely: Some(vec![prefix4]),
            avoid: Some(Vec::new()),
        }),
        popularity: Some(Popularity {
            latest_rank: None,
            peak_rank: None,
            trend_notes: Some("classic and steady (assumed)".to_string()),
        }),
        notable_bearers: Some(NotableBearers {
            positive: Some(vec![
                format!("{} Example, pioneering artist", name),
                format!("{} Fictional, beloved literary heroine", name),
            ]),
            fictional: Some(vec![format!("{} from a sample novel", name)]),
            negative: None,
        }),
        cultural_notes: Some(vec![
            "Cultural context requires verification; replace with live research output.".to_string(),
        ]),
        surname_fit: Some(SurnameFit {
            surname: Some(surname),
            notes: format!(
                "{} shares a {}-syllable cadence with the surname, offering smooth flow.",
                name, syllables
            ),
        }),
        sibset_fit: Some(SibsetFit {
            siblings,
            notes: sibset_notes,
        }),
        honor_mapping: Some(
            honor_names
                .iter()
                .map(|h| format!("{} → {}", h, name))
                .collect(),
        ),
        combo_suggestions: Some(honor_combos(name, &honor_names)),
        eliminations: Some(Vec::new()),
        research_log: Some(vec![
            "Stubbed: generated via static data.".to_string(),
            "Replace with live research once agents are enabled.".to_string(),
        ]),
    }
}

/// First eight cards become finalists, the next four near-misses.
pub fn stub_selection(cards: &[NameCard]) -> ExpertSelection {
    let finalists = cards
        .iter()
        .take(8)
        .map(|card| Finalist {
            name: card.name.clone(),
            why: format!(
                "{} balances the brief with its {} tone and easy cadence with the surname.",
                card.name,
                card.meaning.as_deref().unwrap_or("thoughtful")
            ),
            combo: card
                .combo_suggestions
                .as_ref()
                .and_then(|combos| combos.first().cloned()),
        })
        .collect();

    let near_misses = cards
        .iter()
        .skip(8)
        .take(4)
        .map(|card| NearMiss {
            name: card.name.clone(),
            reason: format!(
                "{} is compelling but overlaps with another finalist in style or initial.",
                card.name
            ),
        })
        .collect();

    ExpertSelection {
        finalists,
        near_misses,
    }
}

/// Synthetic final report.
pub fn stub_report(_profile: &SessionProfile, selection: &ExpertSelection) -> Report {
    let combos: Vec<Combo> = selection
        .finalists
        .iter()
        .filter_map(|f| f.combo.clone())
        .collect();

    Report {
        summary: "Stub report summarising the naming studio run. Swap in live composer output \
                  once agents are enabled."
            .to_string(),
        markdown: None,
        loved_names: Some(Vec::new()),
        finalists: selection.finalists.clone(),
        combos: Some(combos),
        tradeoffs: Some(vec![
            "Nicknames are inferred; validate with the family for preference.".to_string(),
            "Popularity trends are qualitative placeholders until live data lands.".to_string(),
        ]),
        tie_break_tips: Some(vec![
            "Say each finalist aloud with the sibling set and surname.".to_string(),
            "Consider monogram balance with honour initials.".to_string(),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_profile_extracts_family_fields() {
        let brief = "Surname: Thompson\nSiblings: Oliver, Charlotte\nWe want a girl";
        let profile = stub_profile(brief);

        let family = profile.family.as_ref().unwrap();
        assert_eq!(family.surname.as_deref(), Some("Thompson"));
        assert_eq!(
            family.siblings.as_deref(),
            Some(["Oliver".to_string(), "Charlotte".to_string()].as_slice())
        );
        assert_eq!(profile.raw_brief, brief);
        assert!(profile
            .comments
            .as_deref()
            .unwrap()
            .contains("Detected gender: girl"));
    }

    #[test]
    fn test_stub_profile_girl_wins_when_both_genders_appear() {
        let profile = stub_profile("A girl this time; her brother is thrilled");
        let lanes = profile
            .preferences
            .unwrap()
            .style_lanes
            .unwrap();
        assert!(lanes.contains(&"traditional feminine".to_string()));
    }

    #[test]
    fn test_stub_profile_boy_brief_uses_boy_lanes() {
        let profile = stub_profile("We are expecting a boy, surname: Reyes");
        let lanes = profile.preferences.unwrap().style_lanes.unwrap();
        assert!(lanes.contains(&"classic masculine".to_string()));
    }

    #[test]
    fn test_stub_profile_honor_names_and_initials() {
        let brief = "Honour names: Ruth, Esther. Initials: R, E";
        let profile = stub_profile(brief);
        let family = profile.family.unwrap();
        assert_eq!(
            family.honor_names.as_deref(),
            Some(["Ruth".to_string(), "Esther".to_string()].as_slice())
        );
        assert!(family.special_initials_include.is_some());
    }

    #[test]
    fn test_stub_candidates_follow_profile_lanes() {
        let girl_profile = stub_profile("We want a girl");
        let candidates = stub_candidates(&girl_profile);
        assert_eq!(candidates.len(), 25);
        assert!(candidates.iter().any(|c| c.name == "Clara"));
        assert!(candidates.iter().all(|c| !c.name.is_empty() && !c.lane.is_empty()));

        let boy_profile = stub_profile("We want a boy");
        let candidates = stub_candidates(&boy_profile);
        assert!(candidates.iter().any(|c| c.name == "Arthur"));
    }

    #[test]
    fn test_stub_card_is_schema_complete() {
        let profile = stub_profile("Surname: Thompson\nSiblings: Oliver\nWe want a girl");
        let card = stub_card("Juniper", "nature", &profile);

        assert_eq!(card.name, "Juniper");
        assert_eq!(card.syllables, 3);
        assert!(card.ipa.starts_with('/'));
        assert!(card
            .surname_fit
            .as_ref()
            .unwrap()
            .surname
            .as_deref()
            .unwrap()
            .contains("Thompson"));
        assert!(card
            .sibset_fit
            .as_ref()
            .unwrap()
            .notes
            .contains("Oliver"));
        assert!(!card.combo_suggestions.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_stub_card_honor_combos_map_each_honor_name() {
        let profile = stub_profile("Honor names: Ruth, Esther\nWe want a girl");
        let card = stub_card("Iris", "nature", &profile);
        let combos = card.combo_suggestions.unwrap();
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0].middle, "Ruth");
        assert_eq!(combos[1].middle, "Esther");
        assert_eq!(card.honor_mapping.unwrap().len(), 2);
    }

    #[test]
    fn test_stub_selection_splits_finalists_and_near_misses() {
        let profile = stub_profile("We want a girl");
        let cards: Vec<NameCard> = stub_candidates(&profile)
            .iter()
            .map(|c| stub_card(&c.name, &c.lane, &profile))
            .collect();

        let selection = stub_selection(&cards);
        assert_eq!(selection.finalists.len(), 8);
        assert_eq!(selection.near_misses.len(), 4);

        // Split is positional, so the two lists cannot overlap
        let finalist_names: Vec<String> =
            selection.finalists.iter().map(|f| f.name.to_lowercase()).collect();
        assert!(selection
            .near_misses
            .iter()
            .all(|nm| !finalist_names.contains(&nm.name.to_lowercase())));
    }

    #[test]
    fn test_stub_selection_with_few_cards() {
        let profile = stub_profile("girl");
        let cards = vec![stub_card("Iris", "nature", &profile)];
        let selection = stub_selection(&cards);
        assert_eq!(selection.finalists.len(), 1);
        assert!(selection.near_misses.is_empty());
    }

    #[test]
    fn test_stub_report_collects_finalist_combos() {
        let profile = stub_profile("We want a girl");
        let cards: Vec<NameCard> = stub_candidates(&profile)
            .iter()
            .take(10)
            .map(|c| stub_card(&c.name, &c.lane, &profile))
            .collect();
        let selection = stub_selection(&cards);
        let report = stub_report(&profile, &selection);

        assert!(!report.summary.is_empty());
        assert_eq!(report.finalists.len(), 8);
        assert_eq!(report.combos.as_ref().unwrap().len(), 8);
        assert!(report.tradeoffs.is_some());
    }
}
