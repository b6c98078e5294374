//! Deterministic name filters
//!
//! These enforce hard constraints the model may ignore in prompts.
//! Principle: validate at code boundaries, not via prompts.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::schemas::candidate::Candidate;
use crate::schemas::profile::SessionProfile;
use crate::schemas::selection::{Finalist, NearMiss};

/// Anything the filters can run over. Lets the same rules screen generator
/// candidates, finalists and near-misses.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for Candidate {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Finalist {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for NearMiss {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Normalize a name for comparison (lowercase, stripped).
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Levenshtein (edit) distance, standard two-row dynamic programming.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    if b.is_empty() {
        return a.len();
    }
    if a.is_empty() {
        return b.len();
    }

    let mut previous_row: Vec<usize> = (0..=b.len()).collect();

    for (i, c1) in a.iter().enumerate() {
        let mut current_row = vec![i + 1];
        for (j, c2) in b.iter().enumerate() {
            let cost = usize::from(c1 != c2);
            let insert = current_row[j] + 1;
            let delete = previous_row[j + 1] + 1;
            let replace = previous_row[j] + cost;
            current_row.push(insert.min(delete).min(replace));
        }
        previous_row = current_row;
    }

    previous_row[b.len()]
}

/// Two names are too similar when one contains the other (the Olive/Oliver
/// problem) or their edit distance is within the threshold.
pub fn names_too_similar(name1: &str, name2: &str, threshold: usize) -> bool {
    let n1 = normalize_name(name1);
    let n2 = normalize_name(name2);

    if n1.contains(&n2) || n2.contains(&n1) {
        return true;
    }

    levenshtein_distance(&n1, &n2) <= threshold
}

/// Deity/religious names filtered when the brief vetoes religious names.
const DEITY_NAMES: &[&str] = &[
    // Hindu
    "krishna", "lakshmi", "shiva", "sivan", "vishnu", "brahma", "ganesh", "ganesha", "durga",
    "kali", "saraswati", "parvati", "hanuman", "rama", "radha",
    // Christian
    "jesus", "christ", "mary", "madonna",
    // Greek
    "zeus", "athena", "apollo", "artemis", "aphrodite", "hera", "poseidon", "hades", "hermes",
    "ares", "dionysus", "demeter", "persephone",
    // Norse
    "odin", "thor", "freya", "loki", "frigg",
    // Egyptian
    "isis", "osiris", "ra", "anubis",
];

const RELIGIOUS_VETO_PHRASES: &[&str] = &[
    "avoid religious",
    "no religious",
    "avoid deity",
    "no deity",
    "avoid god",
    "no god names",
    "not religious",
    "avoid strong religious",
];

fn prefix_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r#"avoid\s+["']?(\w+)-"#).expect("hardcoded regex"),
            Regex::new(r#"avoid.*starting\s+with\s+["']?(\w+)"#).expect("hardcoded regex"),
            Regex::new(r"no\s+(\w+)-\s*names").expect("hardcoded regex"),
            Regex::new(r#"anything\s+starting\s+with\s+["']?(\w+)"#).expect("hardcoded regex"),
        ]
    })
}

/// A rule a name can violate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    HardVeto,
    ForbiddenPrefix,
    SiblingCollision,
    DeityName,
}

/// Name-screening rules derived once from a profile.
#[derive(Debug)]
pub struct NameRules {
    hard_vetoes: HashSet<String>,
    forbidden_prefixes: HashSet<String>,
    siblings: Vec<String>,
    avoid_religious: bool,
    sibling_threshold: usize,
}

impl NameRules {
    pub fn from_profile(profile: &SessionProfile) -> Self {
        let hard_vetoes: HashSet<String> =
            profile.hard_vetoes().iter().map(|v| normalize_name(v)).collect();

        // Prefix vetoes come from two places: hard-veto entries shaped like
        // "Ma-" / "avoid Ma-", and phrasing in the raw brief itself.
        let mut forbidden_prefixes: HashSet<String> = HashSet::new();
        for veto in profile.hard_vetoes() {
            let v = veto.trim().to_lowercase();
            if v.ends_with('-') {
                if let Some(prefix) = v.trim_end_matches('-').split_whitespace().last() {
                    forbidden_prefixes.insert(prefix.to_string());
                }
            }
        }
        let brief_lower = profile.raw_brief.to_lowercase();
        for pattern in prefix_patterns() {
            for captures in pattern.captures_iter(&brief_lower) {
                if let Some(prefix) = captures.get(1) {
                    forbidden_prefixes.insert(prefix.as_str().to_lowercase());
                }
            }
        }

        let avoid_religious = profile
            .hard_vetoes()
            .iter()
            .any(|v| {
                let v = v.to_lowercase();
                v.contains("religious") || v.contains("deity") || v.contains("god")
            })
            || RELIGIOUS_VETO_PHRASES
                .iter()
                .any(|phrase| brief_lower.contains(phrase));

        NameRules {
            hard_vetoes,
            forbidden_prefixes,
            siblings: profile.siblings().to_vec(),
            avoid_religious,
            sibling_threshold: 2,
        }
    }

    /// First violated rule for a name, or None if the name passes.
    pub fn check(&self, name: &str) -> Option<Violation> {
        let normalized = normalize_name(name);

        if self.hard_vetoes.contains(&normalized) {
            return Some(Violation::HardVeto);
        }

        if self
            .forbidden_prefixes
            .iter()
            .any(|prefix| normalized.starts_with(prefix.as_str()))
        {
            return Some(Violation::ForbiddenPrefix);
        }

        if self
            .siblings
            .iter()
            .any(|sibling| names_too_similar(name, sibling, self.sibling_threshold))
        {
            return Some(Violation::SiblingCollision);
        }

        if self.avoid_religious && DEITY_NAMES.contains(&normalized.as_str()) {
            return Some(Violation::DeityName);
        }

        None
    }
}

/// Filter items through every rule, logging one line per rejection.
pub fn filter_candidates<T: Named>(
    items: Vec<T>,
    profile: &SessionProfile,
    log_callback: Option<&dyn Fn(String)>,
) -> Vec<T> {
    let rules = NameRules::from_profile(profile);

    items
        .into_iter()
        .filter(|item| {
            let name = item.name();
            match rules.check(name) {
                None => true,
                Some(violation) => {
                    if let Some(log) = log_callback {
                        let reason = match violation {
                            Violation::HardVeto => "matches hard veto",
                            Violation::ForbiddenPrefix => "starts with forbidden prefix",
                            Violation::SiblingCollision => "too similar to sibling",
                            Violation::DeityName => {
                                "deity/religious name when religious names vetoed"
                            }
                        };
                        log(format!("Filtered '{}': {}", name, reason));
                    }
                    false
                }
            }
        })
        .collect()
}
