//! Session profile - the parsed client brief

use serde::{Deserialize, Serialize};

/// Pre-selected middle names, if the family already has them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiddleNames {
    pub boy: Option<String>,
    pub girl: Option<String>,
}

/// Family context: surname, siblings, and names to honor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FamilyContext {
    pub surname: Option<String>,
    pub siblings: Option<Vec<String>>,
    pub honor_names: Option<Vec<String>>,
    pub special_initials_include: Option<Vec<String>>,
    pub special_initials_avoid: Option<Vec<String>>,
    pub middle_names: Option<MiddleNames>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NicknameTolerance {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LengthPref {
    Short,
    ShortToMedium,
    Any,
}

/// Naming preferences extracted from the brief.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub style_lanes: Option<Vec<String>>,
    pub avoid_endings: Option<Vec<String>>,
    pub nickname_tolerance: Option<NicknameTolerance>,
    pub length_pref: Option<LengthPref>,
    pub cultural_bounds: Option<Vec<String>>,
    /// e.g. "no R start", "no L end"
    pub phonetic_constraints: Option<Vec<String>>,
    pub frozen_callback: Option<bool>,
}

/// Names the family has ruled out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vetoes {
    pub hard: Option<Vec<String>>,
    pub soft: Option<Vec<String>>,
}

/// Complete parsed session profile from the client brief.
///
/// `raw_brief` is required; everything else is optional because the model
/// only fills in what the brief actually states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionProfile {
    pub raw_brief: String,
    pub family: Option<FamilyContext>,
    pub preferences: Option<Preferences>,
    pub themes: Option<Vec<String>>,
    pub vetoes: Option<Vetoes>,
    pub region: Option<Vec<String>>,
    pub target_popularity_band: Option<String>,
    pub comments: Option<String>,
}

impl SessionProfile {
    /// Sibling names from the family context, empty if none were given.
    pub fn siblings(&self) -> &[String] {
        self.family
            .as_ref()
            .and_then(|f| f.siblings.as_deref())
            .unwrap_or(&[])
    }

    /// Hard-veto entries, empty if none were given.
    pub fn hard_vetoes(&self) -> &[String] {
        self.vetoes
            .as_ref()
            .and_then(|v| v.hard.as_deref())
            .unwrap_or(&[])
    }
}
