//! Sanity check - holistic validation of finalists against the brief

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Remove,
    KeepWithWarning,
}

/// A name flagged during the sanity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedName {
    pub name: String,
    pub violation: String,
    pub severity: Severity,
    pub recommendation: Recommendation,
}

/// Result of the sanity check stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityCheckResult {
    pub overall_pass: bool,
    #[serde(default)]
    pub flagged_names: Vec<FlaggedName>,
    #[serde(default)]
    pub approved_names: Vec<String>,
    pub notes: Option<String>,
}
