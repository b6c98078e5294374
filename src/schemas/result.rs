//! Final pipeline output

use serde::{Deserialize, Serialize};

use crate::schemas::name_card::{Combo, NameCard};
use crate::schemas::profile::SessionProfile;
use crate::schemas::selection::{ExpertSelection, Finalist};

/// Final consultation report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub summary: String,
    pub markdown: Option<String>,
    pub loved_names: Option<Vec<String>>,
    pub finalists: Vec<Finalist>,
    pub combos: Option<Vec<Combo>>,
    pub tradeoffs: Option<Vec<String>>,
    pub tie_break_tips: Option<Vec<String>>,
}

/// Complete run result with all pipeline outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub profile: SessionProfile,
    pub candidates: Vec<NameCard>,
    pub selection: ExpertSelection,
    pub report: Report,
}
