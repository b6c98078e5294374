//! Expert selection - curated finalists and near-misses

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schemas::name_card::Combo;

/// A finalist name with reasoning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Finalist {
    pub name: String,
    pub why: String,
    #[serde(default, deserialize_with = "combo_from_loose")]
    pub combo: Option<Combo>,
}

/// A near-miss that didn't make the cut.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NearMiss {
    pub name: String,
    pub reason: String,
}

/// Expert-curated selection of finalists and near-misses.
///
/// Invariant: the two lists are disjoint by case-insensitive name. When the
/// model outputs a name in both, the finalist entry wins and the near-miss is
/// dropped. Enforced on every deserialization so the invariant holds at
/// every boundary, not just after the selector stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpertSelection {
    pub finalists: Vec<Finalist>,
    pub near_misses: Vec<NearMiss>,
}

impl ExpertSelection {
    /// Drop near-misses shadowed by a same-named finalist.
    pub fn drop_shadowed_near_misses(&mut self) {
        let finalist_names: Vec<String> = self
            .finalists
            .iter()
            .map(|f| f.name.to_lowercase())
            .collect();
        self.near_misses
            .retain(|nm| !finalist_names.contains(&nm.name.to_lowercase()));
    }
}

impl<'de> Deserialize<'de> for ExpertSelection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            finalists: Vec<Finalist>,
            near_misses: Vec<NearMiss>,
        }

        let wire = Wire::deserialize(deserializer)?;
        let mut selection = ExpertSelection {
            finalists: wire.finalists,
            near_misses: wire.near_misses,
        };
        selection.drop_shadowed_near_misses();
        Ok(selection)
    }
}

/// Models sometimes return a finalist combo as the string
/// `"First Middle - why"` instead of an object. Accept both.
fn combo_from_loose<'de, D>(deserializer: D) -> Result<Option<Combo>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(parse_combo_string(&s))),
        Some(obj @ Value::Object(_)) => {
            serde_json::from_value(obj).map(Some).map_err(de::Error::custom)
        }
        Some(_) => Ok(None),
    }
}

fn parse_combo_string(s: &str) -> Combo {
    if let Some((names, why)) = s.split_once(" - ") {
        if let Some((first, middle)) = names.split_once(' ') {
            return Combo {
                first: first.to_string(),
                middle: middle.to_string(),
                why: why.to_string(),
            };
        }
    }
    Combo {
        first: s.to_string(),
        middle: String::new(),
        why: String::new(),
    }
}
