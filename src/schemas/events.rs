//! Pipeline progress events
//!
//! `Event` is a tagged union discriminated by `t`, serialized as
//! `{"t": "activity", "runId": …, …}` to stay wire-compatible with the
//! json-stream CLI output. `run_id` keeps its `runId` wire name on every
//! variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum Event {
    /// Generic activity/progress message from an agent.
    Activity {
        #[serde(rename = "runId")]
        run_id: String,
        agent: String,
        msg: String,
    },
    /// Work starting, optionally for a specific name.
    Start {
        #[serde(rename = "runId")]
        run_id: String,
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Log message from an agent.
    Log {
        #[serde(rename = "runId")]
        run_id: String,
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        msg: String,
    },
    /// Partial result from an agent (a single field landed).
    Partial {
        #[serde(rename = "runId")]
        run_id: String,
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        field: String,
        value: Value,
    },
    /// Work completed, optionally for a specific name.
    Done {
        #[serde(rename = "runId")]
        run_id: String,
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Stage completion with payload.
    Result {
        #[serde(rename = "runId")]
        run_id: String,
        agent: String,
        payload: Value,
    },
    /// Error during pipeline execution.
    Error {
        #[serde(rename = "runId")]
        run_id: String,
        agent: String,
        msg: String,
    },
}

impl Event {
    pub fn tag(&self) -> &'static str {
        match self {
            Event::Activity { .. } => "activity",
            Event::Start { .. } => "start",
            Event::Log { .. } => "log",
            Event::Partial { .. } => "partial",
            Event::Done { .. } => "done",
            Event::Result { .. } => "result",
            Event::Error { .. } => "error",
        }
    }

    /// Critical events survive retention rotation; log/partial events do not.
    pub fn is_critical(&self) -> bool {
        !matches!(self, Event::Log { .. } | Event::Partial { .. })
    }

    pub fn agent(&self) -> &str {
        match self {
            Event::Activity { agent, .. }
            | Event::Start { agent, .. }
            | Event::Log { agent, .. }
            | Event::Partial { agent, .. }
            | Event::Done { agent, .. }
            | Event::Result { agent, .. }
            | Event::Error { agent, .. } => agent,
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Event::Activity { run_id, .. }
            | Event::Start { run_id, .. }
            | Event::Log { run_id, .. }
            | Event::Partial { run_id, .. }
            | Event::Done { run_id, .. }
            | Event::Result { run_id, .. }
            | Event::Error { run_id, .. } => run_id,
        }
    }
}
