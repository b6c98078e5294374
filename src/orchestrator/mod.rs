//! Pipeline orchestration
//!
//! The service drives five model stages in order, fans out per-candidate
//! research with bounded concurrency, and streams typed events to
//! subscribers. Stage failures route to deterministic stubs when stubs are
//! allowed; otherwise they fail the run.

pub mod concurrency;
pub mod llm;
pub mod prompts;
pub mod service;
pub mod stubs;

use crate::orchestrator::llm::LlmError;
use crate::orchestrator::prompts::PromptError;

/// Error type for pipeline execution.
#[derive(Debug)]
pub enum PipelineError {
    Llm(LlmError),
    Prompt(PromptError),
    /// Stubs are disabled but the backend credential is missing.
    StubsDisabled,
    /// Registry lookup failed for a subscription.
    RunNotFound(String),
}

impl PipelineError {
    /// Short machine-readable kind, used when logging fallbacks.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Llm(LlmError::CredentialsMissing) => "CredentialsMissing",
            PipelineError::Llm(LlmError::BackendUnavailable(_)) => "BackendUnavailable",
            PipelineError::Llm(LlmError::JsonExtraction(_)) => "JsonExtractionFailed",
            PipelineError::Llm(LlmError::SchemaInvalid(_)) => "SchemaInvalid",
            PipelineError::Prompt(PromptError::NotFound(_)) => "PromptNotFound",
            PipelineError::Prompt(PromptError::Io(_)) => "PromptIo",
            PipelineError::StubsDisabled => "StubsDisabled",
            PipelineError::RunNotFound(_) => "RunNotFound",
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Llm(e) => write!(f, "{}", e),
            PipelineError::Prompt(e) => write!(f, "{}", e),
            PipelineError::StubsDisabled => write!(
                f,
                "Stubs disabled (--no-stubs) but OPENROUTER_API_KEY is missing."
            ),
            PipelineError::RunNotFound(id) => write!(f, "Run {} not found", id),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        PipelineError::Llm(e)
    }
}

impl From<PromptError> for PipelineError {
    fn from(e: PromptError) -> Self {
        PipelineError::Prompt(e)
    }
}
