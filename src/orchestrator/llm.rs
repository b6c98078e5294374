//! Model client for the OpenRouter chat-completion API
//!
//! One blocking request/reply per call, with retry/backoff for rate limits
//! and transport failures. JSON recovery from loosely formatted replies
//! lives here too, since every JSON stage needs it.

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::orchestrator::prompts::PromptStore;
use crate::orchestrator::PipelineError;

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-20b";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Error type for model calls.
#[derive(Debug)]
pub enum LlmError {
    /// No backend credential configured.
    CredentialsMissing,
    /// Retries exhausted or a non-retryable HTTP error.
    BackendUnavailable(String),
    /// No JSON document could be recovered from the reply.
    JsonExtraction(String),
    /// Recovered JSON did not match the stage schema.
    SchemaInvalid(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::CredentialsMissing => {
                write!(f, "OPENROUTER_API_KEY missing. Set it to enable live agent runs.")
            }
            LlmError::BackendUnavailable(msg) => write!(f, "Model backend unavailable: {}", msg),
            LlmError::JsonExtraction(msg) => write!(f, "No valid JSON found in reply: {}", msg),
            LlmError::SchemaInvalid(msg) => write!(f, "Schema validation failed: {}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

/// A chat message.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Options for a model call.
#[derive(Debug, Clone)]
pub struct LlmCallOptions {
    pub model: Option<String>,
    pub system: Option<String>,
    pub json_mode: bool,
    pub temperature: f64,
    pub max_retries: u32,
}

impl Default for LlmCallOptions {
    fn default() -> Self {
        LlmCallOptions {
            model: None,
            system: None,
            json_mode: false,
            temperature: 0.2,
            max_retries: 3,
        }
    }
}

/// True when the backend credential is absent and the core runs on stubs.
pub fn use_stubs() -> bool {
    env::var("OPENROUTER_API_KEY")
        .map(|key| key.is_empty())
        .unwrap_or(true)
}

/// Call the chat-completion endpoint and return the assistant's text.
pub fn call_llm(messages: &[Message], options: &LlmCallOptions) -> Result<String, LlmError> {
    let api_key = env::var("OPENROUTER_API_KEY")
        .ok()
        .filter(|key| !key.is_empty())
        .ok_or(LlmError::CredentialsMissing)?;

    let model = options
        .model
        .clone()
        .or_else(|| env::var("LLM_MODEL").ok().filter(|m| !m.is_empty()))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let mut all_messages: Vec<Message> = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = &options.system {
        if !system.is_empty() {
            all_messages.push(Message {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
    }
    all_messages.extend_from_slice(messages);

    let mut payload = json!({
        "model": model,
        "messages": all_messages,
        "temperature": options.temperature,
    });
    if let Ok(provider) = env::var("LLM_PROVIDER") {
        if !provider.is_empty() {
            payload["provider"] = json!({"order": [provider], "allow_fallbacks": false});
        }
    }
    if options.json_mode {
        payload["response_format"] = json!({"type": "json_object"});
    }

    let max_retries = options.max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 0..max_retries {
        let response = attohttpc::post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .and_then(|req| req.send());

        match response {
            Ok(resp) if resp.status().as_u16() == 429 => {
                last_error = "rate limited (HTTP 429)".to_string();
                if attempt + 1 < max_retries {
                    thread::sleep(Duration::from_secs(u64::from(attempt + 1) * 2));
                    continue;
                }
            }
            Ok(resp) if !resp.is_success() => {
                // Non-retryable HTTP error surfaces immediately
                let status = resp.status().as_u16();
                let body = resp.text().unwrap_or_default();
                return Err(LlmError::BackendUnavailable(format!(
                    "HTTP {}: {}",
                    status, body
                )));
            }
            Ok(resp) => {
                let body = resp
                    .text()
                    .map_err(|e| LlmError::BackendUnavailable(e.to_string()))?;
                let data: Value = serde_json::from_str(&body)
                    .map_err(|e| LlmError::BackendUnavailable(format!("bad reply body: {}", e)))?;

                debug_log(&model, &payload, &data);

                let content = data
                    .get("choices")
                    .and_then(Value::as_array)
                    .and_then(|choices| choices.first())
                    .and_then(|choice| choice.get("message"))
                    .and_then(|message| message.get("content"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                return Ok(content.to_string());
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt + 1 < max_retries {
                    thread::sleep(Duration::from_secs(1));
                    continue;
                }
            }
        }
    }

    Err(LlmError::BackendUnavailable(format!(
        "failed after {} attempts: {}",
        max_retries, last_error
    )))
}

/// Append the raw request/response pair to llm_debug.log when DEBUG_LLM is set.
fn debug_log(model: &str, payload: &Value, response: &Value) {
    let enabled = env::var("DEBUG_LLM")
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false);
    if !enabled {
        return;
    }

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
    let entry = format!(
        "{} --- REQUEST ({}) ---\n{}\n--- RESPONSE ---\n{}\n------------------------\n",
        timestamp,
        model,
        serde_json::to_string_pretty(payload).unwrap_or_default(),
        serde_json::to_string_pretty(response).unwrap_or_default(),
    );
    let _ = OpenOptions::new()
        .create(true)
        .append(true)
        .open("llm_debug.log")
        .and_then(|mut f| f.write_all(entry.as_bytes()));
}

/// Recover a JSON document from a loosely formatted model reply.
///
/// Empty input is treated as the empty object. Otherwise: parse the whole
/// text, then the first `{`..last `}` span, then the first `[`..last `]`
/// span.
pub fn extract_json(text: &str) -> Result<Value, LlmError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if end > start {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    let preview: String = trimmed.chars().take(120).collect();
    Err(LlmError::JsonExtraction(preview))
}

/// Run a JSON-mode agent and validate its reply against the stage schema.
pub fn run_json_agent<T: DeserializeOwned>(
    store: &PromptStore,
    slug: &str,
    user_input: &str,
    temperature: f64,
) -> Result<T, PipelineError> {
    let segments = store.load(slug)?;
    let content = format!("{}\n\n{}", segments.instruction, user_input)
        .trim()
        .to_string();

    let raw = call_llm(
        &[Message::user(content)],
        &LlmCallOptions {
            system: Some(segments.system),
            json_mode: true,
            temperature,
            ..Default::default()
        },
    )?;

    let parsed = extract_json(&raw)?;
    serde_json::from_value(parsed)
        .map_err(|e| PipelineError::Llm(LlmError::SchemaInvalid(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_empty_text_returns_empty_object() {
        assert_eq!(extract_json("").unwrap(), json!({}));
        assert_eq!(extract_json("   \n\t ").unwrap(), json!({}));
    }

    #[test]
    fn test_extract_direct_json() {
        let value = extract_json(r#"{"name": "Iris", "syllables": 2}"#).unwrap();
        assert_eq!(value, json!({"name": "Iris", "syllables": 2}));
    }

    #[test]
    fn test_extract_object_from_prose() {
        let text = "Here is your card:\n```json\n{\"name\": \"Iris\"}\n```\nHope that helps!";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!({"name": "Iris"}));
    }

    #[test]
    fn test_extract_array_from_prose() {
        let text = "Candidates below.\n[\"Iris\", \"Wren\"]\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!(["Iris", "Wren"]));
    }

    #[test]
    fn test_extract_prefers_whole_text_over_span() {
        // The whole text is already valid JSON, including the inner braces
        let value = extract_json(r#"["a", "{not json}"]"#).unwrap();
        assert_eq!(value, json!(["a", "{not json}"]));
    }

    #[test]
    fn test_extract_failure() {
        let err = extract_json("no json here at all").unwrap_err();
        assert!(matches!(err, LlmError::JsonExtraction(_)));
    }

    #[test]
    fn test_extract_round_trips_serialized_values() {
        let values = vec![
            json!(null),
            json!(42),
            json!("plain string"),
            json!([1, 2, 3]),
            json!({"nested": {"deep": [true, false]}}),
        ];
        for value in values {
            let serialized = serde_json::to_string(&value).unwrap();
            assert_eq!(extract_json(&serialized).unwrap(), value);
        }
    }

    #[test]
    fn test_call_without_credentials_fails_fast() {
        env::remove_var("OPENROUTER_API_KEY");
        let err = call_llm(&[Message::user("hi")], &LlmCallOptions::default()).unwrap_err();
        assert!(matches!(err, LlmError::CredentialsMissing));
    }

    #[test]
    fn test_use_stubs_without_key() {
        env::remove_var("OPENROUTER_API_KEY");
        assert!(use_stubs());
    }
}
