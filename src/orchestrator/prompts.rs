//! Prompt loading and caching
//!
//! Prompt files live in a flat directory as `<slug>.md`, each with a
//! `System:` block followed by an `Instruction:` block. Parsed segments are
//! cached by slug for the life of the store.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use regex::Regex;

/// Parsed prompt with system and instruction sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSegments {
    pub system: String,
    pub instruction: String,
}

/// Error type for prompt operations.
#[derive(Debug)]
pub enum PromptError {
    NotFound(PathBuf),
    Io(std::io::Error),
}

impl std::fmt::Display for PromptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromptError::NotFound(path) => write!(f, "Prompt file not found: {}", path.display()),
            PromptError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for PromptError {}

impl From<std::io::Error> for PromptError {
    fn from(e: std::io::Error) -> Self {
        PromptError::Io(e)
    }
}

fn system_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)system:\s*(.*?)\n\ninstruction:").expect("hardcoded regex"))
}

fn instruction_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)instruction:\s*(.*)$").expect("hardcoded regex"))
}

fn parse_segments(raw: &str) -> PromptSegments {
    let system = system_pattern()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let instruction = instruction_pattern()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    PromptSegments { system, instruction }
}

/// Prompt store - loads and caches prompt files from one directory.
#[derive(Debug)]
pub struct PromptStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, PromptSegments>>,
}

impl PromptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PromptStore {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Store rooted at `PROMPTS_DIR`, defaulting to `./prompts`.
    pub fn from_env() -> Self {
        let dir = env::var("PROMPTS_DIR")
            .ok()
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("prompts"));
        PromptStore::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load and parse `<dir>/<slug>.md`, reusing the cached parse if present.
    pub fn load(&self, slug: &str) -> Result<PromptSegments, PromptError> {
        if let Some(cached) = self.cache.lock().unwrap().get(slug) {
            return Ok(cached.clone());
        }

        let path = self.dir.join(format!("{}.md", slug));
        if !path.exists() {
            return Err(PromptError::NotFound(path));
        }

        let raw = fs::read_to_string(&path)?;
        let segments = parse_segments(&raw);

        self.cache
            .lock()
            .unwrap()
            .insert(slug.to_string(), segments.clone());

        Ok(segments)
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store_with_prompt(slug: &str, content: &str) -> (tempfile::TempDir, PromptStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join(format!("{}.md", slug))).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let store = PromptStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_parses_system_and_instruction() {
        let (_dir, store) = store_with_prompt(
            "researcher",
            "System:\nYou are a name researcher.\n\nInstruction:\nFill in the card.\n",
        );
        let segments = store.load("researcher").unwrap();
        assert_eq!(segments.system, "You are a name researcher.");
        assert_eq!(segments.instruction, "Fill in the card.");
    }

    #[test]
    fn test_labels_are_case_insensitive() {
        let (_dir, store) = store_with_prompt(
            "generator",
            "SYSTEM:\nsys text\n\nINSTRUCTION:\ninst text\n",
        );
        let segments = store.load("generator").unwrap();
        assert_eq!(segments.system, "sys text");
        assert_eq!(segments.instruction, "inst text");
    }

    #[test]
    fn test_missing_sections_become_empty() {
        let (_dir, store) = store_with_prompt("odd", "Just some text with no labels.\n");
        let segments = store.load("odd").unwrap();
        assert_eq!(segments.system, "");
        assert_eq!(segments.instruction, "");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::new(dir.path());
        let err = store.load("ghost").unwrap_err();
        assert!(matches!(err, PromptError::NotFound(_)));
    }

    #[test]
    fn test_cache_survives_file_changes_until_cleared() {
        let (dir, store) = store_with_prompt(
            "cached",
            "System:\noriginal\n\nInstruction:\noriginal inst\n",
        );

        let first = store.load("cached").unwrap();
        let second = store.load("cached").unwrap();
        assert_eq!(first, second);

        // Rewrite the file; the cached parse still wins
        fs::write(
            dir.path().join("cached.md"),
            "System:\nupdated\n\nInstruction:\nupdated inst\n",
        )
        .unwrap();
        assert_eq!(store.load("cached").unwrap().system, "original");

        store.clear_cache();
        assert_eq!(store.load("cached").unwrap().system, "updated");
    }
}
