//! Error types for CueCore
//!
//! Compile problems are collected, not raised: a `CompileError` narrows
//! detection but never aborts the rest of the matcher set. `EngineError`
//! is reserved for configuration that cannot be loaded at all.

use thiserror::Error;

use crate::scanner::MatchKind;

/// A pattern or template that failed to compile.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("pattern compile failed{}: {pattern}: {message}", kind_suffix(.kind))]
pub struct CompileError {
    /// Matcher kind that was disabled, `None` for a single bad roster entry
    pub kind: Option<MatchKind>,
    pub pattern: String,
    pub message: String,
}

fn kind_suffix(kind: &Option<MatchKind>) -> String {
    match kind {
        Some(kind) => format!(" ({})", kind.as_str()),
        None => String::new(),
    }
}

impl CompileError {
    pub fn entry(pattern: &str, message: impl Into<String>) -> Self {
        Self {
            kind: None,
            pattern: pattern.to_string(),
            message: message.into(),
        }
    }

    pub fn matcher(kind: MatchKind, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            pattern: String::new(),
            message: message.into(),
        }
    }
}

/// Errors surfaced across the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid profile: {0}")]
    Profile(#[from] serde_json::Error),
    #[error("invalid fuzzy threshold: {0}")]
    FuzzyThreshold(String),
}
