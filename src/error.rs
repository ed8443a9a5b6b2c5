//! Error types for conversion, validation and rendering

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while walking chat HTML
///
/// These never reach callers of [`crate::converter::HtmlToMarkdownConverter::parse`]:
/// the converter catches them and degrades to plain-text extraction.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Element nesting exceeded the walk bound
    #[error("HTML nesting depth {depth} exceeds maximum allowed depth {max}")]
    NestingTooDeep { depth: usize, max: usize },
}

/// Wire-level error codes reported to render callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderErrorCode {
    DangerousContent,
    ContentTooLarge,
    NestingTooDeep,
    OutputTooLarge,
    RenderTimeout,
    CircuitOpen,
}

impl RenderErrorCode {
    /// Stable string form, identical to the serialized value
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderErrorCode::DangerousContent => "DANGEROUS_CONTENT",
            RenderErrorCode::ContentTooLarge => "CONTENT_TOO_LARGE",
            RenderErrorCode::NestingTooDeep => "NESTING_TOO_DEEP",
            RenderErrorCode::OutputTooLarge => "OUTPUT_TOO_LARGE",
            RenderErrorCode::RenderTimeout => "RENDER_TIMEOUT",
            RenderErrorCode::CircuitOpen => "CIRCUIT_OPEN",
        }
    }
}

impl std::fmt::Display for RenderErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons Markdown input is rejected before parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("content of {size} bytes exceeds the {limit} byte limit")]
    ContentTooLarge { size: usize, limit: usize },
    #[error("content contains a script or dangerous URL pattern")]
    DangerousContent,
    #[error("bracket nesting depth {depth} exceeds the limit of {limit}")]
    NestingTooDeep { depth: usize, limit: usize },
}

impl ValidationError {
    pub fn code(&self) -> RenderErrorCode {
        match self {
            ValidationError::ContentTooLarge { .. } => RenderErrorCode::ContentTooLarge,
            ValidationError::DangerousContent => RenderErrorCode::DangerousContent,
            ValidationError::NestingTooDeep { .. } => RenderErrorCode::NestingTooDeep,
        }
    }
}

/// Failures of one render attempt; each counts against the circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("input rejected: {0}")]
    Validation(#[from] ValidationError),
    /// Time budget exceeded at a chunk boundary
    #[error("render exceeded {budget_ms} ms after {completed} of {total} chunks")]
    Timeout {
        budget_ms: u64,
        completed: usize,
        total: usize,
    },
    #[error("rendered HTML of {size} bytes exceeds the {limit} byte limit")]
    OutputTooLarge { size: usize, limit: usize },
}

impl RenderError {
    /// Get the wire code for this failure
    pub fn code(&self) -> RenderErrorCode {
        match self {
            RenderError::Validation(err) => err.code(),
            RenderError::Timeout { .. } => RenderErrorCode::RenderTimeout,
            RenderError::OutputTooLarge { .. } => RenderErrorCode::OutputTooLarge,
        }
    }
}
