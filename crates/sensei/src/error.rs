//! Pipeline error types
//!
//! One crate-wide error enum with stable kinds. Failed records store the
//! originating kind verbatim so status queries can report exactly what broke
//! and callers can decide whether a retry makes sense.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur anywhere in the training pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source path does not resolve to readable, non-empty content
    #[error("Invalid content source {path}: {reason}")]
    InvalidSource { path: String, reason: String },

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Status transition not allowed by the lifecycle table
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Operation not valid for the record's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Content type could not be detected or is not processable
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Content has not reached the processed state
    #[error("Content not ready: {0}")]
    ContentNotReady(String),

    /// Training job has not reached the completed state
    #[error("Training not complete: {0}")]
    TrainingNotComplete(String),

    /// No runtime implementations registered for the role
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// External provider rejected the call due to rate limiting
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// External provider failed fatally
    #[error("Provider error: {0}")]
    Provider(String),

    /// A pipeline stage exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Operation cancelled before completion
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable machine-readable error kind, recorded on failed records
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidSource,
    NotFound,
    InvalidTransition,
    InvalidState,
    UnsupportedContentType,
    ContentNotReady,
    TrainingNotComplete,
    RoleNotFound,
    RateLimited,
    Provider,
    Timeout,
    Cancelled,
    Storage,
    Config,
}

impl PipelineError {
    /// Create an invalid source error
    pub fn invalid_source(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an invalid transition error
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an unsupported content type error
    pub fn unsupported_content_type(msg: impl Into<String>) -> Self {
        Self::UnsupportedContentType(msg.into())
    }

    /// Create a content not ready error
    pub fn content_not_ready(msg: impl Into<String>) -> Self {
        Self::ContentNotReady(msg.into())
    }

    /// Create a training not complete error
    pub fn training_not_complete(msg: impl Into<String>) -> Self {
        Self::TrainingNotComplete(msg.into())
    }

    /// Create a role not found error
    pub fn role_not_found(role: impl Into<String>) -> Self {
        Self::RoleNotFound(role.into())
    }

    /// Create a rate limited error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a cancelled error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The stable kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSource { .. } => ErrorKind::InvalidSource,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::UnsupportedContentType(_) => ErrorKind::UnsupportedContentType,
            Self::ContentNotReady(_) => ErrorKind::ContentNotReady,
            Self::TrainingNotComplete(_) => ErrorKind::TrainingNotComplete,
            Self::RoleNotFound(_) => ErrorKind::RoleNotFound,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Provider(_) => ErrorKind::Provider,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether retrying the operation can succeed.
    ///
    /// Rate limits clear on their own; a timed-out stage may succeed on a
    /// fresh job. Everything else needs operator input first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout(_))
    }

    /// Snapshot of the error for persistence on a failed record
    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {err}"))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Serializable error snapshot stored on failed records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PipelineError::not_found("content 42");
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert_eq!(err.to_string(), "Not found: content 42");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = PipelineError::invalid_transition("processed", "processing");
        assert_eq!(
            err.to_string(),
            "Invalid status transition: processed -> processing"
        );
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_is_retryable() {
        assert!(PipelineError::rate_limited("429").is_retryable());
        assert!(PipelineError::timeout("training stage").is_retryable());
        assert!(!PipelineError::provider("model gone").is_retryable());
        assert!(!PipelineError::not_found("x").is_retryable());
        assert!(!PipelineError::cancelled("operator").is_retryable());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let kind = PipelineError::unsupported_content_type("image/png").kind();
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, "\"unsupported_content_type\"");
    }

    #[test]
    fn test_detail_roundtrip() {
        let detail = PipelineError::content_not_ready("content 7 is registered").detail();
        let json = serde_json::to_string(&detail).unwrap();
        let back: ErrorDetail = serde_json::from_str(&json).unwrap();
        assert_eq!(back, detail);
        assert_eq!(back.kind, ErrorKind::ContentNotReady);
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err: PipelineError = json_err.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
        assert_eq!(ErrorKind::RoleNotFound.to_string(), "role_not_found");
    }
}
