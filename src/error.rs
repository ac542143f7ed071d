//! Crate-wide error taxonomy: Transient I/O, Protocol, Validation, and Fatal
//! failures, with sanitized conversion to an on-bus error event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for workcell operations.
#[derive(Debug, Error)]
pub enum WorkcellError {
    /// A transient transport or I/O failure: broker unreachable, connection
    /// reset, write timeout. Safe to retry.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A malformed or undecodable envelope/payload.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A well-formed message that fails domain validation (bad code format,
    /// out-of-range position, unknown direction).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Configuration is missing or inconsistent; not recoverable without
    /// operator intervention.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// An invariant was violated that indicates a bug rather than bad input.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl WorkcellError {
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether this error class is safe to retry without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Convert to the sanitized, wire-publishable error event carried on
    /// `status.error`-style topics.
    pub fn to_error_event(&self, topic_hint: &str) -> ErrorEvent {
        let code = match self {
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Protocol { .. } => ErrorCode::Protocol,
            Self::Validation { .. } => ErrorCode::Validation,
            Self::Config(_) => ErrorCode::Config,
            Self::Internal { .. } => ErrorCode::Internal,
        };

        ErrorEvent {
            code,
            message: sanitize_error_message(&self.to_string()),
            topic: topic_hint.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    Transport,
    Protocol,
    Validation,
    Config,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub code: ErrorCode,
    pub message: String,
    pub topic: String,
}

/// Redact credential-shaped substrings and sensitive file paths, and cap
/// length, before an error crosses the bus to another service.
fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    sanitized = regex::Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+")
        .unwrap()
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    sanitized =
        regex::Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
            .unwrap()
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 500 - truncate_suffix.len();
        let mut boundary = max_content_len.min(sanitized.len());
        while !sanitized.is_char_boundary(boundary) {
            boundary -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..boundary], truncate_suffix);
    }

    sanitized
}

pub type WorkcellResult<T> = Result<T, WorkcellError>;
