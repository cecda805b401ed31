//! Typed source error model shared across the planner and pull loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    #[error("config")]
    Config,
    #[error("auth")]
    Auth,
    #[error("rate_limit")]
    RateLimit,
    #[error("transport")]
    Transport,
    #[error("data")]
    Data,
    #[error("internal")]
    Internal,
}

/// Opaque error code following SCREAMING_SNAKE_CASE convention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ErrorCode(pub String);

impl ErrorCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ErrorCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ErrorCode {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[error(
    "[{category}] {code} ({retryability}): {message}",
    retryability = if *.retryable { "retryable" } else { "fatal" }
)]
pub struct SourceError {
    pub category: ErrorCategory,
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub retry_after_ms: Option<u64>,
}

impl SourceError {
    /// Configuration error (not retryable).
    pub fn config(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Config,
            code: code.into(),
            message: message.into(),
            retryable: false,
            retry_after_ms: None,
        }
    }

    /// Authentication error (not retryable on its own; the retriable
    /// variant travels as [`CallError::RetriableAuth`]).
    pub fn auth(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Auth,
            code: code.into(),
            message: message.into(),
            retryable: false,
            retry_after_ms: None,
        }
    }

    /// Rate limit error (retryable).
    pub fn rate_limit(
        code: impl Into<ErrorCode>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        Self {
            category: ErrorCategory::RateLimit,
            code: code.into(),
            message: message.into(),
            retryable: true,
            retry_after_ms,
        }
    }

    /// Transport error (retryable).
    pub fn transport(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Transport,
            code: code.into(),
            message: message.into(),
            retryable: true,
            retry_after_ms: None,
        }
    }

    /// Data error (not retryable).
    pub fn data(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Data,
            code: code.into(),
            message: message.into(),
            retryable: false,
            retry_after_ms: None,
        }
    }

    /// Internal error (not retryable).
    pub fn internal(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Internal,
            code: code.into(),
            message: message.into(),
            retryable: false,
            retry_after_ms: None,
        }
    }
}

/// Outcome of a single pull call that did not produce a result.
///
/// `RetriableAuth` asks the driving loop to refresh credentials and retry
/// the same call; `Fatal` fails the work item.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    #[error("stale credential: {0}")]
    RetriableAuth(String),
    #[error(transparent)]
    Fatal(SourceError),
}

impl CallError {
    /// Returns the inner source error for `Fatal`, or a synthesized auth
    /// error describing the stale credential.
    #[must_use]
    pub fn into_source_error(self) -> SourceError {
        match self {
            Self::Fatal(e) => e,
            Self::RetriableAuth(msg) => SourceError::auth("STALE_CREDENTIAL", msg),
        }
    }
}
