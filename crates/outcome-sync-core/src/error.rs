//! Error types for Outcome Sync Core
//!
//! Provides error handling for:
//! - Remote client (transport, status, GraphQL) failures
//! - Rubric assessment errors reported by the combined mutation
//! - Configuration loading and validation
//! - Malformed remote payloads

use crate::types::{SubmissionId, UserId};

/// Main sync error type
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Remote client failed
    #[error("remote client error: {0}")]
    Client(#[from] ClientError),

    /// Rubric assessment sub-operation reported errors
    #[error("rubric assessment rejected: {}", .0.join("; "))]
    RubricAssessment(Vec<String>),

    /// SCORE update without the points to record on the rubric
    #[error("score update for submission {0} has no rubric points")]
    MissingRubricPoints(SubmissionId),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Payload encoding failed
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// No enrollment/submission handles known for a student
    #[error("unresolved student: {0}")]
    UnresolvedStudent(UserId),

    /// Remote returned a body this crate cannot interpret
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl SyncError {
    /// Check if error is retryable
    ///
    /// Informational only; nothing in this crate retries.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Client(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Remote client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection, TLS or timeout failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// GraphQL request-level errors (syntax, validation, auth)
    #[error("graphql errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    /// Response body was not valid JSON
    #[error("undecodable response: {0}")]
    Decode(String),

    /// Base URL or path could not be joined
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Transport failures and 5xx/429 responses may succeed on a later pass
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but violate a constraint
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result alias used across the crate
pub type SyncResult<T> = Result<T, SyncError>;
