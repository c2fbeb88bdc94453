//! Error types for Charla
//!
//! This module defines all error types used throughout the engine.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured completion-provider error classification.
///
/// Provides fine-grained categorization of provider HTTP errors, enabling
/// intelligent retry decisions without string matching.
#[derive(Debug)]
pub enum ProviderError {
    /// 401 — Invalid API key or authentication failure
    Auth(String),
    /// 429 — Rate limit or quota exceeded
    RateLimit(String),
    /// 500/502/503/504 — Server-side errors
    ServerError(String),
    /// 400 — Bad request, invalid JSON, malformed parameters
    InvalidRequest(String),
    /// 404 — Model not found or endpoint not available
    ModelNotFound(String),
    /// Connection or read timeout
    Timeout(String),
    /// Provider is overloaded — retry with backoff
    Overloaded(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ProviderError::Overloaded(msg) => write!(f, "Overloaded error: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns `true` if this error is transient and the request should be retried.
    ///
    /// Retryable errors: RateLimit, ServerError, Timeout, Overloaded.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_)
                | ProviderError::ServerError(_)
                | ProviderError::Timeout(_)
                | ProviderError::Overloaded(_)
        )
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Timeout(_) => None,
            ProviderError::Overloaded(_) => Some(503),
            ProviderError::Unknown(_) => None,
        }
    }
}

impl From<ProviderError> for CharlaError {
    fn from(err: ProviderError) -> Self {
        CharlaError::ProviderTyped(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for Charla operations.
#[derive(Error, Debug)]
pub enum CharlaError {
    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider errors without classification.
    /// Kept for internal fallbacks — new code should prefer `ProviderTyped`.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Structured provider error with classification for retry decisions.
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// Key-value store errors (connection failures, corrupted records, etc.)
    #[error("Store error: {0}")]
    Store(String),

    /// Session management errors (invalid state, persistence failures, etc.)
    #[error("Session error: {0}")]
    Session(String),

    /// Tool execution errors (invalid parameters, execution failures, etc.)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Protocol inconsistencies in the message history (unmatched call ids,
    /// malformed bundles). Normally handled defensively before surfacing.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized `Result` type for Charla operations.
pub type Result<T> = std::result::Result<T, CharlaError>;
