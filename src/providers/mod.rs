//! Providers module - completion-service clients
//!
//! This module defines the abstract completion contract the agent loop
//! depends on (`CompletionProvider`), the HTTP implementation for the
//! Anthropic Messages API, and a retry decorator for transient failures.

pub mod anthropic;
pub mod retry;
mod types;

pub use anthropic::AnthropicProvider;
pub use retry::RetryProvider;
pub use types::{
    CompletionOptions, CompletionProvider, ModelResponse, ModelToolCall, ToolDefinition, Usage,
    WireBlock, WireMessage, WireRole,
};

use crate::error::ProviderError;

/// Classify a provider HTTP failure by status code and body.
///
/// The body is scanned for an overload marker first because some providers
/// report overload under a client-error status.
pub fn parse_provider_error(status: u16, body: &str) -> ProviderError {
    let lower = body.to_lowercase();
    if lower.contains("overloaded") {
        return ProviderError::Overloaded(body.to_string());
    }
    match status {
        401 | 403 => ProviderError::Auth(body.to_string()),
        429 => ProviderError::RateLimit(body.to_string()),
        400 => ProviderError::InvalidRequest(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        408 => ProviderError::Timeout(body.to_string()),
        500..=599 => ProviderError::ServerError(format!("HTTP {}: {}", status, body)),
        _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
    }
}
