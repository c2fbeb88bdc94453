//! Retry provider - decorator that adds automatic retry with exponential backoff.
//!
//! Wraps any [`CompletionProvider`] to transparently retry transient errors
//! such as rate limits, server errors, and overload conditions. Client errors
//! (400/401/404) are returned immediately without retry.

use async_trait::async_trait;
use tracing::warn;

use crate::error::{CharlaError, Result};

use super::{CompletionOptions, CompletionProvider, ModelResponse, ToolDefinition, WireMessage};

/// A decorator provider that retries transient completion errors.
///
/// The request is retried up to `max_retries` times with exponential backoff
/// and jitter between attempts.
pub struct RetryProvider {
    /// The wrapped provider that performs actual requests.
    inner: Box<dyn CompletionProvider>,
    /// Maximum number of retry attempts before giving up. Default: 3.
    max_retries: u32,
    /// Base delay in milliseconds for exponential backoff. Default: 1000.
    base_delay_ms: u64,
    /// Maximum delay cap in milliseconds. Default: 30000.
    max_delay_ms: u64,
}

impl std::fmt::Debug for RetryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryProvider")
            .field("inner", &self.inner.name())
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .finish()
    }
}

impl RetryProvider {
    /// Create a new `RetryProvider` wrapping the given inner provider.
    pub fn new(inner: Box<dyn CompletionProvider>) -> Self {
        Self {
            inner,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }

    /// Set the maximum number of retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay in milliseconds for exponential backoff.
    ///
    /// The actual delay for attempt `n` is
    /// `min(base_delay_ms * 2^n + jitter, max_delay_ms)`.
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set the maximum delay cap in milliseconds.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }
}

/// Check whether a [`CharlaError`] represents a transient failure worth retrying.
pub fn is_retryable(err: &CharlaError) -> bool {
    match err {
        CharlaError::ProviderTyped(pe) => pe.is_retryable(),
        CharlaError::Http(e) => e.is_timeout() || e.is_connect(),
        _ => false,
    }
}

/// Compute the backoff delay for a given attempt (without sleeping).
pub fn compute_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(16));
    exponential.saturating_add(jitter_ms).min(max_delay_ms)
}

/// Sleep for the backoff delay of a given retry attempt.
///
/// Jitter is derived from the nanosecond component of the system clock,
/// which decorrelates concurrent retries without adding a `rand` dependency.
async fn delay_with_jitter(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) {
    let jitter_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % (base_delay_ms.max(1)))
        .unwrap_or(0);
    let delay = compute_delay(attempt, base_delay_ms, max_delay_ms, jitter_ms);
    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
}

#[async_trait]
impl CompletionProvider for RetryProvider {
    fn name(&self) -> &str {
        // Delegate to the inner provider; the wrapping is evident from the type.
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn complete(
        &self,
        system: &str,
        messages: Vec<WireMessage>,
        tools: Vec<ToolDefinition>,
        options: CompletionOptions,
    ) -> Result<ModelResponse> {
        let mut last_err: Option<CharlaError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                if let Some(ref err) = last_err {
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "Retrying completion request after transient error"
                    );
                }
                delay_with_jitter(attempt - 1, self.base_delay_ms, self.max_delay_ms).await;
            }

            match self
                .inner
                .complete(system, messages.clone(), tools.clone(), options.clone())
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !is_retryable(&err) || attempt == self.max_retries {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }

        // Unreachable: the loop always returns. Fall back sensibly anyway.
        Err(last_err
            .unwrap_or_else(|| CharlaError::Provider("Retry loop exited without result".into())))
    }
}
