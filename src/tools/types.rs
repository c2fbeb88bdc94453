//! Tool types for Charla
//!
//! This module defines the core types for tool execution: the `Tool` trait
//! all handlers implement, the per-dispatch `ToolContext`, execution policy
//! overrides, and the structured `ToolOutcome` every dispatch resolves to.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Per-tool execution policy overrides.
///
/// Unset fields fall back to the runner defaults (timeout 10s, retries 2,
/// delay 1s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolPolicy {
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
    /// Retries after the first attempt
    pub retries: Option<u32>,
    /// Base delay between attempts (doubled per attempt)
    pub retry_delay: Option<Duration>,
}

impl ToolPolicy {
    /// Create an empty policy (all runner defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Set the base retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }
}

/// Structured result of a tool dispatch.
///
/// Always a recoverable value: a failed execution is `{ok: false, error}`,
/// never a fault that escapes the runner. Cached outcomes are serialized,
/// so the type round-trips through serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the execution succeeded
    pub ok: bool,
    /// Result payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error description on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    /// Create a success outcome carrying a payload.
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create a failure outcome carrying an error description.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Trait that all tools must implement.
///
/// Tools are the capabilities the model can request by name. Each handler
/// declares its wire-format schema, validates its own input, may override
/// the runner's execution policy, and resolves to a [`ToolOutcome`].
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use charla::tools::{Tool, ToolContext, ToolOutcome};
/// use charla::error::Result;
///
/// struct PingTool;
///
/// #[async_trait]
/// impl Tool for PingTool {
///     fn name(&self) -> &str { "ping" }
///     fn description(&self) -> &str { "Reports liveness" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({"type": "object", "properties": {}, "required": []})
///     }
///     async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
///         Ok(ToolOutcome::success(serde_json::json!("pong")))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name. Unique within a registry.
    fn name(&self) -> &str;

    /// Get the tool description sent to the model.
    fn description(&self) -> &str;

    /// Get the JSON schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Validate raw input before execution.
    ///
    /// A rejected input becomes a structured error outcome that is never
    /// retried — the model can read it and self-correct. The default
    /// accepts everything.
    fn validate(&self, _args: &Value) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Execution policy overrides for this tool. Default: runner defaults.
    fn policy(&self) -> ToolPolicy {
        ToolPolicy::default()
    }

    /// Execute the tool with the given arguments.
    ///
    /// An `Err` return is treated as a transient fault and retried per
    /// policy; domain-level failures should be expressed as
    /// `Ok(ToolOutcome::failure(..))`.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome>;
}

/// Context provided to tools during execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Unique id of the request being processed
    pub request_id: String,
    /// Conversation identity the dispatch belongs to
    pub identity: String,
    /// Inbound message id, when the transport supplied one
    pub inbound_message_id: Option<String>,
}

impl ToolContext {
    /// Create a new empty tool context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request id.
    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = request_id.to_string();
        self
    }

    /// Set the conversation identity.
    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = identity.to_string();
        self
    }

    /// Set the inbound message id.
    pub fn with_inbound_message_id(mut self, id: &str) -> Self {
        self.inbound_message_id = Some(id.to_string());
        self
    }
}
