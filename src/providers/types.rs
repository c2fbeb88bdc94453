//! Provider types for Charla
//!
//! This module defines the core types and traits for completion providers:
//! the `CompletionProvider` trait, the wire message shape the transcoder
//! produces, capability declarations, options, and response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Role of a wire message in the request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    /// Content attributed to the user (including tool results)
    User,
    /// Content attributed to the model
    Assistant,
}

/// One message of the model-call request payload.
///
/// Produced by the transcoder from the session log. The request contract
/// requires strict user/assistant alternation and complete tool-call /
/// tool-result pairing; the transcoder enforces both before anything
/// reaches a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message role
    pub role: WireRole,
    /// Ordered content blocks
    pub blocks: Vec<WireBlock>,
}

impl WireMessage {
    /// Create a user text message.
    pub fn user_text(text: &str) -> Self {
        Self {
            role: WireRole::User,
            blocks: vec![WireBlock::Text {
                text: text.to_string(),
            }],
        }
    }

    /// Create an assistant message from blocks.
    pub fn assistant(blocks: Vec<WireBlock>) -> Self {
        Self {
            role: WireRole::Assistant,
            blocks,
        }
    }

    /// Check whether any block is a tool-use or tool-result block.
    pub fn carries_tool_traffic(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| !matches!(b, WireBlock::Text { .. }))
    }
}

/// One content block of a wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBlock {
    /// Natural-language text
    Text {
        /// Text content
        text: String,
    },
    /// A tool invocation requested by the model (assistant messages only)
    ToolUse {
        /// Call id
        id: String,
        /// Tool name
        name: String,
        /// Structured input
        input: Value,
    },
    /// A tool result answering a prior call (user messages only)
    ToolResult {
        /// Id of the call being answered
        call_id: String,
        /// Serialized result content
        content: String,
        /// Whether the result is an error
        is_error: bool,
    },
}

/// Declaration of a capability the model may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool (must be unique)
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Options for a completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Model override (provider default if `None`)
    pub model: Option<String>,
    /// Maximum number of tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature for sampling
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    /// Create new default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model.
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    /// Set the maximum number of tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool to execute
    pub name: String,
    /// Structured input for the tool
    pub input: Value,
}

impl ModelToolCall {
    /// Create a new tool call.
    pub fn new(id: &str, name: &str, input: Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }
}

/// Response from a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Concatenated text content of the response
    pub content: String,
    /// Tool calls requested by the model (if any)
    pub tool_calls: Vec<ModelToolCall>,
    /// Token usage information (if available)
    pub usage: Option<Usage>,
}

impl ModelResponse {
    /// Create a text-only response.
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            tool_calls: vec![],
            usage: None,
        }
    }

    /// Create a response with tool calls.
    pub fn with_tools(content: &str, tool_calls: Vec<ModelToolCall>) -> Self {
        Self {
            content: content.to_string(),
            tool_calls,
            usage: None,
        }
    }

    /// Check if this response contains any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Attach usage information.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Token usage information from a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used (prompt + completion)
    pub total_tokens: u32,
}

impl Usage {
    /// Create new usage information.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Trait for completion providers.
///
/// Implement this trait to plug in a new provider. The provider translates
/// between the engine's wire shape and its API format; it is stateless and
/// safe for concurrent use.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send one completion request.
    ///
    /// # Arguments
    /// * `system` - The policy-defined system prompt
    /// * `messages` - The transcoded conversation history
    /// * `tools` - Capability declarations currently offered to the model
    /// * `options` - Model/token/temperature options
    async fn complete(
        &self,
        system: &str,
        messages: Vec<WireMessage>,
        tools: Vec<ToolDefinition>,
        options: CompletionOptions,
    ) -> Result<ModelResponse>;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;

    /// Get the provider name (e.g. "anthropic").
    fn name(&self) -> &str;
}
