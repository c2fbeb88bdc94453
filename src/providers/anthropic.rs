//! Anthropic completion provider implementation
//!
//! This module implements the `CompletionProvider` trait over the Anthropic
//! Messages HTTP API, handling wire-message conversion, tool declarations,
//! and response parsing.
//!
//! # Example
//!
//! ```rust,ignore
//! use charla::providers::{AnthropicProvider, CompletionOptions, CompletionProvider, WireMessage};
//!
//! async fn example() {
//!     let provider = AnthropicProvider::new("your-api-key");
//!     let response = provider
//!         .complete(
//!             "You are helpful.",
//!             vec![WireMessage::user_text("Hello!")],
//!             vec![],
//!             CompletionOptions::default(),
//!         )
//!         .await
//!         .unwrap();
//!     println!("{}", response.content);
//! }
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CharlaError, Result};

use super::{
    parse_provider_error, CompletionOptions, CompletionProvider, ModelResponse, ModelToolCall,
    ToolDefinition, Usage, WireBlock, WireMessage, WireRole,
};

/// Default Messages API endpoint.
const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// The default model to use.
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// The Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic completion provider.
///
/// Stateless apart from the shared HTTP client; safe to share across
/// concurrent requests.
pub struct AnthropicProvider {
    api_key: String,
    api_base: String,
    client: Client,
}

impl AnthropicProvider {
    /// Create a new provider with the given API key.
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Override the API base URL (proxies, compatible endpoints).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Use a custom HTTP client (testing, proxies, custom timeouts).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<WireMessage>,
        tools: Vec<ToolDefinition>,
        options: CompletionOptions,
    ) -> Result<ModelResponse> {
        let model = options.model.as_deref().unwrap_or(DEFAULT_MODEL);

        let request = ApiRequest {
            model: model.to_string(),
            max_tokens: options.max_tokens.unwrap_or(1024),
            system: if system.is_empty() {
                None
            } else {
                Some(system.to_string())
            },
            messages: messages.iter().map(convert_message).collect(),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.into_iter().map(convert_tool).collect())
            },
            temperature: options.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            let body = if let Ok(parsed) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                format!("API error: {} - {}", parsed.error.r#type, parsed.error.message)
            } else {
                format!("API error: {}", error_text)
            };
            return Err(CharlaError::from(parse_provider_error(status, &body)));
        }

        let api_response: ApiResponse = response.json().await?;
        Ok(convert_response(api_response))
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ============================================================================
// API types
// ============================================================================

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: Vec<ApiContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiResponseBlock>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    r#type: String,
    message: String,
}

// ============================================================================
// Conversion
// ============================================================================

fn convert_message(msg: &WireMessage) -> ApiMessage {
    ApiMessage {
        role: match msg.role {
            WireRole::User => "user".to_string(),
            WireRole::Assistant => "assistant".to_string(),
        },
        content: msg
            .blocks
            .iter()
            .map(|b| match b {
                WireBlock::Text { text } => ApiContentBlock::Text { text: text.clone() },
                WireBlock::ToolUse { id, name, input } => ApiContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                },
                WireBlock::ToolResult {
                    call_id,
                    content,
                    is_error,
                } => ApiContentBlock::ToolResult {
                    tool_use_id: call_id.clone(),
                    content: content.clone(),
                    is_error: *is_error,
                },
            })
            .collect(),
    }
}

fn convert_tool(tool: ToolDefinition) -> ApiTool {
    ApiTool {
        name: tool.name,
        description: tool.description,
        input_schema: tool.parameters,
    }
}

fn convert_response(response: ApiResponse) -> ModelResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ApiResponseBlock::Text { text } => {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(&text);
            }
            ApiResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(ModelToolCall { id, name, input });
            }
            ApiResponseBlock::Unknown => {}
        }
    }

    let usage = response
        .usage
        .map(|u| Usage::new(u.input_tokens, u.output_tokens));

    ModelResponse {
        content,
        tool_calls,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_metadata() {
        let provider = AnthropicProvider::new("sk-test");
        assert_eq!(provider.name(), "anthropic");
        assert!(!provider.default_model().is_empty());
    }

    #[test]
    fn test_with_api_base_trims_slash() {
        let provider = AnthropicProvider::new("sk-test").with_api_base("http://localhost:8080/");
        assert_eq!(provider.api_base, "http://localhost:8080");
    }

    #[test]
    fn test_convert_message_roles() {
        let msg = WireMessage::user_text("hola");
        let api = convert_message(&msg);
        assert_eq!(api.role, "user");

        let msg = WireMessage::assistant(vec![WireBlock::Text {
            text: "hi".into(),
        }]);
        let api = convert_message(&msg);
        assert_eq!(api.role, "assistant");
    }

    #[test]
    fn test_convert_message_tool_result_maps_call_id() {
        let msg = WireMessage {
            role: WireRole::User,
            blocks: vec![WireBlock::ToolResult {
                call_id: "call_7".into(),
                content: "done".into(),
                is_error: false,
            }],
        };
        let api = convert_message(&msg);
        let json = serde_json::to_value(&api.content).unwrap();
        assert_eq!(json[0]["type"], "tool_result");
        assert_eq!(json[0]["tool_use_id"], "call_7");
        // is_error=false is omitted on the wire
        assert!(json[0].get("is_error").is_none());
    }

    #[test]
    fn test_convert_message_tool_result_error_flag() {
        let msg = WireMessage {
            role: WireRole::User,
            blocks: vec![WireBlock::ToolResult {
                call_id: "call_7".into(),
                content: "boom".into(),
                is_error: true,
            }],
        };
        let json = serde_json::to_value(&convert_message(&msg).content).unwrap();
        assert_eq!(json[0]["is_error"], true);
    }

    #[test]
    fn test_convert_tool_schema_field() {
        let tool = ToolDefinition::new("lookup", "Look things up", json!({"type": "object"}));
        let api = convert_tool(tool);
        let json = serde_json::to_value(&api).unwrap();
        assert!(json["input_schema"].is_object());
        assert_eq!(json["name"], "lookup");
    }

    #[test]
    fn test_convert_response_text_and_tools() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "call_1", "name": "lookup", "input": {"q": "x"}}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let api: ApiResponse = serde_json::from_value(raw).unwrap();
        let response = convert_response(api);
        assert_eq!(response.content, "Let me check.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_1");
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_convert_response_concatenates_text_blocks() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "one"},
                {"type": "text", "text": "two"}
            ],
            "usage": null
        });
        let api: ApiResponse = serde_json::from_value(raw).unwrap();
        let response = convert_response(api);
        assert_eq!(response.content, "one\ntwo");
        assert!(!response.has_tool_calls());
    }

    #[test]
    fn test_convert_response_ignores_unknown_blocks() {
        let raw = json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "answer"}
            ],
            "usage": null
        });
        let api: ApiResponse = serde_json::from_value(raw).unwrap();
        let response = convert_response(api);
        assert_eq!(response.content, "answer");
    }

    #[test]
    fn test_request_serialization_skips_empty() {
        let request = ApiRequest {
            model: "m".into(),
            max_tokens: 10,
            messages: vec![],
            system: None,
            tools: None,
            temperature: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("system"));
        assert!(!json.contains("tools"));
        assert!(!json.contains("temperature"));
    }
}
