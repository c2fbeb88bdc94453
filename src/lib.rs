//! Charla - conversational agent engine with durable sessions and tool orchestration

pub mod agent;
pub mod config;
pub mod error;
pub mod providers;
pub mod session;
pub mod tools;
pub mod utils;

pub use agent::{Engine, InboundMessage};
pub use config::Config;
pub use error::{CharlaError, Result};
pub use providers::{
    AnthropicProvider, CompletionOptions, CompletionProvider, ModelResponse, ModelToolCall,
    RetryProvider, ToolDefinition, Usage,
};
pub use session::{Session, SessionStore, StoredMessage};
pub use tools::{Tool, ToolContext, ToolOutcome, ToolRegistry, ToolRunner};
