//! Tools module - capability definitions and execution
//!
//! This module provides the infrastructure for the capabilities the model
//! can request during a conversation:
//!
//! - `Tool` trait: the uniform interface every handler implements
//! - `ToolRegistry`: name → handler map and capability declarations
//! - `ToolRunner`: timeout/retry/idempotency execution wrapper
//! - Clinic record tools (over the `ClinicDirectory` collaborator) and the
//!   conditionally-enabled `web_search` tool
//!
//! # Example
//!
//! ```rust
//! use charla::tools::{EchoTool, Tool, ToolContext, ToolRegistry};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let mut registry = ToolRegistry::new();
//! registry.register(Box::new(EchoTool));
//!
//! let tool = registry.get("echo").unwrap();
//! let outcome = tool
//!     .execute(json!({"message": "hello"}), &ToolContext::new())
//!     .await
//!     .unwrap();
//! assert!(outcome.ok);
//! # });
//! ```

pub mod clinic;
mod registry;
mod runner;
pub mod search;
mod types;

pub use clinic::{
    ClinicDirectory, ConsultationRecord, ListPetsTool, MemoryDirectory, PetRecord,
    RecordConsultationTool, RecordVaccineTool, RegisterPetTool, VaccineRecord,
};
pub use registry::ToolRegistry;
pub use runner::{idempotency_key, ResolvedPolicy, ToolRunner};
pub use search::WebSearchTool;
pub use types::{Tool, ToolContext, ToolOutcome, ToolPolicy};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ToolsConfig;
use crate::error::Result;

/// Build the standard registry for a deployment.
///
/// Clinic record tools are always present; `web_search` joins only when its
/// API key is configured, so the capability set declared to the model tracks
/// what is actually available.
pub fn build_registry(config: &ToolsConfig, directory: Arc<dyn ClinicDirectory>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(RegisterPetTool::new(directory.clone())));
    registry.register(Box::new(ListPetsTool::new(directory.clone())));
    registry.register(Box::new(RecordConsultationTool::new(directory.clone())));
    registry.register(Box::new(RecordVaccineTool::new(directory)));

    if let Some(search) = &config.search {
        if !search.api_key.is_empty() {
            registry.register(Box::new(WebSearchTool::with_max_results(
                &search.api_key,
                search.max_results,
            )));
        }
    }

    registry
}

/// A simple echo tool for wiring tests.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the provided message"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        Ok(ToolOutcome::success(serde_json::json!(message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_tool() {
        let tool = EchoTool;
        assert_eq!(tool.name(), "echo");
        let outcome = tool
            .execute(json!({"message": "Hello!"}), &ToolContext::new())
            .await
            .unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.data.unwrap(), json!("Hello!"));
    }

    #[tokio::test]
    async fn test_echo_tool_missing_message() {
        let outcome = EchoTool
            .execute(json!({}), &ToolContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.data.unwrap(), json!("(no message)"));
    }

    #[test]
    fn test_build_registry_without_search() {
        let registry = build_registry(&ToolsConfig::default(), Arc::new(MemoryDirectory::new()));
        assert_eq!(registry.len(), 4);
        assert!(registry.has("register_pet"));
        assert!(registry.has("list_pets"));
        assert!(registry.has("record_consultation"));
        assert!(registry.has("record_vaccine"));
        assert!(!registry.has("web_search"));
    }

    #[test]
    fn test_build_registry_with_search() {
        let config = ToolsConfig {
            search: Some(SearchConfig {
                api_key: "brave-key".to_string(),
                max_results: 3,
            }),
        };
        let registry = build_registry(&config, Arc::new(MemoryDirectory::new()));
        assert_eq!(registry.len(), 5);
        assert!(registry.has("web_search"));
    }

    #[test]
    fn test_build_registry_empty_search_key_stays_absent() {
        let config = ToolsConfig {
            search: Some(SearchConfig {
                api_key: String::new(),
                max_results: 3,
            }),
        };
        let registry = build_registry(&config, Arc::new(MemoryDirectory::new()));
        assert!(!registry.has("web_search"));
    }
}
