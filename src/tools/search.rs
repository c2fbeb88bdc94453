//! Web search tool.
//!
//! Backed by the Brave Search API. Conditionally present: the tool is only
//! registered when a search API key is configured, so an unconfigured
//! deployment simply never declares the capability to the model.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;

use super::{Tool, ToolContext, ToolOutcome, ToolPolicy};

const BRAVE_API_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const MAX_SEARCH_COUNT: usize = 10;

/// Web search tool backed by Brave Search.
pub struct WebSearchTool {
    api_key: String,
    client: Client,
    max_results: usize,
}

impl WebSearchTool {
    /// Create a new web search tool.
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: Client::new(),
            max_results: 5,
        }
    }

    /// Create a web search tool with a custom default result count.
    pub fn with_max_results(api_key: &str, max_results: usize) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: Client::new(),
            max_results: max_results.clamp(1, MAX_SEARCH_COUNT),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return result titles, URLs, and snippets."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results (1-10)",
                    "minimum": 1,
                    "maximum": 10
                }
            },
            "required": ["query"]
        })
    }

    fn validate(&self, args: &Value) -> std::result::Result<(), String> {
        match args.get("query").and_then(|v| v.as_str()).map(str::trim) {
            Some(q) if !q.is_empty() => Ok(()),
            _ => Err("missing required field 'query'".to_string()),
        }
    }

    fn policy(&self) -> ToolPolicy {
        // Search latency is the user's wait; keep the race short.
        ToolPolicy::new().with_timeout(Duration::from_secs(8))
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default();

        let count = args
            .get("count")
            .and_then(|v| v.as_u64())
            .map(|c| c as usize)
            .unwrap_or(self.max_results)
            .clamp(1, MAX_SEARCH_COUNT);

        let count_param = count.to_string();
        let response = self
            .client
            .get(BRAVE_API_URL)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", count_param.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Ok(ToolOutcome::failure(format!(
                "search API returned {}: {}",
                status, body
            )));
        }

        let parsed: BraveResponse = response.json().await?;
        let results: Vec<Value> = parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .take(count)
            .map(|r| {
                json!({
                    "title": r.title,
                    "url": r.url,
                    "snippet": r.description.unwrap_or_default()
                })
            })
            .collect();

        Ok(ToolOutcome::success(json!({ "results": results })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata() {
        let tool = WebSearchTool::new("key");
        assert_eq!(tool.name(), "web_search");
        assert_eq!(tool.parameters()["required"][0], "query");
    }

    #[test]
    fn test_validate_query() {
        let tool = WebSearchTool::new("key");
        assert!(tool.validate(&json!({"query": "vaccines"})).is_ok());
        assert!(tool.validate(&json!({"query": "  "})).is_err());
        assert!(tool.validate(&json!({})).is_err());
    }

    #[test]
    fn test_max_results_clamped() {
        let tool = WebSearchTool::with_max_results("key", 50);
        assert_eq!(tool.max_results, MAX_SEARCH_COUNT);
        let tool = WebSearchTool::with_max_results("key", 0);
        assert_eq!(tool.max_results, 1);
    }

    #[test]
    fn test_policy_shortens_timeout() {
        let tool = WebSearchTool::new("key");
        assert_eq!(tool.policy().timeout, Some(Duration::from_secs(8)));
    }

    #[test]
    fn test_brave_response_parsing() {
        let raw = r#"{"web": {"results": [{"title": "t", "url": "https://x", "description": "d"}]}}"#;
        let parsed: BraveResponse = serde_json::from_str(raw).unwrap();
        let results = parsed.web.unwrap().results;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "t");
    }

    #[test]
    fn test_brave_response_empty() {
        let parsed: BraveResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.web.is_none());
    }
}
