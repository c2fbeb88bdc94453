//! Configuration type definitions for Charla
//!
//! This module defines all configuration structs used throughout the engine.
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration struct for Charla
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent loop configuration (model, rounds, prompt)
    pub agent: AgentConfig,
    /// Session store configuration (TTLs, trimming)
    pub session: SessionConfig,
    /// Tool runner configuration (timeout, retries, idempotency cache)
    pub runner: RunnerConfig,
    /// Completion provider configurations
    pub providers: ProvidersConfig,
    /// Tool availability configuration
    pub tools: ToolsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Agent loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Default model to use
    pub model: String,
    /// Maximum tokens for responses
    pub max_tokens: u32,
    /// Temperature for generation
    pub temperature: f32,
    /// Maximum model-call rounds per inbound message (the safety breaker)
    pub max_rounds: u32,
    /// Custom system prompt. `None` uses the built-in default.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            max_rounds: 3,
            system_prompt: None,
        }
    }
}

/// Session store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session record time-to-live in seconds, refreshed on every append.
    pub ttl_secs: u64,
    /// Delivery marker time-to-live in seconds (duplicate visibility window).
    pub marker_ttl_secs: u64,
    /// Number of most recent conversation turns retained after trimming.
    pub max_turns: usize,
    /// Directory for the file-backed store. `None` keeps sessions in memory.
    pub storage_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 6 * 60 * 60,
            marker_ttl_secs: 60 * 60,
            max_turns: 12,
            storage_path: None,
        }
    }
}

/// Tool runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Per-attempt execution timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after the first attempt (total attempts = retries + 1).
    pub retries: u32,
    /// Base delay between attempts in milliseconds (doubled per attempt).
    pub retry_delay_ms: u64,
    /// Maximum cached tool outcomes before oldest-first eviction.
    pub cache_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            retries: 2,
            retry_delay_ms: 1000,
            cache_capacity: 100,
        }
    }
}

/// Completion provider configurations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Anthropic provider configuration
    pub anthropic: Option<ProviderConfig>,
}

/// Configuration for a single provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key for authentication
    pub api_key: Option<String>,
    /// Custom API base URL (proxies, compatible endpoints)
    pub api_base: Option<String>,
}

/// Tool availability configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Web search configuration. Absent = the search tool is not registered.
    pub search: Option<SearchConfig>,
}

/// Web search tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search API key
    pub api_key: String,
    /// Maximum results per query
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: 5,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Default tracing pretty-print (human-readable)
    Pretty,
    /// Compact single-line text, grep-friendly
    Compact,
    /// Structured JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default level filter when `RUST_LOG` is unset
    pub level: String,
    /// Optional log file path (JSON format only)
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            level: "info".to_string(),
            file: None,
        }
    }
}
