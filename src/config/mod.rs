//! Configuration management for Charla
//!
//! This module provides configuration loading and saving. Configuration is
//! loaded from `~/.charla/config.json` with environment variable overrides.
//! The loaded `Config` is constructed once at startup and injected into the
//! engine explicitly — there is no ambient global.

mod types;

pub use types::*;

use crate::error::Result;
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the Charla configuration directory path (~/.charla)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".charla")
    }

    /// Returns the path to the config file (~/.charla/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables override config values using the pattern
    /// `CHARLA_SECTION_KEY` (e.g. `CHARLA_AGENT_MODEL`).
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Save configuration to the default path, creating the directory if needed.
    pub fn save(&self) -> Result<()> {
        let dir = Self::dir();
        std::fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(), content)?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        // Agent
        if let Ok(val) = std::env::var("CHARLA_AGENT_MODEL") {
            self.agent.model = val;
        }
        if let Ok(val) = std::env::var("CHARLA_AGENT_MAX_TOKENS") {
            if let Ok(v) = val.parse() {
                self.agent.max_tokens = v;
            }
        }
        if let Ok(val) = std::env::var("CHARLA_AGENT_MAX_ROUNDS") {
            if let Ok(v) = val.parse() {
                self.agent.max_rounds = v;
            }
        }
        if let Ok(val) = std::env::var("CHARLA_AGENT_SYSTEM_PROMPT") {
            self.agent.system_prompt = Some(val);
        }

        // Session
        if let Ok(val) = std::env::var("CHARLA_SESSION_TTL_SECS") {
            if let Ok(v) = val.parse() {
                self.session.ttl_secs = v;
            }
        }
        if let Ok(val) = std::env::var("CHARLA_SESSION_MAX_TURNS") {
            if let Ok(v) = val.parse() {
                self.session.max_turns = v;
            }
        }
        if let Ok(val) = std::env::var("CHARLA_SESSION_STORAGE_PATH") {
            self.session.storage_path = Some(val);
        }

        // Runner
        if let Ok(val) = std::env::var("CHARLA_RUNNER_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.runner.timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("CHARLA_RUNNER_RETRIES") {
            if let Ok(v) = val.parse() {
                self.runner.retries = v;
            }
        }

        // Providers
        if let Ok(val) = std::env::var("CHARLA_PROVIDERS_ANTHROPIC_API_KEY") {
            let provider = self
                .providers
                .anthropic
                .get_or_insert_with(ProviderConfig::default);
            provider.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("CHARLA_PROVIDERS_ANTHROPIC_API_BASE") {
            let provider = self
                .providers
                .anthropic
                .get_or_insert_with(ProviderConfig::default);
            provider.api_base = Some(val);
        }

        // Tools
        if let Ok(val) = std::env::var("CHARLA_TOOLS_SEARCH_API_KEY") {
            let search = self.tools.search.get_or_insert_with(SearchConfig::default);
            search.api_key = val;
        }
    }
}
