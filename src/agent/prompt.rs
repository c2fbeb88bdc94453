//! System prompt assembly for the agent loop.

use crate::config::AgentConfig;

/// Default system prompt for the clinic assistant.
const DEFAULT_SYSTEM_PROMPT: &str = r#"You are Charla, the virtual assistant of a veterinary clinic.

You help clients over chat: answer questions, register their pets, and record
consultations and vaccine applications using the tools available to you.

Be warm and concise. Reply in the language the client writes in. Never invent
clinical information — when unsure, say so and suggest contacting the clinic."#;

/// Builds the policy-defined system prompt for each model call.
///
/// The base prompt comes from configuration (or the built-in default) and
/// optional context lines are appended under a short section.
pub struct PromptBuilder {
    base: String,
    context_lines: Vec<String>,
}

impl PromptBuilder {
    /// Create a builder with the built-in default prompt.
    pub fn new() -> Self {
        Self {
            base: DEFAULT_SYSTEM_PROMPT.to_string(),
            context_lines: Vec::new(),
        }
    }

    /// Create a builder from agent configuration, honoring its override.
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut builder = Self::new();
        if let Some(prompt) = &config.system_prompt {
            builder.base = prompt.clone();
        }
        builder
    }

    /// Replace the base prompt.
    pub fn with_base(mut self, base: &str) -> Self {
        self.base = base.to_string();
        self
    }

    /// Append a context line (tool names, current date, clinic hours).
    pub fn with_context_line(mut self, line: &str) -> Self {
        self.context_lines.push(line.to_string());
        self
    }

    /// Render the final system prompt.
    pub fn build(&self) -> String {
        if self.context_lines.is_empty() {
            return self.base.clone();
        }
        let mut prompt = self.base.clone();
        prompt.push_str("\n\n## Context\n");
        for line in &self.context_lines {
            prompt.push_str("\n- ");
            prompt.push_str(line);
        }
        prompt
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}
