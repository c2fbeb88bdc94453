//! Session types for Charla
//!
//! This module defines the core types for conversation state: the persisted
//! session record, the tagged message variants, assistant content blocks,
//! tool-result bundles, and the turn-atomic trimming function.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is live and accepting appends
    Active,
}

/// A conversation session: the persisted per-identity record.
///
/// One session exists per identity. It is created on the first inbound
/// message, mutated only by appends, and deleted on termination or TTL
/// expiry. `updated_at` is stored as epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Lifecycle status
    pub status: SessionStatus,
    /// Ordered, append-only message log
    pub messages: Vec<StoredMessage>,
    /// When this session was last modified (epoch milliseconds on the wire)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty active session.
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Active,
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Append a message and refresh the `updated_at` timestamp.
    pub fn push(&mut self, message: StoredMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Get the number of messages in this session.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Check if this session has no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Get the last message, if any.
    pub fn last_message(&self) -> Option<&StoredMessage> {
        self.messages.last()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// A single entry in the session log.
///
/// Tagged variant: a user message carries plain text, an assistant message
/// carries ordered content blocks (text and/or tool calls), and a
/// tool-result bundle carries one result block per tool call issued by the
/// immediately preceding assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredMessage {
    /// Inbound user message
    User {
        /// The message text
        text: String,
    },
    /// Model-produced message
    Assistant {
        /// Ordered content blocks (text and/or tool calls)
        blocks: Vec<ContentBlock>,
    },
    /// Results for the tool calls of the preceding assistant message
    ToolResults {
        /// One result block per call id
        blocks: Vec<ToolResultBlock>,
    },
}

impl StoredMessage {
    /// Create a user message.
    pub fn user(text: &str) -> Self {
        Self::User {
            text: text.to_string(),
        }
    }

    /// Create a text-only assistant message.
    pub fn assistant_text(text: &str) -> Self {
        Self::Assistant {
            blocks: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        }
    }

    /// Create an assistant message from content blocks.
    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self::Assistant { blocks }
    }

    /// Create a tool-result bundle.
    pub fn tool_results(blocks: Vec<ToolResultBlock>) -> Self {
        Self::ToolResults { blocks }
    }

    /// Check whether this is a user message.
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    /// Check whether this is a tool-result bundle.
    pub fn is_tool_results(&self) -> bool {
        matches!(self, Self::ToolResults { .. })
    }

    /// Ids of the tool calls carried by this message (empty for non-assistant
    /// messages and for text-only assistant messages).
    pub fn tool_call_ids(&self) -> Vec<&str> {
        match self {
            Self::Assistant { blocks } => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolCall { id, .. } => Some(id.as_str()),
                    ContentBlock::Text { .. } => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Check whether this message carries at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_call_ids().is_empty()
    }

    /// Check whether this message has no meaningful content: empty or
    /// whitespace-only user text, an assistant message with no blocks (or
    /// only empty text blocks), or a bundle with no result blocks.
    pub fn is_empty_content(&self) -> bool {
        match self {
            Self::User { text } => text.trim().is_empty(),
            Self::Assistant { blocks } => blocks.iter().all(|b| match b {
                ContentBlock::Text { text } => text.trim().is_empty(),
                ContentBlock::ToolCall { .. } => false,
            }),
            Self::ToolResults { blocks } => blocks.is_empty(),
        }
    }
}

/// One content block of an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Natural-language text
    Text {
        /// The text content
        text: String,
    },
    /// A model-requested tool invocation
    ToolCall {
        /// Unique call id issued by the model
        id: String,
        /// Name of the requested capability
        name: String,
        /// Structured input for the tool
        input: Value,
    },
}

/// One entry of a tool-result bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    /// Id of the tool call this result answers
    pub call_id: String,
    /// Serialized result content handed back to the model
    pub content: String,
    /// Whether the result represents an error condition
    pub is_error: bool,
}

impl ToolResultBlock {
    /// Create a success result block.
    pub fn ok(call_id: &str, content: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            content: content.to_string(),
            is_error: false,
        }
    }

    /// Create an error result block.
    pub fn error(call_id: &str, content: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            content: content.to_string(),
            is_error: true,
        }
    }
}

/// Trim a message log to the last `max_turns` conversation turns.
///
/// A turn begins at a user message and includes everything generated before
/// the next user message. Any prefix before the first user message (possible
/// after a previous trim interacted with a crashed append) counts as the
/// oldest segment and is discarded first. Old turns are discarded wholesale —
/// trimming is lossy but never partial.
pub fn trim_turns(messages: Vec<StoredMessage>, max_turns: usize) -> Vec<StoredMessage> {
    if max_turns == 0 {
        return Vec::new();
    }

    // Index of each turn start (user message positions).
    let starts: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_user())
        .map(|(i, _)| i)
        .collect();

    if starts.len() <= max_turns {
        // Within budget. Still drop an orphan prefix when the log holds
        // a full complement of turns plus leading non-user messages.
        if starts.len() == max_turns {
            if let Some(&first) = starts.first() {
                if first > 0 {
                    return messages.into_iter().skip(first).collect();
                }
            }
        }
        return messages;
    }

    let cut = starts[starts.len() - max_turns];
    messages.into_iter().skip(cut).collect()
}
