//! History transcoding for model calls.
//!
//! Pure transformation from the stored session log to the wire payload,
//! enforcing the request contract before anything reaches a provider:
//! providers reject an entire request over one malformed message, so a
//! defective entry is dropped here with a warning instead of forwarded.
//!
//! Rules:
//! - Empty messages are dropped (logged, non-fatal).
//! - A tool-result bundle must immediately follow an assistant message whose
//!   call ids are a superset of the bundle's ids; otherwise the bundle is
//!   dropped as a protocol inconsistency.
//! - Strict role alternation: consecutive same-role messages are merged only
//!   when neither side carries tool-call or tool-result blocks; otherwise
//!   they stay distinct and the inconsistency is flagged.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::providers::{WireBlock, WireMessage, WireRole};
use crate::session::{ContentBlock, StoredMessage};

/// Transcode the session log into the ordered model-call payload.
pub fn transcode_history(messages: &[StoredMessage]) -> Vec<WireMessage> {
    let mut wire: Vec<WireMessage> = Vec::new();

    for message in messages {
        if message.is_empty_content() {
            debug!("Dropping empty message from model payload");
            continue;
        }

        let converted = match message {
            StoredMessage::User { text } => WireMessage::user_text(text),
            StoredMessage::Assistant { blocks } => {
                WireMessage::assistant(blocks.iter().map(convert_block).collect())
            }
            StoredMessage::ToolResults { blocks } => {
                if !bundle_matches_previous(&wire, message) {
                    warn!(
                        results = blocks.len(),
                        "Dropping tool-result bundle with no matching assistant tool calls"
                    );
                    continue;
                }
                WireMessage {
                    role: WireRole::User,
                    blocks: blocks
                        .iter()
                        .map(|b| WireBlock::ToolResult {
                            call_id: b.call_id.clone(),
                            content: b.content.clone(),
                            is_error: b.is_error,
                        })
                        .collect(),
                }
            }
        };

        push_with_alternation(&mut wire, converted);
    }

    wire
}

fn convert_block(block: &ContentBlock) -> WireBlock {
    match block {
        ContentBlock::Text { text } => WireBlock::Text { text: text.clone() },
        ContentBlock::ToolCall { id, name, input } => WireBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
    }
}

/// A bundle is valid only when the last kept wire message is an assistant
/// message whose tool-use ids cover every id the bundle answers.
fn bundle_matches_previous(wire: &[WireMessage], bundle: &StoredMessage) -> bool {
    let StoredMessage::ToolResults { blocks } = bundle else {
        return false;
    };
    let Some(previous) = wire.last() else {
        return false;
    };
    if previous.role != WireRole::Assistant {
        return false;
    }

    let issued: HashSet<&str> = previous
        .blocks
        .iter()
        .filter_map(|b| match b {
            WireBlock::ToolUse { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();

    !issued.is_empty() && blocks.iter().all(|b| issued.contains(b.call_id.as_str()))
}

fn push_with_alternation(wire: &mut Vec<WireMessage>, message: WireMessage) {
    if let Some(previous) = wire.last_mut() {
        if previous.role == message.role {
            if !previous.carries_tool_traffic() && !message.carries_tool_traffic() {
                previous.blocks.extend(message.blocks);
                return;
            }
            warn!(
                role = ?message.role,
                "Consecutive same-role messages with tool blocks kept distinct"
            );
        }
    }
    wire.push(message);
}
