//! Agent module - the orchestrating state machine
//!
//! This module is the core of Charla. For each inbound message the engine:
//!
//! - short-circuits duplicate deliveries via the store's delivery markers
//! - closes the session on termination keywords without a model call
//! - appends the user message, then alternates model calls with tool
//!   execution until a text-only reply or the round budget is reached
//! - converts any residual fault into a user-facing apology
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐     ┌──────────┐     ┌────────────────────┐
//! │ Transport │────>│  Engine  │────>│ CompletionProvider │
//! └───────────┘     └──────────┘     └────────────────────┘
//!                        │                      │
//!                        ▼                      ▼
//!                 ┌──────────────┐     ┌────────────────┐
//!                 │ SessionStore │     │ Registry/Runner│
//!                 └──────────────┘     └────────────────┘
//! ```

mod r#loop;
mod prompt;
pub mod transcode;

pub use prompt::PromptBuilder;
pub use r#loop::{
    Engine, InboundMessage, REPLY_APOLOGY, REPLY_CLARIFY, REPLY_DUPLICATE, REPLY_EMPTY,
    REPLY_FAREWELL,
};
pub use transcode::transcode_history;
