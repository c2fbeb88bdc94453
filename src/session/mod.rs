//! Session module - durable per-identity conversation state
//!
//! This module provides session management for Charla, including:
//! - A TTL-aware key-value abstraction with memory and file backends
//! - The per-identity session record with append/trim semantics
//! - Delivery markers for duplicate inbound-message detection
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use charla::config::SessionConfig;
//! use charla::session::{MemoryBackend, SessionStore, StoredMessage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = SessionStore::new(Arc::new(MemoryBackend::new()), SessionConfig::default());
//!     store.connect().await.unwrap();
//!
//!     let session = store
//!         .append("+100", StoredMessage::user("hola"))
//!         .await
//!         .unwrap();
//!     assert_eq!(session.message_count(), 1);
//! }
//! ```

pub mod store;
mod types;

pub use store::{FileBackend, KeyValueBackend, MemoryBackend};
pub use types::{
    trim_turns, ContentBlock, Session, SessionStatus, StoredMessage, ToolResultBlock,
};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::Result;

/// Durable, TTL-bound, per-identity session store.
///
/// Wraps a [`KeyValueBackend`] and owns the session-side policy: identity
/// normalization, turn-atomic trimming, TTL refresh on append, and the
/// delivery-marker dedup records.
///
/// Failure semantics follow the conversation's needs: a failed `load`
/// degrades to "no session" so the caller proceeds as fresh, while a failed
/// `append` propagates — the conversation must never silently lose a turn.
pub struct SessionStore {
    backend: Arc<dyn KeyValueBackend>,
    config: SessionConfig,
}

impl SessionStore {
    /// Create a session store over the given backend.
    pub fn new(backend: Arc<dyn KeyValueBackend>, config: SessionConfig) -> Self {
        Self { backend, config }
    }

    /// Open the underlying backend. Idempotent.
    pub async fn connect(&self) -> Result<()> {
        self.backend.connect().await
    }

    /// Close the underlying backend. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        self.backend.disconnect().await
    }

    /// Load the session for an identity.
    ///
    /// Returns `None` when no session exists — and also when the backend
    /// fails or the record is corrupt, after logging a warning. Callers
    /// treat both the same way: start fresh.
    pub async fn load(&self, identity: &str) -> Option<Session> {
        let key = session_key(identity);
        match self.backend.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding unreadable session record");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Session load failed, proceeding without history");
                None
            }
        }
    }

    /// Append a message to an identity's session, creating it if absent.
    ///
    /// Loads (or creates) the record, appends, trims to the configured turn
    /// budget, and persists with a refreshed TTL. Persistence failures
    /// propagate to the caller.
    pub async fn append(&self, identity: &str, message: StoredMessage) -> Result<Session> {
        let key = session_key(identity);
        let mut session = self.load(identity).await.unwrap_or_default();

        session.push(message);
        session.messages = trim_turns(std::mem::take(&mut session.messages), self.config.max_turns);

        let raw = serde_json::to_string(&session)?;
        self.backend
            .set(&key, &raw, Duration::from_secs(self.config.ttl_secs))
            .await?;
        debug!(key = %key, messages = session.message_count(), "Session persisted");
        Ok(session)
    }

    /// Hard-delete an identity's session.
    pub async fn end(&self, identity: &str) -> Result<()> {
        let key = session_key(identity);
        self.backend.delete(&key).await?;
        debug!(key = %key, "Session ended");
        Ok(())
    }

    /// Renew the session TTL without mutating the record.
    ///
    /// Returns `true` if a live session existed to renew.
    pub async fn touch(&self, identity: &str) -> Result<bool> {
        self.backend
            .expire(
                &session_key(identity),
                Duration::from_secs(self.config.ttl_secs),
            )
            .await
    }

    /// Check whether an inbound message id has already been seen.
    ///
    /// A failed check reads as "not seen": losing dedup for one message is
    /// preferable to dropping it.
    pub async fn is_seen(&self, message_id: &str) -> bool {
        match self.backend.exists(&marker_key(message_id)).await {
            Ok(seen) => seen,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Delivery marker check failed");
                false
            }
        }
    }

    /// Record an inbound message id as seen for the marker TTL window.
    pub async fn mark_seen(&self, message_id: &str) -> Result<()> {
        self.backend
            .set(
                &marker_key(message_id),
                "1",
                Duration::from_secs(self.config.marker_ttl_secs),
            )
            .await
    }
}

impl Clone for SessionStore {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

/// Canonical store key for an identity.
///
/// Normalization is deterministic: whitespace and common separator
/// punctuation are stripped, letters are lowercased, and a leading `+` is
/// kept so phone-style identities stay distinguishable.
pub fn session_key(identity: &str) -> String {
    format!("session:{}", normalize_identity(identity))
}

fn marker_key(message_id: &str) -> String {
    format!("seen:{}", message_id)
}

/// Normalize an identity string into its canonical form.
pub fn normalize_identity(identity: &str) -> String {
    let trimmed = identity.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        if c == '+' && i == 0 {
            out.push(c);
        } else if c.is_alphanumeric() || c == '@' || c == '.' {
            out.extend(c.to_lowercase());
        }
        // Spaces, dashes, parentheses and other separators are dropped.
    }
    out
}
