//! Key-value backends for session persistence.
//!
//! The session store talks to a small TTL-aware key-value abstraction so the
//! engine never cares where records live. Two backends are provided:
//!
//! - `MemoryBackend`: in-process map with `Instant` deadlines, for tests and
//!   single-process deployments.
//! - `FileBackend`: one JSON file per key with the expiry timestamp embedded
//!   in an envelope, checked on read.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{CharlaError, Result};

/// TTL-aware key-value storage used for session records and delivery markers.
///
/// `connect`/`disconnect` are idempotent lifecycle calls; the backends here
/// are always usable, but callers hold to the lifecycle so a networked
/// implementation can be dropped in without touching the engine.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Open the backend. Calling twice is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Close the backend. Calling twice (or before connect) is a no-op.
    async fn disconnect(&self) -> Result<()>;

    /// Fetch a value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value with a fresh TTL, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Renew the TTL of an existing key. Returns `false` if the key is
    /// absent or already expired.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Check for a live (non-expired) value.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

// ============================================================================
// Memory backend
// ============================================================================

/// In-process backend: a map of value + deadline, lazily expired on read.
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    connected: AtomicBool,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    /// Number of live entries (for tests).
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|(_, dl)| *dl > now).count()
    }

    /// Check whether the backend holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, deadline)) if *deadline > now => return Ok(Some(value.clone())),
                None => return Ok(None),
                _ => {}
            }
        }
        // Expired: drop the entry so the map doesn't grow without bound.
        let mut entries = self.entries.write().await;
        if let Some((_, deadline)) = entries.get(key) {
            if *deadline <= now {
                entries.remove(key);
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some((_, deadline)) if *deadline > now => {
                *deadline = now + ttl;
                Ok(true)
            }
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// File backend
// ============================================================================

/// On-disk envelope wrapping a value with its absolute expiry time.
#[derive(Serialize, Deserialize)]
struct FileEnvelope {
    value: String,
    /// Epoch milliseconds after which the entry is dead.
    expires_at: i64,
}

/// File-per-key backend storing JSON envelopes under a directory.
///
/// Keys are percent-encoded into filenames so the mapping is bijective —
/// distinct keys can never collide on disk.
pub struct FileBackend {
    dir: PathBuf,
    connected: AtomicBool,
}

impl FileBackend {
    /// Create a file backend rooted at `dir`, creating the directory if needed.
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            connected: AtomicBool::new(false),
        })
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

/// Percent-encode a store key for use as a filename.
///
/// Characters that are problematic in filenames across platforms are
/// percent-encoded, including `%` itself, which makes the mapping reversible.
fn encode_key(key: &str) -> String {
    let mut result = String::with_capacity(key.len() * 3);
    for c in key.chars() {
        match c {
            '/' => result.push_str("%2F"),
            '\\' => result.push_str("%5C"),
            ':' => result.push_str("%3A"),
            '*' => result.push_str("%2A"),
            '?' => result.push_str("%3F"),
            '"' => result.push_str("%22"),
            '<' => result.push_str("%3C"),
            '>' => result.push_str("%3E"),
            '|' => result.push_str("%7C"),
            '%' => result.push_str("%25"),
            c => result.push(c),
        }
    }
    result
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.file_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let envelope: FileEnvelope = serde_json::from_str(&content)
            .map_err(|e| CharlaError::Store(format!("corrupt record {}: {}", key, e)))?;
        if envelope.expires_at <= Utc::now().timestamp_millis() {
            tokio::fs::remove_file(&path).await.ok();
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let envelope = FileEnvelope {
            value: value.to_string(),
            expires_at: Utc::now().timestamp_millis() + ttl.as_millis() as i64,
        };
        let content = serde_json::to_string(&envelope)?;
        tokio::fs::write(self.file_path(key), content).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.file_path(key);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self.get(key).await? {
            Some(value) => {
                self.set(key, &value, ttl).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
