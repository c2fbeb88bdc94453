//! Logging initialization for Charla.
//!
//! Supports three formats:
//! - `pretty`: default tracing pretty-print (human-readable)
//! - `compact`: single-line text, grep-friendly
//! - `json`: structured JSON lines for log aggregators

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the global tracing subscriber from config.
///
/// Call this once at startup before any tracing events are emitted.
/// Falls back to the `RUST_LOG` env var; if unset, uses `cfg.level`.
pub fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    match cfg.format {
        LogFormat::Json => {
            if let Some(path) = &cfg.file {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .expect("failed to open log file");
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(move || file.try_clone().expect("file writer"))
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .init();
            }
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .compact()
                .init();
        }
    }
}
