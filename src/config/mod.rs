//! Configuration for the hit store
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/hitkeeper/config.toml)
//! 3. Built-in defaults (lowest priority)

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod memstore;
mod observability;
mod serialization;

#[cfg(test)]
mod tests;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use memstore::{
    BufferConfig, FileBuffer, FileRefspam, FileSessions, RefspamConfig, SessionsConfig,
};
pub use observability::{FileLogging, LogRotation, LoggingConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_DB_PATH: &str = "./data/hitkeeper.db";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite database holding hits, sites and the key-value store
    pub db_path: PathBuf,

    /// Demo mode: register a demo site and generate synthetic pageviews
    pub demo_mode: bool,

    /// Sequential session IDs starting after TEST_SESSION, for fixtures
    pub deterministic_sessions: bool,

    pub buffer: BufferConfig,
    pub sessions: SessionsConfig,
    pub refspam: RefspamConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            demo_mode: false,
            deterministic_sessions: false,
            buffer: BufferConfig::default(),
            sessions: SessionsConfig::default(),
            refspam: RefspamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub db_path: Option<String>,
    pub deterministic_sessions: Option<bool>,

    /// Optional [buffer] section
    pub buffer: Option<FileBuffer>,

    /// Optional [sessions] section
    pub sessions: Option<FileSessions>,

    /// Optional [refspam] section
    pub refspam: Option<FileRefspam>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

fn truthy(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

impl Config {
    /// Get the config file path: ~/.config/hitkeeper/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("hitkeeper").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };
        if path.exists() {
            return;
        }
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Config is optional
            }
        }
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Parse a config file; a missing file means defaults.
    ///
    /// A file that exists but doesn't parse is an error: a broken config
    /// should fail loudly, not silently fall back to defaults.
    pub(crate) fn load_file_config(path: &Path) -> anyhow::Result<FileConfig> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(e).with_context(|| format!("Cannot read {}", path.display())),
        }
    }

    /// Load configuration: env vars > file > defaults
    pub fn load() -> anyhow::Result<Self> {
        let file = match Self::config_path() {
            Some(path) => Self::load_file_config(&path)?,
            None => FileConfig::default(),
        };
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    /// Merge a parsed file with an environment lookup
    pub(crate) fn from_sources<F>(file: FileConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Database path: env > file > default
        let db_path = env("HITKEEPER_DB")
            .or(file.db_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        // Demo mode: env only (runtime flag)
        let demo_mode = env("HITKEEPER_DEMO").is_some_and(|v| truthy(&v));

        let deterministic_sessions = env("HITKEEPER_DETERMINISTIC_SESSIONS")
            .map(|v| truthy(&v))
            .or(file.deterministic_sessions)
            .unwrap_or(false);

        let mut buffer = BufferConfig::from_file(file.buffer);
        if let Some(n) = env("HITKEEPER_FLUSH_THRESHOLD").and_then(|v| v.parse().ok()) {
            buffer.flush_threshold = n;
        }

        Self {
            db_path,
            demo_mode,
            deterministic_sessions,
            buffer,
            sessions: SessionsConfig::from_file(file.sessions),
            refspam: RefspamConfig::from_file(file.refspam),
            logging: LoggingConfig::from_file(file.logging),
        }
    }
}
