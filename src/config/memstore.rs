//! Memstore tuning: buffer flushing, session maintenance timers, referrer spam
//!
//! The session idle window and salt lifetime are fixed at four hours and are
//! not configurable; only how often we check is.

use serde::Deserialize;
use std::time::Duration;

use crate::driver::DriverConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Buffer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Flush early once this many hits are buffered
    pub flush_threshold: usize,
    /// Regular flush interval
    pub persist_interval_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 1000,
            persist_interval_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileBuffer {
    pub flush_threshold: Option<usize>,
    pub persist_interval_secs: Option<u64>,
}

impl BufferConfig {
    pub fn from_file(file: Option<FileBuffer>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            flush_threshold: file.flush_threshold.unwrap_or(defaults.flush_threshold),
            persist_interval_secs: file
                .persist_interval_secs
                .unwrap_or(defaults.persist_interval_secs),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionsConfig {
    pub evict_interval_secs: u64,
    pub salt_check_interval_secs: u64,
    /// How often the session table is snapshotted to the database
    pub snapshot_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            evict_interval_secs: 60,
            salt_check_interval_secs: 60,
            snapshot_interval_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileSessions {
    pub evict_interval_secs: Option<u64>,
    pub salt_check_interval_secs: Option<u64>,
    pub snapshot_interval_secs: Option<u64>,
}

impl SessionsConfig {
    pub fn from_file(file: Option<FileSessions>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            evict_interval_secs: file
                .evict_interval_secs
                .unwrap_or(defaults.evict_interval_secs),
            salt_check_interval_secs: file
                .salt_check_interval_secs
                .unwrap_or(defaults.salt_check_interval_secs),
            snapshot_interval_secs: file
                .snapshot_interval_secs
                .unwrap_or(defaults.snapshot_interval_secs),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Referrer spam
// ─────────────────────────────────────────────────────────────────────────────

/// Hosts blocked on top of the built-in list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefspamConfig {
    pub extra_hosts: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileRefspam {
    pub extra_hosts: Option<Vec<String>>,
}

impl RefspamConfig {
    pub fn from_file(file: Option<FileRefspam>) -> Self {
        Self {
            extra_hosts: file.and_then(|f| f.extra_hosts).unwrap_or_default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver timers
// ─────────────────────────────────────────────────────────────────────────────

/// Zero would make tokio's interval panic
fn secs(n: u64) -> Duration {
    Duration::from_secs(n.max(1))
}

impl super::Config {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            persist_interval: secs(self.buffer.persist_interval_secs),
            flush_threshold: self.buffer.flush_threshold.max(1),
            evict_interval: secs(self.sessions.evict_interval_secs),
            salt_check_interval: secs(self.sessions.salt_check_interval_secs),
            snapshot_interval: secs(self.sessions.snapshot_interval_secs),
            ..DriverConfig::default()
        }
    }
}
