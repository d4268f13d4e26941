//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;

/// TOML basic string with quotes and backslashes escaped
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

impl Config {
    /// Serialize full config to TOML format
    pub fn to_toml(&self) -> String {
        let extra_hosts: Vec<String> = self.refspam.extra_hosts.iter().map(|h| quoted(h)).collect();

        format!(
            r#"# hitkeeper configuration

# SQLite database for hits, sites and stored sessions
db_path = {db_path}

# Hand out sequential session IDs (test fixtures only)
deterministic_sessions = {deterministic}

# Hit buffer
[buffer]
# Flush as soon as this many hits are waiting
flush_threshold = {flush_threshold}
persist_interval_secs = {persist_interval}

# Session maintenance (sessions idle for 4 hours are evicted; the salt
# rotates every 4 hours; these only control how often that is checked)
[sessions]
evict_interval_secs = {evict_interval}
salt_check_interval_secs = {salt_interval}
snapshot_interval_secs = {snapshot_interval}

# Referrer spam hosts, in addition to the built-in list.
# Subdomains of a listed host are blocked too.
[refspam]
extra_hosts = [{extra_hosts}]

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = {log_level}
# JSON file logging in addition to stdout
file_enabled = {log_file_enabled}
file_dir = {log_file_dir}
file_rotation = "{log_file_rotation}"  # hourly, daily, never
file_prefix = {log_file_prefix}
"#,
            db_path = quoted(&self.db_path.display().to_string()),
            deterministic = self.deterministic_sessions,
            flush_threshold = self.buffer.flush_threshold,
            persist_interval = self.buffer.persist_interval_secs,
            evict_interval = self.sessions.evict_interval_secs,
            salt_interval = self.sessions.salt_check_interval_secs,
            snapshot_interval = self.sessions.snapshot_interval_secs,
            extra_hosts = extra_hosts.join(", "),
            log_level = quoted(&self.logging.level),
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = quoted(&self.logging.file_dir.display().to_string()),
            log_file_rotation = self.logging.file_rotation.as_str(),
            log_file_prefix = quoted(&self.logging.file_prefix),
        )
    }
}
