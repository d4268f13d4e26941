//! Configuration tests
//!
//! `to_toml()` writes the template users edit, so everything it emits has to
//! parse back into `FileConfig` and come out unchanged.

use super::*;
use std::collections::HashMap;

fn no_env(_: &str) -> Option<String> {
    None
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

fn round_trip(config: &Config) -> Config {
    let toml_str = config.to_toml();
    let parsed: Result<FileConfig, _> = toml::from_str(&toml_str);
    assert!(
        parsed.is_ok(),
        "Config should round-trip.\nTOML:\n{}\nError: {:?}",
        toml_str,
        parsed.err()
    );
    Config::from_sources(parsed.unwrap(), no_env)
}

// ─────────────────────────────────────────────────────────────────────────────
// Round-trip tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_roundtrip_default() {
    let config = Config::default();
    assert_eq!(round_trip(&config), config);
}

#[test]
fn test_config_roundtrip_customized() {
    let mut config = Config::default();
    config.db_path = PathBuf::from("/var/lib/hitkeeper/hits.db");
    config.deterministic_sessions = true;
    config.buffer.flush_threshold = 50;
    config.buffer.persist_interval_secs = 3;
    config.sessions.evict_interval_secs = 120;
    config.sessions.salt_check_interval_secs = 30;
    config.sessions.snapshot_interval_secs = 900;
    config.refspam.extra_hosts = vec!["spam.example".into(), "bad \"quoted\".example".into()];
    config.logging.level = "debug".into();
    config.logging.file_enabled = true;
    config.logging.file_rotation = LogRotation::Hourly;
    config.logging.file_prefix = "hk".into();

    assert_eq!(round_trip(&config), config);
}

// ─────────────────────────────────────────────────────────────────────────────
// Precedence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_empty_file_gives_defaults() {
    let file: FileConfig = toml::from_str("").unwrap();
    assert_eq!(Config::from_sources(file, no_env), Config::default());
}

#[test]
fn test_partial_sections_keep_defaults() {
    let file: FileConfig = toml::from_str(
        r#"
[buffer]
flush_threshold = 5

[logging]
file_rotation = "weekly"
"#,
    )
    .unwrap();
    let config = Config::from_sources(file, no_env);

    assert_eq!(config.buffer.flush_threshold, 5);
    assert_eq!(
        config.buffer.persist_interval_secs,
        BufferConfig::default().persist_interval_secs
    );
    // Unknown rotation falls back to daily
    assert_eq!(config.logging.file_rotation, LogRotation::Daily);
    assert_eq!(config.sessions, SessionsConfig::default());
}

#[test]
fn test_env_overrides_file() {
    let file: FileConfig = toml::from_str(
        r#"
db_path = "/from/file.db"
deterministic_sessions = true

[buffer]
flush_threshold = 5
"#,
    )
    .unwrap();
    let env = env_from(&[
        ("HITKEEPER_DB", "/from/env.db"),
        ("HITKEEPER_DETERMINISTIC_SESSIONS", "false"),
        ("HITKEEPER_FLUSH_THRESHOLD", "77"),
        ("HITKEEPER_DEMO", "1"),
    ]);
    let config = Config::from_sources(file, env);

    assert_eq!(config.db_path, PathBuf::from("/from/env.db"));
    assert!(!config.deterministic_sessions);
    assert_eq!(config.buffer.flush_threshold, 77);
    assert!(config.demo_mode);
}

#[test]
fn test_unparseable_env_is_ignored() {
    let file: FileConfig = toml::from_str("[buffer]\nflush_threshold = 5\n").unwrap();
    let config = Config::from_sources(file, env_from(&[("HITKEEPER_FLUSH_THRESHOLD", "lots")]));
    assert_eq!(config.buffer.flush_threshold, 5);
}

#[test]
fn test_load_file_config() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.toml");
    assert!(Config::load_file_config(&missing).unwrap().db_path.is_none());

    let broken = dir.path().join("broken.toml");
    std::fs::write(&broken, "db_path = [unclosed").unwrap();
    let err = Config::load_file_config(&broken).unwrap_err();
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn test_driver_config_never_zero() {
    let mut config = Config::default();
    config.buffer.persist_interval_secs = 0;
    config.buffer.flush_threshold = 0;

    let driver = config.driver_config();
    assert_eq!(driver.persist_interval, std::time::Duration::from_secs(1));
    assert_eq!(driver.flush_threshold, 1);
    assert_eq!(driver.snapshot_interval, std::time::Duration::from_secs(300));
}
