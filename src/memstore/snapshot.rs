//! Session table snapshot
//!
//! The whole table, salts included, is written as one JSON blob under the
//! `session` key so a restart doesn't split every live visit in two. Encoding
//! borrows straight from the locked table; decoding produces an owned copy
//! that is then merged in.

use super::sessions::{Fingerprint, SessionId, SessionTable};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Key the snapshot is stored under
pub const SNAPSHOT_KEY: &str = "session";

#[derive(Serialize)]
struct SnapshotRef<'a> {
    sessions: &'a HashMap<Fingerprint, SessionId>,
    hashes: &'a HashMap<SessionId, Fingerprint>,
    paths: &'a HashMap<SessionId, HashSet<String>>,
    seen: &'a HashMap<SessionId, i64>,
    #[serde(with = "b64")]
    cur_salt: &'a [u8],
    #[serde(with = "b64")]
    prev_salt: &'a [u8],
    salt_rotated: DateTime<Utc>,
}

/// Decoded snapshot
#[derive(Debug, Default, Deserialize)]
pub struct StoredSessions {
    #[serde(default)]
    pub sessions: HashMap<Fingerprint, SessionId>,
    #[serde(default)]
    pub hashes: HashMap<SessionId, Fingerprint>,
    #[serde(default)]
    pub paths: HashMap<SessionId, HashSet<String>>,
    #[serde(default)]
    pub seen: HashMap<SessionId, i64>,
    #[serde(default, with = "b64")]
    pub cur_salt: Vec<u8>,
    #[serde(default, with = "b64")]
    pub prev_salt: Vec<u8>,
    #[serde(default)]
    pub salt_rotated: Option<DateTime<Utc>>,
}

pub fn encode(table: &SessionTable) -> Result<Vec<u8>> {
    let snap = SnapshotRef {
        sessions: &table.sessions,
        hashes: &table.hashes,
        paths: &table.paths,
        seen: &table.seen,
        cur_salt: &table.salts.current,
        prev_salt: &table.salts.previous,
        salt_rotated: table.salts.rotated_at,
    };
    Ok(serde_json::to_vec(&snap)?)
}

pub fn decode(bytes: &[u8]) -> Result<StoredSessions> {
    Ok(serde_json::from_slice(bytes)?)
}

impl StoredSessions {
    /// Merge into `table`, replacing only what the snapshot actually carries.
    ///
    /// Inconsistent entries are dropped afterwards. Returns the number of
    /// sessions live after the merge.
    pub fn apply(self, table: &mut SessionTable) -> usize {
        if !self.sessions.is_empty() {
            table.sessions = self.sessions;
        }
        if !self.hashes.is_empty() {
            table.hashes = self.hashes;
        }
        if !self.paths.is_empty() {
            table.paths = self.paths;
        }
        if !self.seen.is_empty() {
            table.seen = self.seen;
        }
        if !self.cur_salt.is_empty() {
            table.salts.current = self.cur_salt;
        }
        if !self.prev_salt.is_empty() {
            table.salts.previous = self.prev_salt;
        }
        if let Some(rotated_at) = self.salt_rotated {
            table.salts.rotated_at = rotated_at;
        }

        let dropped = table.retain_consistent();
        if dropped > 0 {
            tracing::warn!(dropped, "Dropped inconsistent sessions from snapshot");
        }
        table.len()
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]> + ?Sized,
    {
        s.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_round_trip_preserves_table() {
        let mut table = SessionTable::new(t0(), true);
        let (a, _) = table.resolve(t0(), 1, "", "/a", "ua", "10.0.0.1");
        table.resolve(t0(), 1, "", "/b", "ua", "10.0.0.1");
        let (b, _) = table.resolve(t0(), 2, "tok", "/", "", "");

        let bytes = encode(&table).unwrap();
        let mut restored = SessionTable::new(t0(), true);
        assert_eq!(decode(&bytes).unwrap().apply(&mut restored), 2);

        assert_eq!(restored.sessions, table.sessions);
        assert_eq!(restored.hashes, table.hashes);
        assert_eq!(restored.paths, table.paths);
        assert_eq!(restored.seen, table.seen);
        assert_eq!(restored.salts, table.salts);
        assert!(restored.paths[&a].contains("/b"));
        assert_eq!(restored.seen[&b], t0().timestamp());
    }

    #[test]
    fn test_restored_table_recognizes_visitor() {
        let mut table = SessionTable::new(t0(), true);
        let (a, _) = table.resolve(t0(), 1, "", "/a", "ua", "10.0.0.1");

        let bytes = encode(&table).unwrap();
        let mut restored = SessionTable::new(t0(), true);
        decode(&bytes).unwrap().apply(&mut restored);

        let (again, first) = restored.resolve(t0(), 1, "", "/a", "ua", "10.0.0.1");
        assert_eq!(again, a);
        assert!(!first);
    }

    #[test]
    fn test_empty_snapshot_keeps_fresh_salts() {
        let mut table = SessionTable::new(t0(), true);
        let salts = table.salts.clone();
        assert_eq!(decode(b"{}").unwrap().apply(&mut table), 0);
        assert_eq!(table.salts, salts);
    }

    #[test]
    fn test_salts_restored_independently() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;

        let mut table = SessionTable::new(t0(), true);
        let previous = table.salts.previous.clone();
        let json = format!(r#"{{"cur_salt": "{}"}}"#, STANDARD.encode([7u8; 32]));

        decode(json.as_bytes()).unwrap().apply(&mut table);
        assert_eq!(table.salts.current, vec![7u8; 32]);
        assert_eq!(table.salts.previous, previous);
        assert_eq!(table.salts.rotated_at, t0());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"cur_salt": "***"}"#).is_err());
    }
}
