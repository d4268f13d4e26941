// Session table and resolver
//
// Visitors are never identified directly. A fingerprint is the SHA-256 of
// (salt, user agent, remote address, site ID), or a client-supplied token used
// verbatim. The table maps fingerprints to random session IDs and keeps
// per-session state:
//
// - sessions: fingerprint → session ID
// - hashes:   session ID → fingerprint (inverse, needed for eviction)
// - paths:    session ID → paths visited in this session
// - seen:     session ID → last-seen Unix timestamp
//
// Invariant: hashes[sessions[h]] == h for every live h, and an ID is either in
// all four maps or in none. Every mutation below goes through `&mut self`,
// which the memstore only hands out under its session lock.

use super::salt::{fill_random, Salts};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Seconds without a pageview after which a session is evicted
pub const SESSION_IDLE_SECS: i64 = 4 * 60 * 60;

/// Base of the deterministic ID sequence (00112233-4455-6677-8899-aabbccddeeff)
pub const TEST_SESSION: u128 = 0x0011_2233_4455_6677_8899_aabb_ccdd_eeff;

/// 128-bit session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Random v4 UUID from the OS CSPRNG
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        fill_random(&mut bytes);
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    pub const fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque session lookup key
///
/// Serialized as base64 since it's raw digest bytes (or an arbitrary token).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn compute(salt: &[u8], user_agent: &str, remote_addr: &str, site: i64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(user_agent.as_bytes());
        hasher.update(remote_addr.as_bytes());
        hasher.update(site.to_string().as_bytes());
        Self(hasher.finalize().to_vec())
    }

    /// Client-supplied session token, used as-is
    pub fn token(token: &str) -> Self {
        Self(token.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", STANDARD.encode(&self.0))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD
            .decode(s.as_bytes())
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// Where new session IDs come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdSource {
    Random,
    /// Reproducible IDs for test fixtures; holds the last ID handed out
    Sequential(u128),
}

#[derive(Debug)]
pub struct SessionTable {
    pub(crate) sessions: HashMap<Fingerprint, SessionId>,
    pub(crate) hashes: HashMap<SessionId, Fingerprint>,
    pub(crate) paths: HashMap<SessionId, HashSet<String>>,
    pub(crate) seen: HashMap<SessionId, i64>,
    pub(crate) salts: Salts,
    ids: IdSource,
}

impl SessionTable {
    pub fn new(now: DateTime<Utc>, deterministic_ids: bool) -> Self {
        Self {
            sessions: HashMap::new(),
            hashes: HashMap::new(),
            paths: HashMap::new(),
            seen: HashMap::new(),
            salts: Salts::fresh(now),
            ids: if deterministic_ids {
                IdSource::Sequential(TEST_SESSION)
            } else {
                IdSource::Random
            },
        }
    }

    /// Drop every session, draw new salts, restart the ID sequence
    pub fn reset(&mut self, now: DateTime<Utc>) {
        let deterministic = matches!(self.ids, IdSource::Sequential(_));
        *self = Self::new(now, deterministic);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Next ID not already owned by a live session. Restored snapshots may
    /// hold IDs the sequence would otherwise hand out again.
    fn mint_id(&mut self) -> SessionId {
        loop {
            let id = match &mut self.ids {
                IdSource::Random => SessionId::random(),
                IdSource::Sequential(last) => {
                    *last = last.wrapping_add(1);
                    SessionId::from_u128(*last)
                }
            };
            if !self.hashes.contains_key(&id) {
                return id;
            }
        }
    }

    /// Find or create the session for a pageview.
    ///
    /// Returns the session ID and whether this is the first time the session
    /// has visited `path`.
    pub fn resolve(
        &mut self,
        now: DateTime<Utc>,
        site: i64,
        user_session_id: &str,
        path: &str,
        user_agent: &str,
        remote_addr: &str,
    ) -> (SessionId, bool) {
        let external = !user_session_id.is_empty();
        let hash = if external {
            Fingerprint::token(user_session_id)
        } else {
            Fingerprint::compute(&self.salts.current, user_agent, remote_addr, site)
        };

        let mut found = self.sessions.get(&hash).copied();
        if found.is_none() && !external {
            // Visitor may have been fingerprinted just before the last rotation
            let prev = Fingerprint::compute(&self.salts.previous, user_agent, remote_addr, site);
            found = self.sessions.get(&prev).copied();
        }

        let ts = now.timestamp();
        if let Some(id) = found {
            self.seen.insert(id, ts);
            let first_visit = self.paths.entry(id).or_default().insert(path.to_string());
            return (id, first_visit);
        }

        let id = self.mint_id();
        self.sessions.insert(hash.clone(), id);
        self.hashes.insert(id, hash);
        self.paths.insert(id, HashSet::from([path.to_string()]));
        self.seen.insert(id, ts);
        (id, true)
    }

    /// Remove every session idle for longer than `SESSION_IDLE_SECS`.
    ///
    /// A session last seen exactly at the cutoff is kept. Returns the number
    /// of sessions removed.
    pub fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now.timestamp() - SESSION_IDLE_SECS;
        let sessions = &mut self.sessions;
        let hashes = &mut self.hashes;
        let paths = &mut self.paths;

        let before = self.seen.len();
        self.seen.retain(|id, seen| {
            if *seen >= cutoff {
                return true;
            }
            if let Some(hash) = hashes.remove(id) {
                sessions.remove(&hash);
            }
            paths.remove(id);
            false
        });
        before - self.seen.len()
    }

    /// Drop any session that isn't present, and mutually consistent, in all
    /// four maps. Returns how many IDs were dropped.
    pub(crate) fn retain_consistent(&mut self) -> usize {
        let valid: HashSet<SessionId> = self
            .hashes
            .iter()
            .filter(|(id, hash)| {
                self.sessions.get(*hash) == Some(*id)
                    && self.seen.contains_key(*id)
                    && self.paths.contains_key(*id)
            })
            .map(|(id, _)| *id)
            .collect();

        let before = self
            .hashes
            .len()
            .max(self.sessions.len())
            .max(self.seen.len())
            .max(self.paths.len());

        self.sessions.retain(|_, id| valid.contains(id));
        self.hashes.retain(|id, _| valid.contains(id));
        self.paths.retain(|id, _| valid.contains(id));
        self.seen.retain(|id, _| valid.contains(id));

        before - valid.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0";
    const ADDR: &str = "203.0.113.7";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn table() -> SessionTable {
        SessionTable::new(t0(), true)
    }

    fn assert_consistent(t: &SessionTable) {
        assert_eq!(t.sessions.len(), t.hashes.len());
        assert_eq!(t.hashes.len(), t.paths.len());
        assert_eq!(t.paths.len(), t.seen.len());
        for (hash, id) in &t.sessions {
            assert_eq!(t.hashes.get(id), Some(hash));
        }
    }

    #[test]
    fn test_same_fingerprint_same_path() {
        let mut t = table();
        let (a, first_a) = t.resolve(t0(), 1, "", "/a", UA, ADDR);
        let (b, first_b) = t.resolve(t0(), 1, "", "/a", UA, ADDR);

        assert_eq!(a, b);
        assert!(first_a);
        assert!(!first_b);
        assert_consistent(&t);
    }

    #[test]
    fn test_sequence_skips_live_ids() {
        let mut t = table();
        let (a, _) = t.resolve(t0(), 1, "", "/", UA, ADDR);
        t.ids = IdSource::Sequential(TEST_SESSION);

        let (b, _) = t.resolve(t0(), 1, "", "/", UA, "198.51.100.1");
        assert_ne!(a, b);
        assert_eq!(b, SessionId::from_u128(TEST_SESSION + 2));
        assert_consistent(&t);
    }

    #[test]
    fn test_new_path_in_existing_session() {
        let mut t = table();
        let (a, _) = t.resolve(t0(), 1, "", "/a", UA, ADDR);
        let (b, first) = t.resolve(t0(), 1, "", "/b", UA, ADDR);

        assert_eq!(a, b);
        assert!(first);
        assert_eq!(t.paths[&a].len(), 2);
    }

    #[test]
    fn test_fingerprint_includes_site_and_address() {
        let mut t = table();
        let (a, _) = t.resolve(t0(), 1, "", "/", UA, ADDR);
        let (b, _) = t.resolve(t0(), 2, "", "/", UA, ADDR);
        let (c, _) = t.resolve(t0(), 1, "", "/", UA, "198.51.100.1");

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_external_token_bypasses_salt() {
        let mut t = table();
        let (a, _) = t.resolve(t0(), 1, "token-123", "/", UA, ADDR);
        // Different request attributes, same token
        let (b, first) = t.resolve(t0(), 1, "token-123", "/", "curl/8", "10.0.0.1");

        assert_eq!(a, b);
        assert!(!first);
        assert!(t.sessions.contains_key(&Fingerprint::token("token-123")));
    }

    #[test]
    fn test_rotation_falls_back_to_previous_salt() {
        let mut t = table();
        let (x, _) = t.resolve(t0(), 1, "", "/a", UA, ADDR);

        let rotated_at = t0() + Duration::hours(4);
        assert!(t.salts.refresh(rotated_at));

        let (y, first) = t.resolve(rotated_at, 1, "", "/a", UA, ADDR);
        assert_eq!(x, y);
        assert!(!first);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_two_rotations_start_a_new_session() {
        let mut t = table();
        let (x, _) = t.resolve(t0(), 1, "", "/a", UA, ADDR);

        t.salts.refresh(t0() + Duration::hours(4));
        t.salts.refresh(t0() + Duration::hours(8));

        let (y, first) = t.resolve(t0() + Duration::hours(8), 1, "", "/a", UA, ADDR);
        assert_ne!(x, y);
        assert!(first);
    }

    #[test]
    fn test_deterministic_ids() {
        let mut t = table();
        let (a, _) = t.resolve(t0(), 1, "", "/", UA, "10.0.0.1");
        let (b, _) = t.resolve(t0(), 1, "", "/", UA, "10.0.0.2");
        assert_eq!(a.as_u128(), TEST_SESSION + 1);
        assert_eq!(b.as_u128(), TEST_SESSION + 2);
        assert_eq!(a.to_string(), "00112233-4455-6677-8899-aabbccddef00");

        t.reset(t0());
        let (c, _) = t.resolve(t0(), 1, "", "/", UA, "10.0.0.3");
        assert_eq!(c.as_u128(), TEST_SESSION + 1);
    }

    #[test]
    fn test_random_ids_are_v4() {
        let mut t = SessionTable::new(t0(), false);
        let (a, _) = t.resolve(t0(), 1, "", "/", UA, ADDR);
        assert_eq!(a.0.get_version_num(), 4);
        assert_ne!(a.as_u128(), TEST_SESSION + 1);
    }

    #[test]
    fn test_evict_boundary() {
        let mut t = table();
        let idle = Duration::seconds(SESSION_IDLE_SECS);
        let now = t0() + Duration::hours(10);

        let (at_cutoff, _) = t.resolve(now - idle, 1, "", "/", UA, "10.0.0.1");
        let (past_cutoff, _) = t.resolve(now - idle - Duration::seconds(1), 1, "", "/", UA, "10.0.0.2");
        let (fresh, _) = t.resolve(now, 1, "", "/", UA, "10.0.0.3");

        assert_eq!(t.evict(now), 1);

        assert!(t.seen.contains_key(&at_cutoff));
        assert!(t.seen.contains_key(&fresh));
        assert!(!t.seen.contains_key(&past_cutoff));
        assert!(!t.hashes.contains_key(&past_cutoff));
        assert!(!t.paths.contains_key(&past_cutoff));
        assert!(!t.sessions.values().any(|id| *id == past_cutoff));
        assert_consistent(&t);
    }

    #[test]
    fn test_evicted_visitor_gets_new_session() {
        let mut t = table();
        let (a, _) = t.resolve(t0(), 1, "", "/", UA, ADDR);
        let later = t0() + Duration::hours(5);
        t.evict(later);
        let (b, first) = t.resolve(later, 1, "", "/", UA, ADDR);
        assert_ne!(a, b);
        assert!(first);
    }

    #[test]
    fn test_retain_consistent_drops_orphans() {
        let mut t = table();
        let (keep, _) = t.resolve(t0(), 1, "", "/", UA, ADDR);
        let orphan = SessionId::from_u128(42);
        t.seen.insert(orphan, t0().timestamp());
        t.paths.insert(orphan, HashSet::new());

        assert_eq!(t.retain_consistent(), 1);
        assert!(t.seen.contains_key(&keep));
        assert!(!t.seen.contains_key(&orphan));
        assert_consistent(&t);
    }

    #[test]
    fn test_fingerprint_serde_is_base64() {
        let fp = Fingerprint::token("abc");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, "\"YWJj\"");
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
