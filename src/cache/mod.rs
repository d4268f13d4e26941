//! Small TTL caches for site lookups and hit counts
//!
//! Values are stored encoded, tagged with a [`Kind`] byte, the same shape a
//! memcached item would have (payload plus flags). Keeping the encoded form
//! means a value that stops decoding is caught at read time and dropped
//! instead of handed out.

mod counts;
mod sites;

pub use counts::{HitCounts, HIT_COUNT_PREFIX, HIT_COUNT_TTL_SECS};
pub use sites::{CachedSites, SITE_ID_PREFIX, SITE_TTL_SECS};

use crate::error::{Error, Result};
use crate::site::Site;
use crate::util::{truncate_utf8_safe, Clock};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, trace};

/// Longest key memcached accepts
pub const MAX_KEY_LEN: usize = 250;

/// Payload discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Int = b'i',
    Site = b's',
    Count = b'c',
}

impl Kind {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'i' => Ok(Kind::Int),
            b's' => Ok(Kind::Site),
            b'c' => Ok(Kind::Count),
            other => Err(Error::cache(format!("unknown kind byte {:#04x}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Count { total: i64, total_unique: i64 },
    Int(i64),
    Site(Site),
}

impl CacheValue {
    pub fn kind(&self) -> Kind {
        match self {
            CacheValue::Count { .. } => Kind::Count,
            CacheValue::Int(_) => Kind::Int,
            CacheValue::Site(_) => Kind::Site,
        }
    }

    /// Count → "total unique", Int → decimal, Site → JSON
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(match self {
            CacheValue::Count {
                total,
                total_unique,
            } => format!("{} {}", total, total_unique).into_bytes(),
            CacheValue::Int(v) => v.to_string().into_bytes(),
            CacheValue::Site(site) => serde_json::to_vec(site)?,
        })
    }

    pub fn decode(kind: Kind, data: &[u8]) -> Result<Self> {
        match kind {
            Kind::Count => {
                let s = utf8(data)?;
                let (total, unique) = s
                    .split_once(' ')
                    .ok_or_else(|| Error::cache(format!("no space in count {:?}", s)))?;
                Ok(CacheValue::Count {
                    total: parse_int(total)?,
                    total_unique: parse_int(unique)?,
                })
            }
            Kind::Int => Ok(CacheValue::Int(parse_int(utf8(data)?)?)),
            Kind::Site => Ok(CacheValue::Site(serde_json::from_slice(data)?)),
        }
    }
}

fn utf8(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|e| Error::cache(e.to_string()))
}

fn parse_int(s: &str) -> Result<i64> {
    s.parse()
        .map_err(|e| Error::cache(format!("{:?}: {}", s, e)))
}

/// Prefix, spaces to underscores, and a SHA-256 suffix for anything too long
pub fn cache_key(prefix: &str, key: &str) -> String {
    let k = format!("{}{}", prefix, key.replace(' ', "_"));
    if k.len() <= MAX_KEY_LEN {
        return k;
    }
    let hash = format!("{:x}", Sha256::digest(k.as_bytes()));
    let keep = truncate_utf8_safe(&k, MAX_KEY_LEN - hash.len());
    format!("{}{}", keep, hash)
}

#[derive(Debug)]
struct Entry {
    kind: Kind,
    data: Vec<u8>,
    expires: Option<DateTime<Utc>>,
}

/// In-process cache of encoded values
pub struct Cache {
    prefix: String,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Cache {
    /// `ttl: None` keeps entries until deleted or flushed
    pub fn new(prefix: impl Into<String>, ttl: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            prefix: prefix.into(),
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let k = cache_key(&self.prefix, key);
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::live_value(&mut entries, &k, now)
    }

    pub fn set(&self, key: &str, value: &CacheValue) -> Result<()> {
        let k = cache_key(&self.prefix, key);
        let entry = self.entry(value)?;
        trace!(key = %k, kind = ?entry.kind, "Cache set");
        self.entries.lock().insert(k, entry);
        Ok(())
    }

    /// Read-modify-write under one lock
    pub fn update<F>(&self, key: &str, f: F) -> Result<()>
    where
        F: FnOnce(Option<CacheValue>) -> CacheValue,
    {
        let k = cache_key(&self.prefix, key);
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let next = f(Self::live_value(&mut entries, &k, now));
        let entry = self.entry(&next)?;
        entries.insert(k, entry);
        Ok(())
    }

    /// Drop expired entries; returns how many
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires.map_or(true, |exp| exp > now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn entry(&self, value: &CacheValue) -> Result<Entry> {
        Ok(Entry {
            kind: value.kind(),
            data: value.encode()?,
            expires: self.ttl.map(|ttl| self.clock.now() + ttl),
        })
    }

    fn live_value(
        entries: &mut HashMap<String, Entry>,
        k: &str,
        now: DateTime<Utc>,
    ) -> Option<CacheValue> {
        let entry = entries.get(k)?;
        if entry.expires.is_some_and(|exp| exp <= now) {
            entries.remove(k);
            return None;
        }
        match CacheValue::decode(entry.kind, &entry.data) {
            Ok(v) => Some(v),
            Err(e) => {
                error!(key = %k, "Dropping undecodable cache entry: {}", e);
                entries.remove(k);
                None
            }
        }
    }
}
