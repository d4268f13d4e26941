//! In-memory storage collaborators
//!
//! Implements every storage trait over plain maps. Used by tests and anywhere
//! a throwaway backend is good enough. `fail_inserts` makes the next bulk
//! inserts fail so batch-level error handling can be exercised.

use super::{BulkInsert, HitSink, KvStore, SiteLookup};
use crate::error::{Error, Result};
use crate::site::Site;
use parking_lot::Mutex;
use rusqlite::types::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Inner {
    sites: HashMap<i64, Site>,
    paths: HashMap<(i64, String), i64>,
    user_agents: HashMap<String, i64>,
    kv: HashMap<String, Vec<u8>>,
    rows: Vec<Vec<Value>>,
    inserts: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_inserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with these sites registered
    pub fn with_sites(sites: impl IntoIterator<Item = Site>) -> Self {
        let store = Self::new();
        for site in sites {
            store.add_site(site);
        }
        store
    }

    pub fn add_site(&self, site: Site) {
        self.inner.lock().sites.insert(site.id, site);
    }

    /// Make the next `n` bulk inserts fail
    pub fn fail_inserts(&self, n: usize) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }

    /// Every row inserted so far, in insert order
    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.inner.lock().rows.clone()
    }

    /// Number of successful bulk inserts
    pub fn insert_count(&self) -> usize {
        self.inner.lock().inserts
    }
}

impl HitSink for MemoryStore {
    fn bulk_insert(&self, batch: &BulkInsert) -> Result<()> {
        let failed = self
            .fail_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::store(format!(
                "{}: injected insert failure",
                batch.table()
            )));
        }

        let mut inner = self.inner.lock();
        inner.rows.extend(batch.rows().iter().cloned());
        inner.inserts += 1;
        Ok(())
    }

    fn path_id(&self, site: i64, path: &str) -> Result<i64> {
        let mut inner = self.inner.lock();
        let next = inner.paths.len() as i64 + 1;
        Ok(*inner
            .paths
            .entry((site, path.to_string()))
            .or_insert(next))
    }

    fn user_agent_id(&self, user_agent: &str) -> Result<i64> {
        let mut inner = self.inner.lock();
        let next = inner.user_agents.len() as i64 + 1;
        Ok(*inner
            .user_agents
            .entry(user_agent.to_string())
            .or_insert(next))
    }
}

impl SiteLookup for MemoryStore {
    fn site(&self, id: i64) -> Result<Site> {
        self.inner
            .lock()
            .sites
            .get(&id)
            .cloned()
            .ok_or(Error::SiteNotFound(id))
    }
}

impl KvStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().kv.get(key).cloned())
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.lock().kv.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.lock().kv.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_inserts_then_recovers() {
        let store = MemoryStore::new();
        let mut batch = BulkInsert::new("hits", &["site_id"]);
        batch.values(vec![Value::Integer(1)]).unwrap();

        store.fail_inserts(1);
        assert!(store.bulk_insert(&batch).is_err());
        assert!(store.rows().is_empty());

        assert!(store.bulk_insert(&batch).is_ok());
        assert_eq!(store.rows().len(), 1);
        assert_eq!(store.insert_count(), 1);
    }

    #[test]
    fn test_site_lookup() {
        let store = MemoryStore::with_sites([Site::new(3, "stats.example.com")]);
        assert_eq!(store.site(3).unwrap().host, "stats.example.com");
        assert!(matches!(store.site(4), Err(Error::SiteNotFound(4))));
    }
}
