//! In-memory hit buffer and session resolver
//!
//! The memstore sits between request handlers and the database. Handlers
//! [`append`](Memstore::append) hits as they arrive; a background driver calls
//! [`persist`](Memstore::persist) to flush them in one bulk insert, and runs
//! the maintenance jobs (eviction, salt rotation, snapshots) on their own
//! timers.
//!
//! Two independent locks:
//! - the hit buffer, held only for the append or the drain swap
//! - the session table and salts, held for one resolve / evict / rotate /
//!   snapshot copy; never across storage I/O
//!
//! Collaborators (site lookup, sink, key-value store, spam filter) are passed
//! in through [`Backends`] so tests can run entirely in memory.

mod buffer;
mod persist;
mod salt;
mod sessions;
mod snapshot;

pub use buffer::HitBuffer;
pub use persist::{PersistError, PersistMetrics, PersistStats};
pub use salt::{secret_256, Salts, SALT_LEN, SALT_ROTATE_SECS};
pub use sessions::{Fingerprint, SessionId, SessionTable, SESSION_IDLE_SECS, TEST_SESSION};
pub use snapshot::{StoredSessions, SNAPSHOT_KEY};

use crate::error::Result;
use crate::hit::Hit;
use crate::refspam::SpamFilter;
use crate::store::{HitSink, KvStore, SiteLookup};
use crate::util::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemstoreOptions {
    /// Hand out TEST_SESSION+1, +2, ... instead of random IDs
    pub deterministic_ids: bool,
}

/// Storage-side collaborators
#[derive(Clone)]
pub struct Backends {
    pub sites: Arc<dyn SiteLookup>,
    pub sink: Arc<dyn HitSink>,
    pub kv: Arc<dyn KvStore>,
    pub spam: Arc<dyn SpamFilter>,
}

impl Backends {
    /// One store serving sites, hits and the key-value table
    pub fn from_store<S>(store: Arc<S>, spam: Arc<dyn SpamFilter>) -> Self
    where
        S: SiteLookup + HitSink + KvStore + 'static,
    {
        Self {
            sites: store.clone(),
            sink: store.clone(),
            kv: store,
            spam,
        }
    }

    /// Swap the site lookup, e.g. for a cached one
    pub fn with_sites(mut self, sites: Arc<dyn SiteLookup>) -> Self {
        self.sites = sites;
        self
    }
}

pub struct Memstore {
    buffer: HitBuffer,
    table: Mutex<SessionTable>,
    backends: Backends,
    clock: Arc<dyn Clock>,
    metrics: PersistMetrics,
}

impl Memstore {
    /// Empty memstore with fresh salts. Call [`init`](Self::init) to restore
    /// a previous snapshot.
    pub fn new(options: MemstoreOptions, backends: Backends, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            buffer: HitBuffer::new(),
            table: Mutex::new(SessionTable::new(now, options.deterministic_ids)),
            backends,
            clock,
            metrics: PersistMetrics::default(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Hit buffer
    // ─────────────────────────────────────────────────────────────

    pub fn append<I>(&self, hits: I)
    where
        I: IntoIterator<Item = Hit>,
    {
        self.buffer.append(hits);
    }

    /// Hits waiting for the next persist
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn metrics(&self) -> PersistStats {
        self.metrics.snapshot()
    }

    // ─────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────

    /// Session for a pageview, and whether `path` is new to that session.
    ///
    /// A non-empty `user_session_id` is used as the fingerprint directly;
    /// otherwise it's derived from the salted user agent, address and site.
    pub fn resolve(
        &self,
        site: i64,
        user_session_id: &str,
        path: &str,
        user_agent: &str,
        remote_addr: &str,
    ) -> (SessionId, bool) {
        let now = self.clock.now();
        self.table
            .lock()
            .resolve(now, site, user_session_id, path, user_agent, remote_addr)
    }

    /// Drop sessions idle for more than 4 hours; returns how many went
    pub fn evict_sessions(&self) -> usize {
        let now = self.clock.now();
        let evicted = self.table.lock().evict(now);
        if evicted > 0 {
            debug!(evicted, "Evicted idle sessions");
        }
        evicted
    }

    pub fn session_count(&self) -> usize {
        self.table.lock().len()
    }

    // ─────────────────────────────────────────────────────────────
    // Salts
    // ─────────────────────────────────────────────────────────────

    /// (current, previous)
    pub fn get_salt(&self) -> (Vec<u8>, Vec<u8>) {
        let table = self.table.lock();
        (table.salts.current.clone(), table.salts.previous.clone())
    }

    /// Rotate the salt if it's older than 4 hours; returns whether it did
    pub fn refresh_salt(&self) -> bool {
        let now = self.clock.now();
        let rotated = self.table.lock().salts.refresh(now);
        if rotated {
            info!("Rotated session salt");
        }
        rotated
    }

    pub fn salt_rotated_at(&self) -> DateTime<Utc> {
        self.table.lock().salts.rotated_at
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Forget every session and draw new salts
    pub fn reset(&self) {
        let now = self.clock.now();
        self.table.lock().reset(now);
    }

    /// Reset, then restore the stored snapshot if there is one.
    ///
    /// The snapshot is deleted once read. An unreadable snapshot is logged and
    /// discarded; only storage errors are returned.
    pub fn init(&self) -> Result<()> {
        self.reset();

        let Some(bytes) = self.backends.kv.load(SNAPSHOT_KEY)? else {
            debug!("No stored sessions");
            return Ok(());
        };

        match snapshot::decode(&bytes) {
            Ok(stored) => {
                let restored = stored.apply(&mut self.table.lock());
                info!(sessions = restored, "Restored sessions");
            }
            Err(e) => warn!("Discarding unreadable session snapshot: {}", e),
        }

        self.backends.kv.delete(SNAPSHOT_KEY)
    }

    /// Write the session table and salts to the key-value store
    pub fn store_sessions(&self) -> Result<()> {
        let bytes = {
            let table = self.table.lock();
            snapshot::encode(&table)?
        };
        self.backends.kv.save(SNAPSHOT_KEY, &bytes)?;
        debug!(bytes = bytes.len(), "Stored sessions");
        Ok(())
    }

    /// Snapshot sessions, then clear them
    pub fn shutdown(&self) -> Result<()> {
        self.store_sessions()?;
        self.reset();
        Ok(())
    }
}
