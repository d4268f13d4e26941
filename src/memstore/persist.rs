// Persist coordinator
//
// Drains the buffer and turns raw hits into stored rows. Per hit, in order:
//
//   1. referrer spam  → dropped (counted)
//   2. site lookup    → dropped on error
//   3. bot detection
//   4. session        → resolved if the site collects sessions and none is set
//   5. collect flags  → opted-out fields nulled
//   6. defaults       → normalization, path/user-agent IDs
//   7. ignore         → known crawlers dropped
//   8. validate       → dropped on error
//
// The survivors go to the sink as one bulk insert. Per-hit problems are logged
// and never fail the batch; a failed insert hands the enriched batch back to
// the caller for retry.

use super::Memstore;
use crate::error::Error;
use crate::hit::Hit;
use crate::site::Collect;
use crate::store::{BulkInsert, HIT_COLUMNS, HITS_TABLE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, trace, warn};

/// Bulk insert failed; `hits` are fully enriched and can go straight back to
/// [`Memstore::insert_hits`].
#[derive(Debug, thiserror::Error)]
#[error("inserting {} hits failed: {source}", .hits.len())]
pub struct PersistError {
    pub hits: Vec<Hit>,
    #[source]
    pub source: Error,
}

/// Running totals for the persist path
#[derive(Debug, Default)]
pub struct PersistMetrics {
    flushes: AtomicU64,
    persisted: AtomicU64,
    refspam: AtomicU64,
    ignored: AtomicU64,
    invalid: AtomicU64,
    failed_batches: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    pub flushes: u64,
    pub persisted: u64,
    pub refspam: u64,
    pub ignored: u64,
    pub invalid: u64,
    pub failed_batches: u64,
}

impl PersistMetrics {
    pub fn snapshot(&self) -> PersistStats {
        PersistStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            refspam: self.refspam.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Memstore {
    /// Drain the buffer, enrich, and bulk-insert.
    ///
    /// Returns the stored hits, or an error carrying them if the insert
    /// failed. An empty buffer returns an empty list without touching the sink.
    pub fn persist(&self) -> Result<Vec<Hit>, PersistError> {
        let drained = self.buffer.drain();
        if drained.is_empty() {
            return Ok(Vec::new());
        }
        PersistMetrics::bump(&self.metrics.flushes);

        let now = self.clock.now();
        let total = drained.len();
        let hits: Vec<Hit> = drained
            .into_iter()
            .filter_map(|hit| self.prepare(hit, now))
            .collect();
        debug!(drained = total, accepted = hits.len(), "Prepared hits");

        match self.insert_hits(&hits) {
            Ok(()) => Ok(hits),
            Err(source) => Err(PersistError { hits, source }),
        }
    }

    /// Write already-enriched hits in a single bulk insert.
    ///
    /// Used by `persist` and to retry the payload of a [`PersistError`].
    pub fn insert_hits(&self, hits: &[Hit]) -> crate::error::Result<()> {
        if hits.is_empty() {
            return Ok(());
        }

        let mut batch = BulkInsert::new(HITS_TABLE, HIT_COLUMNS);
        for hit in hits {
            batch.values(hit.to_row())?;
        }

        if let Err(e) = self.backends.sink.bulk_insert(&batch) {
            PersistMetrics::bump(&self.metrics.failed_batches);
            error!(hits = hits.len(), "Bulk insert failed: {}", e);
            return Err(e);
        }
        self.metrics
            .persisted
            .fetch_add(hits.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn prepare(&self, mut hit: Hit, now: DateTime<Utc>) -> Option<Hit> {
        if let Some(host) = hit.referrer_host() {
            if self.backends.spam.is_spam_host(&host) {
                PersistMetrics::bump(&self.metrics.refspam);
                trace!(site = hit.site, %host, "Dropping referrer spam");
                return None;
            }
        }

        let site = match self.backends.sites.site(hit.site) {
            Ok(site) => site,
            Err(e) => {
                PersistMetrics::bump(&self.metrics.invalid);
                error!(site = hit.site, path = %hit.path, "Site lookup failed: {}", e);
                return None;
            }
        };

        hit.detect_bot();

        if hit.session.is_none() && site.collect.has(Collect::SESSION) {
            let (id, first_visit) = self.resolve(
                hit.site,
                &hit.user_session_id,
                &hit.path,
                &hit.user_agent,
                &hit.remote_addr,
            );
            hit.session = Some(id);
            hit.first_visit = first_visit;
        }
        // Only needed for the fingerprint
        hit.remote_addr.clear();

        hit.apply_collect(site.collect);

        if let Err(e) = hit.defaults(self.backends.sink.as_ref()) {
            PersistMetrics::bump(&self.metrics.invalid);
            error!(site = hit.site, path = %hit.path, "Resolving hit defaults failed: {}", e);
            return None;
        }

        if hit.ignore() {
            PersistMetrics::bump(&self.metrics.ignored);
            trace!(site = hit.site, bot = hit.bot, "Ignoring crawler");
            return None;
        }

        if let Err(e) = hit.validate(now) {
            PersistMetrics::bump(&self.metrics.invalid);
            warn!(site = hit.site, path = %hit.path, "Invalid hit: {}", e);
            return None;
        }

        Some(hit)
    }
}
