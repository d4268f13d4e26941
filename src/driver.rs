// Background driver for the memstore
//
// One task owns all the timers:
//
// - persist:    flush the buffer (retrying any failed batch first)
// - threshold:  flush early once the buffer reaches `flush_threshold`
// - evict:      drop idle sessions, purge expired hit counts
// - salt:       rotate the salt when it's due
// - snapshot:   write the session table to the key-value store
//
// Database work goes through spawn_blocking so a slow disk never stalls the
// runtime. On shutdown the buffer is flushed one last time and the sessions
// are snapshotted before the table is cleared.

use crate::cache::HitCounts;
use crate::hit::Hit;
use crate::memstore::Memstore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Failed hits kept for retry; beyond this the oldest are dropped
pub const MAX_RETRY_HITS: usize = 100_000;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub persist_interval: Duration,
    /// Flush early once this many hits are buffered
    pub flush_threshold: usize,
    pub threshold_check_interval: Duration,
    pub evict_interval: Duration,
    pub salt_check_interval: Duration,
    pub snapshot_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            persist_interval: Duration::from_secs(10),
            flush_threshold: 1000,
            threshold_check_interval: Duration::from_secs(1),
            evict_interval: Duration::from_secs(60),
            salt_check_interval: Duration::from_secs(60),
            snapshot_interval: Duration::from_secs(300),
        }
    }
}

pub struct Driver {
    mem: Arc<Memstore>,
    counts: Option<Arc<HitCounts>>,
    config: DriverConfig,
    retry: Vec<Hit>,
}

fn ticker(period: Duration) -> Interval {
    // First tick one period from now, not immediately
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl Driver {
    pub fn new(mem: Arc<Memstore>, config: DriverConfig) -> Self {
        Self {
            mem,
            counts: None,
            config,
            retry: Vec::new(),
        }
    }

    /// Feed every stored batch into these counters
    pub fn with_hit_counts(mut self, counts: Arc<HitCounts>) -> Self {
        self.counts = Some(counts);
        self
    }

    /// Run until `shutdown` fires (or its sender is dropped)
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut persist = ticker(self.config.persist_interval);
        let mut threshold = ticker(self.config.threshold_check_interval);
        let mut evict = ticker(self.config.evict_interval);
        let mut salt = ticker(self.config.salt_check_interval);
        let mut snapshot = ticker(self.config.snapshot_interval);

        info!(
            persist_secs = self.config.persist_interval.as_secs_f64(),
            flush_threshold = self.config.flush_threshold,
            "Memstore driver started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Memstore driver received shutdown signal");
                    break;
                }
                _ = persist.tick() => self.flush().await,
                _ = threshold.tick() => {
                    if self.mem.len() >= self.config.flush_threshold {
                        debug!(buffered = self.mem.len(), "Flush threshold reached");
                        self.flush().await;
                    }
                }
                _ = evict.tick() => {
                    self.mem.evict_sessions();
                    if let Some(counts) = &self.counts {
                        counts.purge_expired();
                    }
                }
                _ = salt.tick() => {
                    self.mem.refresh_salt();
                }
                _ = snapshot.tick() => {
                    if let Some(Err(e)) = self.blocking(|mem| mem.store_sessions()).await {
                        error!("Storing sessions failed: {}", e);
                    }
                }
            }
        }

        self.flush().await;
        if !self.retry.is_empty() && !self.mem.is_empty() {
            // Last chance for new hits; the old batch is still failing
            self.persist_buffered().await;
        }
        let lost = self.retry.len() + self.mem.len();
        if lost > 0 {
            error!(count = lost, "Dropping hits that could not be stored");
        }
        match self.blocking(|mem| mem.shutdown()).await {
            Some(Ok(())) => info!("Memstore shut down, sessions stored"),
            Some(Err(e)) => error!("Storing sessions on shutdown failed: {}", e),
            None => {}
        }
    }

    /// Hits waiting for a retry
    pub fn pending_retry(&self) -> usize {
        self.retry.len()
    }

    /// Retry the last failed batch, then persist whatever is buffered.
    ///
    /// New hits stay in the buffer while an older batch still can't be stored.
    pub async fn flush(&mut self) {
        if !self.retry.is_empty() {
            let pending = std::mem::take(&mut self.retry);
            let Some((pending, result)) = self
                .blocking(move |mem| {
                    let result = mem.insert_hits(&pending);
                    (pending, result)
                })
                .await
            else {
                return;
            };

            match result {
                Ok(()) => {
                    info!(count = pending.len(), "Stored previously failed hits");
                    self.record(&pending);
                }
                Err(e) => {
                    warn!(count = pending.len(), "Retry failed, keeping hits: {}", e);
                    self.keep_for_retry(pending);
                    return;
                }
            }
        }

        self.persist_buffered().await;
    }

    async fn persist_buffered(&mut self) {
        match self.blocking(|mem| mem.persist()).await {
            Some(Ok(hits)) => {
                if !hits.is_empty() {
                    debug!(count = hits.len(), "Persisted hits");
                    self.record(&hits);
                }
            }
            Some(Err(e)) => {
                error!(count = e.hits.len(), "Persisting hits failed: {}", e.source);
                self.keep_for_retry(e.hits);
            }
            None => {}
        }
    }

    fn keep_for_retry(&mut self, mut hits: Vec<Hit>) {
        self.retry.append(&mut hits);
        if self.retry.len() > MAX_RETRY_HITS {
            let excess = self.retry.len() - MAX_RETRY_HITS;
            self.retry.drain(..excess);
            error!(dropped = excess, "Retry queue full, dropped oldest hits");
        }
    }

    fn record(&self, hits: &[Hit]) {
        if let Some(counts) = &self.counts {
            if let Err(e) = counts.record(hits) {
                warn!("Updating hit counts failed: {}", e);
            }
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&Memstore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mem = self.mem.clone();
        match tokio::task::spawn_blocking(move || f(mem.as_ref())).await {
            Ok(v) => Some(v),
            Err(e) => {
                error!("Memstore task failed: {}", e);
                None
            }
        }
    }
}
