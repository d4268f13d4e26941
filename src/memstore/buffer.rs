//! Pending-hit buffer
//!
//! Producers append under a short lock; the persist path swaps the whole
//! vector out in one step. Every hit appended before a drain is returned by
//! that drain or a later one, never both and never neither.

use crate::hit::Hit;
use parking_lot::Mutex;

const INITIAL_CAPACITY: usize = 16;

#[derive(Debug, Default)]
pub struct HitBuffer {
    hits: Mutex<Vec<Hit>>,
}

impl HitBuffer {
    pub fn new() -> Self {
        Self {
            hits: Mutex::new(Vec::with_capacity(INITIAL_CAPACITY)),
        }
    }

    /// Queue hits in arrival order
    pub fn append<I>(&self, hits: I)
    where
        I: IntoIterator<Item = Hit>,
    {
        self.hits.lock().extend(hits);
    }

    pub fn len(&self) -> usize {
        self.hits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.lock().is_empty()
    }

    /// Take everything queued so far, leaving an empty buffer
    pub fn drain(&self) -> Vec<Hit> {
        std::mem::replace(
            &mut *self.hits.lock(),
            Vec::with_capacity(INITIAL_CAPACITY),
        )
    }
}
