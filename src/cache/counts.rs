// Per-path hit counters
//
// Running (total, unique) pageview counts per site and path, fed from every
// successful persist. Entries expire an hour after their last update.

use super::{Cache, CacheValue};
use crate::error::Result;
use crate::hit::Hit;
use crate::util::Clock;
use chrono::Duration;
use std::sync::Arc;

pub const HIT_COUNT_PREFIX: &str = "hc";
pub const HIT_COUNT_TTL_SECS: i64 = 60 * 60;

pub struct HitCounts {
    cache: Cache,
}

impl HitCounts {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Cache::new(
                HIT_COUNT_PREFIX,
                Some(Duration::seconds(HIT_COUNT_TTL_SECS)),
                clock,
            ),
        }
    }

    fn key(site: i64, path: &str) -> String {
        format!("{}:{}", site, path)
    }

    /// (total, unique) for a path, if counted within the last hour
    pub fn get(&self, site: i64, path: &str) -> Option<(i64, i64)> {
        match self.cache.get(&Self::key(site, path))? {
            CacheValue::Count {
                total,
                total_unique,
            } => Some((total, total_unique)),
            _ => None,
        }
    }

    /// Count stored hits; a first visit counts as unique
    pub fn record(&self, hits: &[Hit]) -> Result<()> {
        for hit in hits {
            let unique = i64::from(hit.first_visit);
            self.cache.update(&Self::key(hit.site, &hit.path), |prev| {
                let (total, total_unique) = match prev {
                    Some(CacheValue::Count {
                        total,
                        total_unique,
                    }) => (total, total_unique),
                    _ => (0, 0),
                };
                CacheValue::Count {
                    total: total + 1,
                    total_unique: total_unique + unique,
                }
            })?;
        }
        Ok(())
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_record_and_expire() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(t0));
        let counts = HitCounts::new(clock.clone());

        let mut first = Hit::new(1, "/a", t0);
        first.first_visit = true;
        let repeat = Hit::new(1, "/a", t0);
        let other = Hit::new(2, "/a", t0);

        counts.record(&[first, repeat, other]).unwrap();
        assert_eq!(counts.get(1, "/a"), Some((2, 1)));
        assert_eq!(counts.get(2, "/a"), Some((1, 0)));
        assert_eq!(counts.get(1, "/b"), None);

        clock.advance(Duration::hours(1));
        assert_eq!(counts.purge_expired(), 2);
        assert_eq!(counts.get(1, "/a"), None);
    }
}
