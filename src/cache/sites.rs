// Cached site lookups
//
// Wraps any SiteLookup. Sites are cached by ID for `SITE_TTL_SECS`, so flags
// changed from another process (`hitkeeper site ...`) are picked up within a
// minute.

use super::{Cache, CacheValue};
use crate::error::Result;
use crate::site::Site;
use crate::store::SiteLookup;
use crate::util::Clock;
use chrono::Duration;
use std::sync::Arc;
use tracing::warn;

pub const SITE_ID_PREFIX: &str = "si";
pub const SITE_TTL_SECS: i64 = 60;

pub struct CachedSites {
    inner: Arc<dyn SiteLookup>,
    by_id: Cache,
}

impl CachedSites {
    pub fn new(inner: Arc<dyn SiteLookup>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            by_id: Cache::new(
                SITE_ID_PREFIX,
                Some(Duration::seconds(SITE_TTL_SECS)),
                clock,
            ),
        }
    }
}

impl SiteLookup for CachedSites {
    fn site(&self, id: i64) -> Result<Site> {
        let key = id.to_string();
        if let Some(CacheValue::Site(site)) = self.by_id.get(&key) {
            return Ok(site);
        }

        let site = self.inner.site(id)?;
        if let Err(e) = self.by_id.set(&key, &CacheValue::Site(site.clone())) {
            warn!(site = id, "Caching site failed: {}", e);
        }
        Ok(site)
    }
}
