// Sites and their data-collection settings
//
// Each site decides which parts of a pageview it wants stored. The memstore
// consults these flags while persisting: session tracking is opt-in per site,
// and the other flags null out fields after the session has been resolved.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Independently togglable collection options, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collect(u8);

impl Collect {
    pub const SESSION: Collect = Collect(1 << 0);
    pub const REFERRER: Collect = Collect(1 << 1);
    pub const SCREEN_SIZE: Collect = Collect(1 << 2);
    pub const USER_AGENT: Collect = Collect(1 << 3);
    pub const LOCATION: Collect = Collect(1 << 4);
    pub const LOCATION_REGION: Collect = Collect(1 << 5);

    const ALL_BITS: u8 = 0b0011_1111;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(Self::ALL_BITS)
    }

    /// Build from a raw bitmask; unknown bits are dropped
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL_BITS)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn has(self, flag: Collect) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[must_use]
    pub const fn with(self, flag: Collect) -> Self {
        Self(self.0 | flag.0)
    }

    #[must_use]
    pub const fn without(self, flag: Collect) -> Self {
        Self(self.0 & !flag.0)
    }
}

impl Default for Collect {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for Collect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Collect, &str); 6] = [
            (Collect::SESSION, "session"),
            (Collect::REFERRER, "referrer"),
            (Collect::SCREEN_SIZE, "screen_size"),
            (Collect::USER_AGENT, "user_agent"),
            (Collect::LOCATION, "location"),
            (Collect::LOCATION_REGION, "location_region"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.has(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(","))
    }
}

/// A site as far as hit persistence is concerned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    /// Hostname the site is counted under (e.g. "stats.example.com")
    pub host: String,
    pub collect: Collect,
}

impl Site {
    pub fn new(id: i64, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            collect: Collect::default(),
        }
    }

    #[must_use]
    pub fn with_collect(mut self, collect: Collect) -> Self {
        self.collect = collect;
        self
    }
}
