//! Pseudonymization salts
//!
//! Two salts are live at any time. Fingerprints are computed against the
//! current one; lookups fall back to the previous one so a visitor seen just
//! before a rotation keeps their session for one more period.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::TryRngCore;

/// Seconds between salt rotations
pub const SALT_ROTATE_SECS: i64 = 4 * 60 * 60;

/// Salt length in bytes
pub const SALT_LEN: usize = 32;

/// Fill `buf` from the operating system's CSPRNG.
///
/// # Aborts
///
/// If the OS can't supply randomness. Without it we can neither salt
/// fingerprints nor mint unguessable session IDs, and there is no safe way to
/// carry on, so the process is aborted after logging.
pub(crate) fn fill_random(buf: &mut [u8]) {
    if let Err(e) = OsRng.try_fill_bytes(buf) {
        tracing::error!("Secure randomness unavailable, aborting: {}", e);
        std::process::abort();
    }
}

/// 256 random bits
pub fn secret_256() -> Vec<u8> {
    let mut buf = vec![0u8; SALT_LEN];
    fill_random(&mut buf);
    buf
}

/// Current and previous salt plus when the current one was introduced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salts {
    pub current: Vec<u8>,
    pub previous: Vec<u8>,
    pub rotated_at: DateTime<Utc>,
}

impl Salts {
    /// Two unrelated random salts, rotation clock starting at `now`
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            current: secret_256(),
            previous: secret_256(),
            rotated_at: now,
        }
    }

    /// Rotate if at least one interval has passed; returns whether it did
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if self.rotated_at + Duration::seconds(SALT_ROTATE_SECS) > now {
            return false;
        }
        self.previous = std::mem::replace(&mut self.current, secret_256());
        self.rotated_at = now;
        true
    }
}
