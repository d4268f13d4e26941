//! Shared secret for the hit buffer endpoint
//!
//! A separate buffering process authenticates to us with this key. It lives in
//! the key-value store so every process pointed at the same database agrees
//! on it.

use crate::error::{Error, Result};
use crate::memstore::secret_256;
use crate::store::KvStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tracing::info;

pub const BUFFER_SECRET_KEY: &str = "buffer-secret";

/// Generate a new 256-bit key, replacing any existing one
pub fn new_buffer_key(kv: &dyn KvStore) -> Result<String> {
    let secret = URL_SAFE_NO_PAD.encode(secret_256());
    kv.save(BUFFER_SECRET_KEY, secret.as_bytes())?;
    info!("Generated new buffer secret");
    Ok(secret)
}

/// The stored key, if one was ever generated
pub fn load_buffer_key(kv: &dyn KvStore) -> Result<Option<String>> {
    kv.load(BUFFER_SECRET_KEY)?
        .map(|bytes| {
            String::from_utf8(bytes)
                .map_err(|e| Error::store(format!("{}: not UTF-8: {}", BUFFER_SECRET_KEY, e)))
        })
        .transpose()
}

pub fn load_or_create_buffer_key(kv: &dyn KvStore) -> Result<String> {
    match load_buffer_key(kv)? {
        Some(key) => Ok(key),
        None => new_buffer_key(kv),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_missing_key() {
        let kv = MemoryStore::new();
        assert_eq!(load_buffer_key(&kv).unwrap(), None);
    }

    #[test]
    fn test_new_key_replaces_old() {
        let kv = MemoryStore::new();
        let first = new_buffer_key(&kv).unwrap();
        let second = new_buffer_key(&kv).unwrap();

        assert_ne!(first, second);
        assert_eq!(URL_SAFE_NO_PAD.decode(&second).unwrap().len(), 32);
        assert_eq!(load_buffer_key(&kv).unwrap(), Some(second));
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let kv = MemoryStore::new();
        let a = load_or_create_buffer_key(&kv).unwrap();
        let b = load_or_create_buffer_key(&kv).unwrap();
        assert_eq!(a, b);
    }
}
