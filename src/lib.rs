// hitkeeper - pageview buffer and pseudonymous session resolver
//
// Architecture:
// - memstore: buffers incoming hits, assigns salted-hash sessions, and flushes
//   enriched hits to the sink in one bulk insert
// - store: collaborator traits plus SQLite and in-memory implementations
// - cache: TTL caches for site lookups and per-path hit counts
// - driver: tokio task running persist, eviction, salt rotation and snapshots
// - config / logging / cli: the binary's ambient surface

pub mod cache;
pub mod cli;
pub mod config;
pub mod demo;
pub mod driver;
pub mod error;
pub mod hit;
pub mod logging;
pub mod memstore;
pub mod refspam;
pub mod secret;
pub mod site;
pub mod store;
pub mod util;

pub use error::{Error, Result};
pub use hit::Hit;
pub use memstore::{Backends, Memstore, MemstoreOptions, PersistError, SessionId};
pub use site::{Collect, Site};
