//! Storage collaborators
//!
//! The memstore never talks to a database directly. It consumes three narrow
//! interfaces, each implemented by [`SqliteStore`] for production and by
//! [`MemoryStore`] for tests:
//!
//! ```text
//! Memstore::persist()
//!     │
//!     ├──→ SiteLookup  (collection flags per site)
//!     ├──→ HitSink     (path/user-agent interning + one bulk insert per batch)
//!     │
//! Memstore::init() / store_sessions()
//!     │
//!     └──→ KvStore     (session snapshot, buffer secret)
//! ```

use crate::error::{Error, Result};
use crate::site::Site;
use rusqlite::types::Value;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Table the memstore flushes into
pub const HITS_TABLE: &str = "hits";

/// Column order of one hit row; `Hit::to_row` produces values in this order
pub const HIT_COLUMNS: &[&str] = &[
    "site_id",
    "path_id",
    "ref",
    "ref_scheme",
    "user_agent_id",
    "size",
    "location",
    "created_at",
    "bot",
    "session",
    "first_visit",
];

/// Rows collected for a single multi-row insert
#[derive(Debug, Clone)]
pub struct BulkInsert {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl BulkInsert {
    pub fn new(table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Queue one row; it must have exactly one value per column
    pub fn values(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::store(format!(
                "{}: row has {} values for {} columns",
                self.table,
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Single-row INSERT statement with positional placeholders
    pub fn insert_sql(&self) -> String {
        let placeholders = (1..=self.columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            self.columns.join(", "),
            placeholders
        )
    }
}

/// Durable destination for persisted hits
pub trait HitSink: Send + Sync {
    /// Write every row in one go; failure means none of them were stored
    fn bulk_insert(&self, batch: &BulkInsert) -> Result<()>;

    /// ID for a site's path, created on first use
    fn path_id(&self, site: i64, path: &str) -> Result<i64>;

    /// ID for a user-agent header, created on first use
    fn user_agent_id(&self, user_agent: &str) -> Result<i64>;
}

/// Site settings lookup
pub trait SiteLookup: Send + Sync {
    fn site(&self, id: i64) -> Result<Site>;
}

/// Small persistent key/value store for state that must survive restarts
pub trait KvStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace
    fn save(&self, key: &str, value: &[u8]) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_insert_sql() {
        let ins = BulkInsert::new("hits", &["site_id", "path_id"]);
        assert_eq!(
            ins.insert_sql(),
            "INSERT INTO hits (site_id, path_id) VALUES (?1, ?2)"
        );
    }

    #[test]
    fn test_bulk_insert_rejects_short_row() {
        let mut ins = BulkInsert::new("hits", &["site_id", "path_id"]);
        assert!(ins.values(vec![Value::Integer(1)]).is_err());
        assert!(ins
            .values(vec![Value::Integer(1), Value::Integer(2)])
            .is_ok());
        assert_eq!(ins.len(), 1);
    }
}
