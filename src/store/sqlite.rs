//! SQLite storage backend
//!
//! One database file holds everything the memstore hands off: hits, the
//! path/user-agent dictionaries, site settings, and the small key/value
//! table used for the session snapshot.
//!
//! # Concurrency
//!
//! The database runs in WAL mode behind an r2d2 pool, so the driver's
//! persist (writer) and any site lookups (readers) don't serialize on a
//! single connection. Each bulk insert runs in one transaction: either the
//! whole batch lands or none of it does.

use super::{BulkInsert, HitSink, KvStore, SiteLookup};
use crate::error::{Error, Result};
use crate::site::{Collect, Site};
use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;

/// Current schema version; bump together with a new `migrate_*` step
const SCHEMA_VERSION: i32 = 2;

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) the database and bring the schema up to date
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA busy_timeout=5000;
                "#,
            )
        });

        let pool = Pool::builder().max_size(4).build(manager)?;
        let store = Self { pool };
        let conn = store.conn()?;
        Self::init_schema(&conn)?;

        tracing::debug!(path = %db_path.display(), "Opened hit database");
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(
                    (SELECT CAST(value AS INTEGER) FROM metadata WHERE key = 'schema_version'),
                    0
                )",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::apply_schema_v1(conn)?;
        }
        if current_version < 2 {
            Self::migrate_v1_to_v2(conn)?;
        }
        Ok(())
    }

    fn apply_schema_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            -- Small persisted key/value state (session snapshot, secrets)
            CREATE TABLE IF NOT EXISTS store (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sites (
                site_id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT NOT NULL UNIQUE,
                collect INTEGER NOT NULL DEFAULT 63,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS paths (
                path_id INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                UNIQUE (site_id, path)
            );

            CREATE TABLE IF NOT EXISTS user_agents (
                user_agent_id INTEGER PRIMARY KEY AUTOINCREMENT,
                ua TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS hits (
                hit_id INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id INTEGER NOT NULL,
                path_id INTEGER NOT NULL,
                ref TEXT NOT NULL DEFAULT '',
                ref_scheme TEXT,
                user_agent_id INTEGER,
                size TEXT,
                location TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                bot INTEGER NOT NULL DEFAULT 0,
                session TEXT,
                first_visit INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_hits_site_created ON hits(site_id, created_at);

            INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', '1');
            "#,
        )?;
        Ok(())
    }

    /// Migration from v1 to v2 (index for per-session queries)
    ///
    /// Idempotent: a crash between the index and the version bump just
    /// reruns it on the next start.
    fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_hits_session ON hits(site_id, session);
            "#,
        )?;
        conn.execute(
            "UPDATE metadata SET value = ?1 WHERE key = 'schema_version'",
            params![SCHEMA_VERSION.to_string()],
        )?;
        tracing::info!("Migrated hit database from v1 to v2");
        Ok(())
    }

    /// Look up a site by host, creating it with the given flags if missing
    pub fn ensure_site(&self, host: &str, collect: Collect) -> Result<Site> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO sites (host, collect, created_at) VALUES (?1, ?2, ?3)",
            params![host, collect.bits(), Utc::now().to_rfc3339()],
        )?;
        let (id, bits): (i64, u8) = conn.query_row(
            "SELECT site_id, collect FROM sites WHERE host = ?1",
            params![host],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(Site::new(id, host).with_collect(Collect::from_bits(bits)))
    }

    /// Register `host` with exactly these flags, updating an existing site.
    /// Returns the site and whether its flags changed.
    pub fn configure_site(&self, host: &str, collect: Collect) -> Result<(Site, bool)> {
        let site = self.ensure_site(host, collect)?;
        if site.collect == collect {
            return Ok((site, false));
        }
        self.set_collect(site.id, collect)?;
        tracing::info!(site = site.id, from = %site.collect, to = %collect, "Site flags changed");
        Ok((site.with_collect(collect), true))
    }

    /// Change a site's collection flags
    pub fn set_collect(&self, site: i64, collect: Collect) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE sites SET collect = ?1 WHERE site_id = ?2",
            params![collect.bits(), site],
        )?;
        if changed == 0 {
            return Err(Error::SiteNotFound(site));
        }
        Ok(())
    }

    /// Number of stored hits
    pub fn hit_count(&self) -> Result<i64> {
        Ok(self
            .conn()?
            .query_row("SELECT COUNT(*) FROM hits", [], |row| row.get(0))?)
    }
}

impl HitSink for SqliteStore {
    fn bulk_insert(&self, batch: &BulkInsert) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&batch.insert_sql())?;
            for row in batch.rows() {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        tracing::trace!(table = batch.table(), count = batch.len(), "Bulk insert");
        Ok(())
    }

    fn path_id(&self, site: i64, path: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO paths (site_id, path) VALUES (?1, ?2)",
            params![site, path],
        )?;
        Ok(conn.query_row(
            "SELECT path_id FROM paths WHERE site_id = ?1 AND path = ?2",
            params![site, path],
            |row| row.get(0),
        )?)
    }

    fn user_agent_id(&self, user_agent: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO user_agents (ua) VALUES (?1)",
            params![user_agent],
        )?;
        Ok(conn.query_row(
            "SELECT user_agent_id FROM user_agents WHERE ua = ?1",
            params![user_agent],
            |row| row.get(0),
        )?)
    }
}

impl SiteLookup for SqliteStore {
    fn site(&self, id: i64) -> Result<Site> {
        let row: Option<(String, u8)> = self
            .conn()?
            .query_row(
                "SELECT host, collect FROM sites WHERE site_id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (host, bits) = row.ok_or(Error::SiteNotFound(id))?;
        Ok(Site::new(id, host).with_collect(Collect::from_bits(bits)))
    }
}

impl KvStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT value FROM store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO store (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HIT_COLUMNS;
    use rusqlite::types::Value;

    fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("hits.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.db");
        drop(SqliteStore::open(&path).unwrap());
        let store = SqliteStore::open(&path).unwrap();

        let version: String = store
            .conn()
            .unwrap()
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[test]
    fn test_kv_roundtrip() {
        let (_dir, store) = open_temp();
        assert_eq!(store.load("session").unwrap(), None);

        store.save("session", b"one").unwrap();
        store.save("session", b"two").unwrap();
        assert_eq!(store.load("session").unwrap(), Some(b"two".to_vec()));

        store.delete("session").unwrap();
        assert_eq!(store.load("session").unwrap(), None);
    }

    #[test]
    fn test_sites() {
        let (_dir, store) = open_temp();
        let site = store
            .ensure_site("stats.example.com", Collect::all())
            .unwrap();
        assert_eq!(
            store.ensure_site("stats.example.com", Collect::empty()).unwrap().id,
            site.id
        );

        store
            .set_collect(site.id, Collect::all().without(Collect::SESSION))
            .unwrap();
        let loaded = store.site(site.id).unwrap();
        assert!(!loaded.collect.has(Collect::SESSION));

        assert!(matches!(store.site(999), Err(Error::SiteNotFound(999))));
        assert!(matches!(
            store.set_collect(999, Collect::all()),
            Err(Error::SiteNotFound(999))
        ));
    }

    #[test]
    fn test_configure_site_updates_existing() {
        let (_dir, store) = open_temp();
        let (site, changed) = store
            .configure_site("stats.example.com", Collect::all())
            .unwrap();
        assert!(!changed);

        let no_sessions = Collect::all().without(Collect::SESSION);
        let (again, changed) = store
            .configure_site("stats.example.com", no_sessions)
            .unwrap();
        assert!(changed);
        assert_eq!(again.id, site.id);
        assert_eq!(again.collect, no_sessions);
        assert_eq!(store.site(site.id).unwrap().collect, no_sessions);

        let (_, changed) = store
            .configure_site("stats.example.com", no_sessions)
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_interning_is_stable() {
        let (_dir, store) = open_temp();
        let a = store.path_id(1, "/a").unwrap();
        assert_eq!(store.path_id(1, "/a").unwrap(), a);
        assert_ne!(store.path_id(2, "/a").unwrap(), a);

        let ua = store.user_agent_id("Firefox").unwrap();
        assert_eq!(store.user_agent_id("Firefox").unwrap(), ua);
    }

    #[test]
    fn test_bulk_insert() {
        let (_dir, store) = open_temp();
        let mut batch = BulkInsert::new("hits", HIT_COLUMNS);
        for path_id in [1, 2] {
            batch
                .values(vec![
                    Value::Integer(1),
                    Value::Integer(path_id),
                    Value::Text(String::new()),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Text(String::new()),
                    Value::Text(Utc::now().to_rfc3339()),
                    Value::Integer(0),
                    Value::Null,
                    Value::Integer(1),
                ])
                .unwrap();
        }
        store.bulk_insert(&batch).unwrap();
        assert_eq!(store.hit_count().unwrap(), 2);
    }

    #[test]
    fn test_bulk_insert_is_all_or_nothing() {
        let (_dir, store) = open_temp();
        let mut batch = BulkInsert::new("hits", &["site_id", "path_id", "created_at"]);
        batch
            .values(vec![
                Value::Integer(1),
                Value::Integer(1),
                Value::Text(Utc::now().to_rfc3339()),
            ])
            .unwrap();
        // NOT NULL violation on the second row
        batch
            .values(vec![Value::Integer(1), Value::Null, Value::Null])
            .unwrap();

        assert!(store.bulk_insert(&batch).is_err());
        assert_eq!(store.hit_count().unwrap(), 0);
    }
}
