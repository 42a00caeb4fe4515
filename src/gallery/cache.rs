//! SQLite cache of gallery query responses
//!
//! Enabled with `--cache`: repeated runs within the expiry window reuse the
//! previous answer for the exact same query body instead of hitting the
//! gallery again. Artifact downloads never go through this cache.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

pub struct ResponseCache {
    conn: Mutex<Connection>,
    expiry_ms: i64,
}

impl ResponseCache {
    pub fn new(db_path: &Path, expiry_ms: i64) -> Result<Self, CacheError> {
        info!("Opening response cache at {:?}", db_path);

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let cache = Self {
            conn: Mutex::new(conn),
            expiry_ms,
        };
        cache.create_schema()?;

        Ok(cache)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Get current timestamp in milliseconds since UNIX epoch
    fn current_timestamp_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn create_schema(&self) -> Result<(), CacheError> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                request TEXT NOT NULL,
                body TEXT NOT NULL,
                stored_at INTEGER NOT NULL,
                UNIQUE(url, request)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_stored_at ON responses(stored_at)",
            [],
        )?;

        debug!("Response cache schema ready");
        Ok(())
    }

    /// Cached body for this request, if stored within the expiry window.
    pub fn get(&self, url: &str, request: &str) -> Result<Option<String>, CacheError> {
        let threshold = Self::current_timestamp_ms() - self.expiry_ms;
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT body FROM responses WHERE url = ?1 AND request = ?2 AND stored_at >= ?3",
            (url, request, threshold),
            |row| row.get(0),
        );

        match result {
            Ok(body) => Ok(Some(body)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put(&self, url: &str, request: &str, body: &str) -> Result<(), CacheError> {
        self.put_at(url, request, body, Self::current_timestamp_ms())
    }

    fn put_at(&self, url: &str, request: &str, body: &str, stored_at: i64) -> Result<(), CacheError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO responses (url, request, body, stored_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(url, request) DO UPDATE SET
                body = excluded.body,
                stored_at = excluded.stored_at
            "#,
            (url, request, body, stored_at),
        )?;
        Ok(())
    }

    /// Delete expired responses, returning how many were removed.
    pub fn remove_expired(&self) -> Result<usize, CacheError> {
        let threshold = Self::current_timestamp_ms() - self.expiry_ms;
        let conn = self.lock_conn()?;
        let removed = conn.execute("DELETE FROM responses WHERE stored_at < ?1", [threshold])?;
        if removed > 0 {
            debug!("Removed {} expired responses", removed);
        }
        Ok(removed)
    }
}
