//! SQLite cache backend
//!
//! A single database file can be shared by every service instance on a host
//! and survives restarts. Calls run on tokio's blocking pool.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::CacheBackend;
use crate::error::CacheError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chord_cache (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    expires_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS chord_cache_expiry ON chord_cache (expires_at_ms);
";

/// rusqlite-backed result store with an expiry column
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open or create a cache database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let conn = Connection::open(path.as_ref())?;
        // journal_mode returns a row, so execute() would reject it
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::init(conn)
    }

    /// Private in-memory database, mainly for tests
    pub fn in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| CacheError::Unavailable(format!("cache task failed: {}", e)))?
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM chord_cache WHERE key = ?1 AND expires_at_ms > ?2",
                    params![key, now_ms()],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let key = key.to_string();
        let expires_at = now_ms().saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO chord_cache (key, value, expires_at_ms) \
                 VALUES (?1, ?2, ?3)",
                params![key, value, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM chord_cache WHERE expires_at_ms <= ?1",
                params![now_ms()],
            )?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .set("chords:abc", br#"["C"]"#.to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            backend.get("chords:abc").await.unwrap(),
            Some(br#"["C"]"#.to_vec())
        );
        assert_eq!(backend.get("chords:missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_rows_are_hidden_and_purged() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.set("old", vec![1], Duration::ZERO).await.unwrap();
        backend.set("new", vec![2], Duration::from_secs(60)).await.unwrap();

        assert_eq!(backend.get("old").await.unwrap(), None);
        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert_eq!(backend.get("new").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.set("k", vec![7], Duration::from_secs(60)).await.unwrap();
        }

        let reopened = SqliteBackend::open(&path).unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some(vec![7]));
    }
}
