use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};
use std::path::Path;
use std::time::Duration;

use super::backend::KeyValueStore;
use crate::error::BackendError;

/// Durable key-value table backed by SQLite
pub struct SqliteStore {
    conn: Connection,
    quota_bytes: Option<usize>,
}

impl SqliteStore {
    /// Open (or create) the store at a file path
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // a crash mid-commit must not leave a torn value behind
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("SQLite journal mode: {mode}");
        let store = Self {
            conn,
            quota_bytes: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Non-persistent store, mainly for tests
    pub fn in_memory() -> SqlResult<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            quota_bytes: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Cap total key+value bytes, like a browser storage quota
    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    fn init_schema(&self) -> SqlResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_items (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;
        Ok(())
    }

    /// Bytes used by every key except `skip_key`
    fn used_bytes_excluding(&self, skip_key: &str) -> SqlResult<usize> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv_items WHERE key != ?1",
            params![skip_key],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as usize)
    }
}

impl KeyValueStore for SqliteStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv_items WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        if let Some(limit) = self.quota_bytes {
            let needed = self.used_bytes_excluding(key)? + key.len() + value.len();
            if needed > limit {
                return Err(BackendError::QuotaExceeded { needed, limit });
            }
        }
        self.conn.execute(
            "INSERT OR REPLACE INTO kv_items (key, value, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), BackendError> {
        self.conn.execute("DELETE FROM kv_items WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.db");
        {
            let mut store = SqliteStore::with_path(&path).unwrap();
            store.set_item("messages", "[]").unwrap();
            store.set_item("messages", "[{\"content\":\"q\"}]").unwrap();
        }
        let store = SqliteStore::with_path(&path).unwrap();
        assert_eq!(
            store.get_item("messages").unwrap().as_deref(),
            Some("[{\"content\":\"q\"}]")
        );
        assert_eq!(store.get_item("messages_backup").unwrap(), None);
    }

    #[test]
    fn quota_rejects_oversized_writes() {
        let mut store = SqliteStore::in_memory().unwrap().with_quota(Some(16));
        store.set_item("a", "0123456789").unwrap();
        let err = store.set_item("b", "0123456789").unwrap_err();
        assert!(matches!(err, BackendError::QuotaExceeded { limit: 16, .. }));

        // Replacing the same key is measured without its old value.
        store.set_item("a", "01234567890123").unwrap();
        store.remove_item("a").unwrap();
        assert_eq!(store.get_item("a").unwrap(), None);
    }
}
