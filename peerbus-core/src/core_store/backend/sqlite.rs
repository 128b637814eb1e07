//! SQLite storage backend
//!
//! Keys and values are stored as their JSON encoding. The encoding of a
//! `Data` value is deterministic, so the key column can be the primary key.

use super::Backend;
use crate::core_store::errors::{StoreError, StoreResult};
use crate::core_wire::Data;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS store (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        expiry REAL
    );
    CREATE INDEX IF NOT EXISTS idx_store_expiry ON store(expiry);
"#;

pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_manager(SqliteConnectionManager::file(path))
    }

    /// In-memory database. The pool holds a single connection so every
    /// operation sees the same database.
    pub fn memory() -> StoreResult<Self> {
        Self::with_manager(SqliteConnectionManager::memory())
    }

    fn with_manager(manager: SqliteConnectionManager) -> StoreResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(|e| StoreError::Storage(format!("Failed to create pool: {}", e)))?;
        let backend = Self { pool };
        backend.conn()?.execute_batch(SCHEMA)?;
        Ok(backend)
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| StoreError::Storage(format!("Failed to get connection: {}", e)))
    }
}

fn encode(data: &Data) -> StoreResult<String> {
    Ok(serde_json::to_string(data)?)
}

fn decode(text: &str) -> StoreResult<Data> {
    Ok(serde_json::from_str(text)?)
}

impl Backend for SqliteBackend {
    fn put(&mut self, key: Data, value: Data, expiry: Option<f64>) -> StoreResult<()> {
        self.conn()?.execute(
            "INSERT INTO store (key, value, expiry) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expiry = excluded.expiry",
            params![encode(&key)?, encode(&value)?, expiry],
        )?;
        Ok(())
    }

    fn get(&self, key: &Data) -> StoreResult<Option<Data>> {
        let text: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM store WHERE key = ?1",
                params![encode(key)?],
                |row| row.get(0),
            )
            .optional()?;
        text.as_deref().map(decode).transpose()
    }

    fn erase(&mut self, key: &Data) -> StoreResult<bool> {
        let n = self
            .conn()?
            .execute("DELETE FROM store WHERE key = ?1", params![encode(key)?])?;
        Ok(n > 0)
    }

    fn clear(&mut self) -> StoreResult<()> {
        self.conn()?.execute("DELETE FROM store", [])?;
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<Data>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM store")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(decode(&row?)?);
        }
        keys.sort();
        Ok(keys)
    }

    fn entries(&self) -> StoreResult<Vec<(Data, Data)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM store")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (k, v) = row?;
            entries.push((decode(&k)?, decode(&v)?));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn expire(&mut self, now: f64) -> StoreResult<Vec<Data>> {
        let conn = self.conn()?;
        let expired = {
            let mut stmt =
                conn.prepare("SELECT key FROM store WHERE expiry IS NOT NULL AND expiry <= ?1")?;
            let rows = stmt.query_map(params![now], |row| row.get::<_, String>(0))?;
            let mut keys = Vec::new();
            for row in rows {
                keys.push(decode(&row?)?);
            }
            keys
        };
        if !expired.is_empty() {
            conn.execute(
                "DELETE FROM store WHERE expiry IS NOT NULL AND expiry <= ?1",
                params![now],
            )?;
        }
        Ok(expired)
    }

    fn len(&self) -> StoreResult<usize> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM store", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_sqlite_put_get_overwrite() {
        let mut backend = SqliteBackend::memory().unwrap();
        backend.put(Data::from("a"), Data::Count(1), None).unwrap();
        backend.put(Data::from("a"), Data::Count(2), None).unwrap();

        assert_eq!(backend.get(&Data::from("a")).unwrap(), Some(Data::Count(2)));
        assert_eq!(backend.len().unwrap(), 1);
        assert_eq!(backend.get(&Data::from("missing")).unwrap(), None);
    }

    #[test]
    fn test_sqlite_complex_keys() {
        let mut backend = SqliteBackend::memory().unwrap();
        let key = Data::Table(BTreeMap::from([(Data::Count(1), Data::from("x"))]));
        backend.put(key.clone(), Data::Boolean(true), None).unwrap();
        assert_eq!(backend.keys().unwrap(), vec![key.clone()]);
        assert!(backend.erase(&key).unwrap());
    }

    #[test]
    fn test_sqlite_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite");
        {
            let mut backend = SqliteBackend::open(&path).unwrap();
            backend.put(Data::from("k"), Data::Integer(-4), None).unwrap();
        }
        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.get(&Data::from("k")).unwrap(), Some(Data::Integer(-4)));
    }

    #[test]
    fn test_sqlite_expire() {
        let mut backend = SqliteBackend::memory().unwrap();
        backend.put(Data::from("a"), Data::Count(1), Some(5.0)).unwrap();
        backend.put(Data::from("b"), Data::Count(2), None).unwrap();
        assert_eq!(backend.expire(6.0).unwrap(), vec![Data::from("a")]);
        assert_eq!(backend.keys().unwrap(), vec![Data::from("b")]);
    }
}
