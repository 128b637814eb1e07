//! Storage backends for master stores

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use super::errors::StoreResult;
use crate::core_wire::Data;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOptions {
    /// Database file for the sqlite backend
    pub path: Option<PathBuf>,
}

impl BackendOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

/// Key-value storage behind a master store. Expiry times are absolute
/// seconds on the manager clock.
pub trait Backend {
    fn put(&mut self, key: Data, value: Data, expiry: Option<f64>) -> StoreResult<()>;

    fn get(&self, key: &Data) -> StoreResult<Option<Data>>;

    /// Returns whether the key existed
    fn erase(&mut self, key: &Data) -> StoreResult<bool>;

    fn clear(&mut self) -> StoreResult<()>;

    fn keys(&self) -> StoreResult<Vec<Data>>;

    fn entries(&self) -> StoreResult<Vec<(Data, Data)>>;

    /// Remove entries whose expiry is at or before `now`, returning their keys
    fn expire(&mut self, now: f64) -> StoreResult<Vec<Data>>;

    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Open a backend for store `name`. Without an explicit path the sqlite
/// backend uses `<sqlite_dir>/<name>.sqlite`, or an in-memory database
/// when no directory is configured.
pub fn open_backend(
    name: &str,
    backend: BackendType,
    options: &BackendOptions,
    sqlite_dir: Option<&Path>,
) -> StoreResult<Box<dyn Backend>> {
    match backend {
        BackendType::Memory => Ok(Box::new(MemoryBackend::new())),
        BackendType::Sqlite => {
            let path = options
                .path
                .clone()
                .or_else(|| sqlite_dir.map(|dir| dir.join(format!("{}.sqlite", sanitize(name)))));
            let backend = match path {
                Some(path) => SqliteBackend::open(&path)?,
                None => SqliteBackend::memory()?,
            };
            Ok(Box::new(backend))
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_store_name() {
        assert_eq!(sanitize("site/known/hosts"), "site_known_hosts");
    }

    #[test]
    fn test_open_sqlite_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend =
            open_backend("a/b", BackendType::Sqlite, &BackendOptions::default(), Some(dir.path()))
                .unwrap();
        backend.put(Data::from("k"), Data::Count(1), None).unwrap();
        assert!(dir.path().join("a_b.sqlite").exists());
    }
}
