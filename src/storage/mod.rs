//! Persistent storage
//!
//! One sled database per process at `{data_dir}/harvest.db`, with a named
//! tree per record family:
//!
//! - `cursors`: ingestion watermarks, key `{server_id}\0{kind}`
//! - `tallies`: per-player head-to-head counts, key `{server_id}\0{player_id}`
//! - `rivalries`: latest prey/nemesis per player, same key shape
//!
//! Values are JSON so records stay readable with generic sled tooling.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub mod cursors;
pub mod tallies;

pub use cursors::{CursorStore, InMemoryCursorStore, SledCursorStore};
pub use tallies::{InMemoryTallyStore, SledTallyStore, TallyStore};

/// Database file name inside the data directory.
pub const DB_FILENAME: &str = "harvest.db";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Cursor for {server_id}/{kind} would move backwards ({current} -> {requested})")]
    CursorRegression {
        server_id: String,
        kind: String,
        current: u64,
        requested: u64,
    },

    #[error("Store lock poisoned")]
    Poisoned,
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// Compose a `{a}\0{b}` tree key.
pub(crate) fn compound_key(a: &str, b: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(a.len() + b.len() + 1);
    key.extend_from_slice(a.as_bytes());
    key.push(0);
    key.extend_from_slice(b.as_bytes());
    key
}

/// Prefix matching every `compound_key(a, _)`.
pub(crate) fn key_prefix(a: &str) -> Vec<u8> {
    compound_key(a, "")
}

/// Handle to the harvester database.
#[derive(Clone)]
pub struct HarvestStore {
    db: Arc<sled::Db>,
}

impl HarvestStore {
    /// Open (or create) the database under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| StorageError::DatabaseError(format!("{}: {e}", data_dir.display())))?;
        let path = data_dir.join(DB_FILENAME);
        let db = sled::open(&path)?;
        tracing::info!(path = %path.display(), "Harvest database opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Throwaway database, removed on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn cursors(&self) -> Result<SledCursorStore, StorageError> {
        Ok(SledCursorStore::new(self.db.open_tree("cursors")?))
    }

    pub fn tallies(&self) -> Result<SledTallyStore, StorageError> {
        Ok(SledTallyStore::new(
            self.db.open_tree("tallies")?,
            self.db.open_tree("rivalries")?,
        ))
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let store = HarvestStore::open(&nested).unwrap();
        assert!(nested.join(DB_FILENAME).exists());
        store.flush().unwrap();
    }

    #[test]
    fn test_compound_keys_do_not_collide() {
        assert_ne!(compound_key("ab", "c"), compound_key("a", "bc"));
        assert!(compound_key("srv", "csv").starts_with(&key_prefix("srv")));
        assert!(!compound_key("srv2", "csv").starts_with(&key_prefix("srv")));
    }
}
