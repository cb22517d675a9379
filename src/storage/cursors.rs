//! Ingestion cursor persistence
//!
//! A cursor is the number of records of its file already accepted by the
//! sink. It only moves forward while the file stays the same; switching to
//! a new file (or detecting rotation) is the only way back to zero, apart
//! from an explicit operator reset.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{compound_key, StorageError};
use crate::types::{FileKind, IngestionCursor};

pub trait CursorStore: Send + Sync {
    fn load(&self, server_id: &str, kind: FileKind) -> Result<Option<IngestionCursor>, StorageError>;

    /// Write a cursor unconditionally.
    fn save(&self, cursor: &IngestionCursor) -> Result<(), StorageError>;

    /// Remove the cursor; returns whether one existed.
    fn reset(&self, server_id: &str, kind: FileKind) -> Result<bool, StorageError>;

    fn list(&self) -> Result<Vec<IngestionCursor>, StorageError>;

    fn backend_name(&self) -> &'static str;

    /// Move the watermark for `file_path` to `line_index`.
    ///
    /// Rejects a lower index on the same file. A different file replaces the
    /// stored one outright.
    fn advance(
        &self,
        server_id: &str,
        kind: FileKind,
        file_path: &str,
        line_index: u64,
    ) -> Result<IngestionCursor, StorageError> {
        if let Some(current) = self.load(server_id, kind)? {
            if current.file_path.as_deref() == Some(file_path) && line_index < current.last_line_index {
                return Err(StorageError::CursorRegression {
                    server_id: server_id.to_string(),
                    kind: kind.to_string(),
                    current: current.last_line_index,
                    requested: line_index,
                });
            }
        }
        let cursor = IngestionCursor {
            server_id: server_id.to_string(),
            file_kind: kind,
            file_path: Some(file_path.to_string()),
            last_line_index: line_index,
            updated_at: Utc::now(),
        };
        self.save(&cursor)?;
        Ok(cursor)
    }
}

// ============================================================================
// sled
// ============================================================================

pub struct SledCursorStore {
    tree: sled::Tree,
}

impl SledCursorStore {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }
}

impl CursorStore for SledCursorStore {
    fn load(&self, server_id: &str, kind: FileKind) -> Result<Option<IngestionCursor>, StorageError> {
        match self.tree.get(compound_key(server_id, kind.as_str()))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, cursor: &IngestionCursor) -> Result<(), StorageError> {
        let key = compound_key(&cursor.server_id, cursor.file_kind.as_str());
        self.tree.insert(key, serde_json::to_vec(cursor)?)?;
        self.tree.flush()?;
        Ok(())
    }

    fn reset(&self, server_id: &str, kind: FileKind) -> Result<bool, StorageError> {
        let removed = self.tree.remove(compound_key(server_id, kind.as_str()))?;
        self.tree.flush()?;
        Ok(removed.is_some())
    }

    fn list(&self) -> Result<Vec<IngestionCursor>, StorageError> {
        self.tree
            .iter()
            .values()
            .map(|v| Ok(serde_json::from_slice(&v?)?))
            .collect()
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<(String, FileKind), IngestionCursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for InMemoryCursorStore {
    fn load(&self, server_id: &str, kind: FileKind) -> Result<Option<IngestionCursor>, StorageError> {
        let cursors = self.cursors.read().map_err(|_| StorageError::Poisoned)?;
        Ok(cursors.get(&(server_id.to_string(), kind)).cloned())
    }

    fn save(&self, cursor: &IngestionCursor) -> Result<(), StorageError> {
        let mut cursors = self.cursors.write().map_err(|_| StorageError::Poisoned)?;
        cursors.insert((cursor.server_id.clone(), cursor.file_kind), cursor.clone());
        Ok(())
    }

    fn reset(&self, server_id: &str, kind: FileKind) -> Result<bool, StorageError> {
        let mut cursors = self.cursors.write().map_err(|_| StorageError::Poisoned)?;
        Ok(cursors.remove(&(server_id.to_string(), kind)).is_some())
    }

    fn list(&self) -> Result<Vec<IngestionCursor>, StorageError> {
        let cursors = self.cursors.read().map_err(|_| StorageError::Poisoned)?;
        let mut all: Vec<_> = cursors.values().cloned().collect();
        all.sort_by(|a, b| (&a.server_id, a.file_kind).cmp(&(&b.server_id, b.file_kind)));
        Ok(all)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::HarvestStore;

    fn exercise(store: &dyn CursorStore) {
        assert!(store.load("7020", FileKind::Csv).unwrap().is_none());

        store.advance("7020", FileKind::Csv, "a.csv", 10).unwrap();
        store.advance("7020", FileKind::Csv, "a.csv", 25).unwrap();
        let cursor = store.load("7020", FileKind::Csv).unwrap().unwrap();
        assert_eq!(cursor.last_line_index, 25);
        assert_eq!(cursor.file_path.as_deref(), Some("a.csv"));

        let err = store.advance("7020", FileKind::Csv, "a.csv", 5).unwrap_err();
        assert!(matches!(err, StorageError::CursorRegression { current: 25, requested: 5, .. }));

        // New file may start over
        store.advance("7020", FileKind::Csv, "b.csv", 0).unwrap();
        assert_eq!(store.load("7020", FileKind::Csv).unwrap().unwrap().start_line_for("b.csv"), 0);

        // Kinds and servers are independent
        store.advance("7020", FileKind::Log, "Deadside.log", 3).unwrap();
        store.advance("9000", FileKind::Csv, "c.csv", 1).unwrap();
        assert_eq!(store.list().unwrap().len(), 3);

        assert!(store.reset("7020", FileKind::Csv).unwrap());
        assert!(!store.reset("7020", FileKind::Csv).unwrap());
        assert!(store.load("7020", FileKind::Csv).unwrap().is_none());
    }

    #[test]
    fn test_in_memory_store() {
        exercise(&InMemoryCursorStore::new());
    }

    #[test]
    fn test_sled_store() {
        let store = HarvestStore::temporary().unwrap();
        exercise(&store.cursors().unwrap());
    }

    #[test]
    fn test_sled_cursor_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = HarvestStore::open(dir.path()).unwrap();
            store.cursors().unwrap().advance("7020", FileKind::Log, "Logs/Deadside.log", 812).unwrap();
        }
        let store = HarvestStore::open(dir.path()).unwrap();
        let cursor = store.cursors().unwrap().load("7020", FileKind::Log).unwrap().unwrap();
        assert_eq!(cursor.last_line_index, 812);
    }
}
