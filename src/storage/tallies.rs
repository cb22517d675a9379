//! Player tally and rivalry persistence

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{compound_key, key_prefix, StorageError};
use crate::rivalry::record_kill;
use crate::types::{KillEvent, PlayerTally, RivalryResult};

pub trait TallyStore: Send + Sync {
    /// Fold kills into the server's tallies. Returns the number of
    /// head-to-head kills counted.
    fn apply_kills(&self, server_id: &str, kills: &[KillEvent]) -> Result<usize, StorageError>;

    fn load_tallies(&self, server_id: &str) -> Result<Vec<PlayerTally>, StorageError>;

    /// Replace the server's stored rivalries.
    fn store_rivalries(&self, server_id: &str, results: &[RivalryResult]) -> Result<(), StorageError>;

    fn load_rivalries(&self, server_id: &str) -> Result<Vec<RivalryResult>, StorageError>;
}

/// Ids touched by a batch, so only those tallies are read back.
fn touched_players(kills: &[KillEvent]) -> Vec<&str> {
    let mut ids: Vec<&str> = kills
        .iter()
        .flat_map(|k| [k.killer_id.as_deref(), k.victim_id.as_deref()])
        .flatten()
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

// ============================================================================
// sled
// ============================================================================

pub struct SledTallyStore {
    tallies: sled::Tree,
    rivalries: sled::Tree,
}

impl SledTallyStore {
    pub fn new(tallies: sled::Tree, rivalries: sled::Tree) -> Self {
        Self { tallies, rivalries }
    }

    fn scan<T: serde::de::DeserializeOwned>(tree: &sled::Tree, server_id: &str) -> Result<Vec<T>, StorageError> {
        tree.scan_prefix(key_prefix(server_id))
            .values()
            .map(|v| Ok(serde_json::from_slice(&v?)?))
            .collect()
    }
}

impl TallyStore for SledTallyStore {
    fn apply_kills(&self, server_id: &str, kills: &[KillEvent]) -> Result<usize, StorageError> {
        let mut book = BTreeMap::new();
        for id in touched_players(kills) {
            if let Some(bytes) = self.tallies.get(compound_key(server_id, id))? {
                let tally: PlayerTally = serde_json::from_slice(&bytes)?;
                book.insert(id.to_string(), tally);
            }
        }

        let counted = kills.iter().filter(|k| record_kill(&mut book, k)).count();
        if counted == 0 {
            return Ok(0);
        }

        let mut batch = sled::Batch::default();
        for (id, tally) in &book {
            batch.insert(compound_key(server_id, id), serde_json::to_vec(tally)?);
        }
        self.tallies.apply_batch(batch)?;
        self.tallies.flush()?;
        Ok(counted)
    }

    fn load_tallies(&self, server_id: &str) -> Result<Vec<PlayerTally>, StorageError> {
        Self::scan(&self.tallies, server_id)
    }

    fn store_rivalries(&self, server_id: &str, results: &[RivalryResult]) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for key in self.rivalries.scan_prefix(key_prefix(server_id)).keys() {
            batch.remove(key?);
        }
        for result in results {
            batch.insert(compound_key(server_id, &result.player_id), serde_json::to_vec(result)?);
        }
        self.rivalries.apply_batch(batch)?;
        self.rivalries.flush()?;
        Ok(())
    }

    fn load_rivalries(&self, server_id: &str) -> Result<Vec<RivalryResult>, StorageError> {
        Self::scan(&self.rivalries, server_id)
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct InMemoryTallyStore {
    tallies: RwLock<HashMap<String, BTreeMap<String, PlayerTally>>>,
    rivalries: RwLock<HashMap<String, Vec<RivalryResult>>>,
}

impl InMemoryTallyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TallyStore for InMemoryTallyStore {
    fn apply_kills(&self, server_id: &str, kills: &[KillEvent]) -> Result<usize, StorageError> {
        let mut all = self.tallies.write().map_err(|_| StorageError::Poisoned)?;
        let book = all.entry(server_id.to_string()).or_default();
        Ok(kills.iter().filter(|k| record_kill(book, k)).count())
    }

    fn load_tallies(&self, server_id: &str) -> Result<Vec<PlayerTally>, StorageError> {
        let all = self.tallies.read().map_err(|_| StorageError::Poisoned)?;
        Ok(all
            .get(server_id)
            .map(|book| book.values().cloned().collect())
            .unwrap_or_default())
    }

    fn store_rivalries(&self, server_id: &str, results: &[RivalryResult]) -> Result<(), StorageError> {
        let mut all = self.rivalries.write().map_err(|_| StorageError::Poisoned)?;
        all.insert(server_id.to_string(), results.to_vec());
        Ok(())
    }

    fn load_rivalries(&self, server_id: &str) -> Result<Vec<RivalryResult>, StorageError> {
        let all = self.rivalries.read().map_err(|_| StorageError::Poisoned)?;
        Ok(all.get(server_id).cloned().unwrap_or_default())
    }
}
