//! Event sinks
//!
//! A sink takes ownership of a parsed batch for one server. Returning an
//! error means the batch was not accepted; the harvest cycle then leaves
//! the cursor where it was and the same lines are read again next tick.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::storage::{StorageError, TallyStore};
use crate::types::{ConnectionEvent, EventBatch, GameEvent, KillEvent};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("batch rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn accept(&self, server_id: &str, batch: &EventBatch) -> Result<(), SinkError>;

    fn sink_name(&self) -> &'static str;
}

// ============================================================================
// JSON lines
// ============================================================================

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Record<'a> {
    Kill(&'a KillEvent),
    GameEvent(&'a GameEvent),
    Connection(&'a ConnectionEvent),
}

/// Serialize a batch as newline-terminated JSON records.
pub fn batch_to_jsonl(batch: &EventBatch) -> Result<Vec<u8>, serde_json::Error> {
    let records: Vec<Record<'_>> = match batch {
        EventBatch::Csv { kills } => kills.iter().map(Record::Kill).collect(),
        EventBatch::Log { game_events, connections } => game_events
            .iter()
            .map(Record::GameEvent)
            .chain(connections.iter().map(Record::Connection))
            .collect(),
    };
    let mut out = Vec::new();
    for record in &records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Appends each batch to `{output_dir}/{server_id}/{kind}.jsonl`.
pub struct JsonlSink {
    output_dir: PathBuf,
}

impl JsonlSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into() }
    }

    pub fn path_for(&self, server_id: &str, batch: &EventBatch) -> PathBuf {
        self.output_dir
            .join(server_id)
            .join(format!("{}.jsonl", batch.file_kind()))
    }
}

#[async_trait]
impl EventSink for JsonlSink {
    async fn accept(&self, server_id: &str, batch: &EventBatch) -> Result<(), SinkError> {
        let path = self.path_for(server_id, batch);
        let body = batch_to_jsonl(batch)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&body).await?;
        file.flush().await?;
        tracing::debug!(path = %path.display(), records = batch.len(), "Batch appended");
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        "jsonl"
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Collects accepted batches; can be told to reject for failure tests.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<(String, EventBatch)>>,
    reject: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<(String, EventBatch)> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn kills(&self) -> Vec<KillEvent> {
        self.batches()
            .into_iter()
            .flat_map(|(_, batch)| match batch {
                EventBatch::Csv { kills } => kills,
                EventBatch::Log { .. } => Vec::new(),
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn accept(&self, server_id: &str, batch: &EventBatch) -> Result<(), SinkError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("memory sink set to reject".to_string()));
        }
        let mut batches = self
            .batches
            .lock()
            .map_err(|_| SinkError::Rejected("memory sink lock poisoned".to_string()))?;
        batches.push((server_id.to_string(), batch.clone()));
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Tally decorator
// ============================================================================

/// Forwards to `inner`, then folds accepted kills into the tally store.
///
/// Delivery is at-least-once, and so is tallying:
/// - A tally write failure is reported as a sink failure so the batch is
///   redelivered; the inner sink may then see it twice.
/// - Tallies are applied before the harvest cycle advances its cursor. If
///   that cursor write fails, the next cycle rereads the same lines and the
///   kills are counted again, inflating rivalry counts until an operator
///   rebuilds the tallies.
///
/// A cycle cancelled while `inner` is still working (the cycle ceiling)
/// leaves the tallies untouched: they are applied without awaiting, after
/// `inner` returns, and the cycle reaches its cursor write without another
/// await.
pub struct TallyingSink {
    inner: Arc<dyn EventSink>,
    tallies: Arc<dyn TallyStore>,
}

impl TallyingSink {
    pub fn new(inner: Arc<dyn EventSink>, tallies: Arc<dyn TallyStore>) -> Self {
        Self { inner, tallies }
    }
}

#[async_trait]
impl EventSink for TallyingSink {
    async fn accept(&self, server_id: &str, batch: &EventBatch) -> Result<(), SinkError> {
        self.inner.accept(server_id, batch).await?;
        if let EventBatch::Csv { kills } = batch {
            let counted = self.tallies.apply_kills(server_id, kills)?;
            tracing::debug!(server = %server_id, counted, "Tallies updated");
        }
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        self.inner.sink_name()
    }
}
