//! Log Harvester: remote game-server log ingestion
//!
//! Polls game servers over a remote filesystem, finds the newest kill CSV and
//! the server text log, reads only the lines added since the last cycle and
//! turns them into structured events for a sink.
//!
//! ## Architecture
//!
//! - **Transport**: one session per server with timeouts, heartbeat and backoff
//! - **Discovery**: server root, newest CSV, text log (directory-cached)
//! - **Reader**: chunked resumable line reads and line-count estimation
//! - **Parsing**: kill CSV records and text-log events
//! - **Pipeline**: harvest cycles, cursor advancement, sinks, scheduling
//! - **Rivalry**: per-player prey/nemesis from accumulated tallies

pub mod config;
pub mod discovery;
pub mod parsing;
pub mod pipeline;
pub mod reader;
pub mod rivalry;
pub mod storage;
pub mod transport;
pub mod types;

// Re-export configuration
pub use config::HarvestConfig;

// Re-export commonly used types
pub use types::{
    ConnectionEvent, DiscoveredFile, EventBatch, FileKind, GameEvent, IngestionCursor, KillEvent,
    PlayerTally, RivalryResult, ServerDescriptor, SuicideCategory,
};

// Re-export pipeline entry points
pub use pipeline::{build_harvester, CycleReport, EventSink, ServerHarvester};

// Re-export storage
pub use storage::{CursorStore, HarvestStore, StorageError, TallyStore};

// Re-export transport
pub use transport::{TransportError, TransportSession};
