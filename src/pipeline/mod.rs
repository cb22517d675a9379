//! Harvest pipeline
//!
//! ```text
//! tick ─> connect ─> discover ─> read ─> parse ─> sink ─> advance cursor
//! ```
//!
//! Each server gets its own [`ServerHarvester`] owned by one task, so cursor
//! writes for a (server, kind) pair never race.

pub mod cycle;
pub mod scheduler;
pub mod sink;

pub use cycle::{Backlog, CycleError, CyclePhase, CycleReport, ServerHarvester};
pub use scheduler::{recompute_rivalries, run_bounded_cycle, run_rivalries, run_server, HarvestSummary};
pub use sink::{batch_to_jsonl, EventSink, JsonlSink, MemorySink, SinkError, TallyingSink};

use std::sync::Arc;
use std::time::Duration;

use crate::config::HarvestConfig;
use crate::discovery::FileDiscovery;
use crate::parsing::parsers_from_config;
use crate::reader::ChunkedReader;
use crate::storage::CursorStore;
use crate::transport::{Connector, TransportSession};
use crate::types::ServerDescriptor;

/// Assemble a harvester for `server` from the loaded configuration.
pub fn build_harvester(
    config: &HarvestConfig,
    server: ServerDescriptor,
    connector: Arc<dyn Connector>,
    cursors: Arc<dyn CursorStore>,
    sink: Arc<dyn EventSink>,
) -> Result<ServerHarvester, regex::Error> {
    let (kill_parser, log_parser) = parsers_from_config(config)?;
    let session = TransportSession::new(
        server,
        connector,
        config.transport.clone(),
        Duration::from_secs(config.discovery.dir_cache_ttl_secs),
    );
    Ok(ServerHarvester::new(
        session,
        FileDiscovery::new(config.discovery.clone()),
        ChunkedReader::new(config.reader.clone()),
        kill_parser,
        log_parser,
        cursors,
        sink,
        config.harvest.max_lines_per_cycle,
    ))
}
