//! Shared data structures for the log harvesting pipeline
//!
//! - Server descriptors and credentials (configuration input)
//! - Structured events emitted by the line parsers
//! - Ingestion cursors and discovered files (harvest bookkeeping)
//! - Player tallies and rivalry results (aggregation)

mod events;
mod harvest;
mod rivalry;
mod server;

pub use events::*;
pub use harvest::*;
pub use rivalry::*;
pub use server::*;
