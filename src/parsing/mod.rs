//! Line parsers
//!
//! Pure functions from one raw line to a structured event, a discard, or a
//! distinct parse failure. No I/O and no shared state beyond the compiled
//! classification tables.

pub mod kill_csv;
pub mod log_text;
pub mod suicide;
pub mod timestamp;

pub use kill_csv::{KillBatch, KillLineParser, ParseFailure};
pub use log_text::{LogLine, LogLineParser};
pub use suicide::{normalize_weapon, SuicideClassifier};
pub use timestamp::{find_embedded_timestamp, parse_log_timestamp};

use crate::config::HarvestConfig;

/// Build both parsers from the configured classification tables.
pub fn parsers_from_config(config: &HarvestConfig) -> Result<(KillLineParser, LogLineParser), regex::Error> {
    let kills = KillLineParser::new(SuicideClassifier::new(&config.suicide_categories));
    let log = LogLineParser::new(&config.game_events)?;
    Ok((kills, log))
}
