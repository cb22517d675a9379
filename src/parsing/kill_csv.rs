//! Kill/death CSV line parser.
//!
//! Record layout, `;`-delimited:
//!
//! ```text
//! timestamp;killerName;killerId;victimName;victimId;weapon;distance[;killerConsole;victimConsole]
//! ```
//!
//! The 7-field layout predates console tracking; the 9-field layout appends
//! the two console columns. Both are accepted without a version flag and
//! any further trailing fields are ignored.

use thiserror::Error;

use super::suicide::SuicideClassifier;
use super::timestamp::parse_log_timestamp;
use crate::types::KillEvent;

/// Fields required by the oldest layout.
pub const MIN_FIELDS: usize = 7;

/// Why a CSV line produced no event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("blank line")]
    Blank,

    #[error("expected at least {MIN_FIELDS} fields, found {found}")]
    TooFewFields { found: usize },

    #[error("distance '{0}' is not a number")]
    InvalidDistance(String),

    #[error("unparseable timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Result of parsing many lines at once.
#[derive(Debug, Default)]
pub struct KillBatch {
    pub events: Vec<KillEvent>,
    /// Malformed lines (blank lines are not counted)
    pub failures: usize,
    pub blank: usize,
    /// First malformed line and its reason, for diagnostics
    pub first_failure: Option<(String, ParseFailure)>,
}

#[derive(Debug, Clone, Default)]
pub struct KillLineParser {
    classifier: SuicideClassifier,
}

impl KillLineParser {
    pub fn new(classifier: SuicideClassifier) -> Self {
        Self { classifier }
    }

    /// Parse one record. Pure; never panics on arbitrary input.
    pub fn parse_line(&self, line: &str) -> Result<KillEvent, ParseFailure> {
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() {
            return Err(ParseFailure::Blank);
        }

        let fields: Vec<&str> = line.split(';').map(str::trim).collect();
        if fields.len() < MIN_FIELDS {
            return Err(ParseFailure::TooFewFields { found: fields.len() });
        }

        let timestamp = parse_log_timestamp(fields[0])
            .ok_or_else(|| ParseFailure::InvalidTimestamp(fields[0].to_string()))?;

        let distance = fields[6]
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite())
            .ok_or_else(|| ParseFailure::InvalidDistance(fields[6].to_string()))?;

        let killer_id = present(fields[2]);
        let victim_id = present(fields[4]);
        let weapon = fields[5].to_string();

        let is_suicide = matches!((&killer_id, &victim_id), (Some(k), Some(v)) if k == v);
        let suicide_category = is_suicide.then(|| self.classifier.classify(&weapon));

        Ok(KillEvent {
            timestamp,
            killer_name: present(fields[1]),
            killer_id,
            victim_name: present(fields[3]),
            victim_id,
            weapon,
            distance,
            killer_console: fields.get(7).and_then(|f| present(f)),
            victim_console: fields.get(8).and_then(|f| present(f)),
            is_suicide,
            suicide_category,
        })
    }

    /// Parse lines in order, collecting events and counting failures.
    pub fn parse_batch<'a, I>(&self, lines: I) -> KillBatch
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut batch = KillBatch::default();
        for line in lines {
            match self.parse_line(line) {
                Ok(event) => batch.events.push(event),
                Err(ParseFailure::Blank) => batch.blank += 1,
                Err(reason) => {
                    tracing::debug!(line = %line, reason = %reason, "Skipping malformed CSV line");
                    batch.failures += 1;
                    if batch.first_failure.is_none() {
                        batch.first_failure = Some((line.to_string(), reason));
                    }
                }
            }
        }
        batch
    }
}

/// Empty field means "missing", not a failure.
fn present(field: &str) -> Option<String> {
    (!field.is_empty()).then(|| field.to_string())
}
