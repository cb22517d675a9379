//! Harvest bookkeeping: file kinds, discovered files, ingestion cursors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConnectionEvent, GameEvent, KillEvent};

/// The two record streams harvested from each server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Semicolon-delimited kill/death CSV
    Csv,
    /// Free-text server log
    Log,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Csv => "csv",
            FileKind::Log => "log",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(FileKind::Csv),
            "log" => Ok(FileKind::Log),
            other => Err(format!("unknown file kind '{other}' (expected csv or log)")),
        }
    }
}

/// Where a discovered file's timestamp came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    /// Embedded `YYYY.MM.DD-HH.MM.SS` in the file name
    Filename,
    /// Remote modification time
    Mtime,
    /// Neither was available; sorted as the epoch
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredFile {
    pub path: String,
    pub raw_name: String,
    pub inferred_timestamp: DateTime<Utc>,
    pub timestamp_source: TimestampSource,
}

/// Persisted line watermark for one (server, kind) stream.
///
/// `last_line_index` counts records of `file_path` already handed to the
/// sink; it is the number of lines to skip on the next read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestionCursor {
    pub server_id: String,
    pub file_kind: FileKind,
    #[serde(default)]
    pub file_path: Option<String>,
    pub last_line_index: u64,
    pub updated_at: DateTime<Utc>,
}

impl IngestionCursor {
    pub fn new(server_id: &str, file_kind: FileKind) -> Self {
        Self {
            server_id: server_id.to_string(),
            file_kind,
            file_path: None,
            last_line_index: 0,
            updated_at: Utc::now(),
        }
    }

    /// Watermark to resume `path` from. A different file starts at zero.
    pub fn start_line_for(&self, path: &str) -> u64 {
        match self.file_path.as_deref() {
            Some(p) if p == path => self.last_line_index,
            _ => 0,
        }
    }
}

/// Parsed events handed to a sink in one call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBatch {
    Csv {
        kills: Vec<KillEvent>,
    },
    Log {
        game_events: Vec<GameEvent>,
        connections: Vec<ConnectionEvent>,
    },
}

impl EventBatch {
    pub fn file_kind(&self) -> FileKind {
        match self {
            EventBatch::Csv { .. } => FileKind::Csv,
            EventBatch::Log { .. } => FileKind::Log,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EventBatch::Csv { kills } => kills.len(),
            EventBatch::Log { game_events, connections } => game_events.len() + connections.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_resumes_only_same_file() {
        let mut cursor = IngestionCursor::new("7020", FileKind::Csv);
        cursor.file_path = Some("deathlogs/world_0/a.csv".to_string());
        cursor.last_line_index = 42;

        assert_eq!(cursor.start_line_for("deathlogs/world_0/a.csv"), 42);
        assert_eq!(cursor.start_line_for("deathlogs/world_0/b.csv"), 0);
    }

    #[test]
    fn test_file_kind_parse() {
        assert_eq!("CSV".parse::<FileKind>(), Ok(FileKind::Csv));
        assert_eq!("log".parse::<FileKind>(), Ok(FileKind::Log));
        assert!("txt".parse::<FileKind>().is_err());
    }
}
