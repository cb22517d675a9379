//! Free-text server log parser.
//!
//! Two line shapes are recognised:
//!
//! - `[2025.05.01-12.34.56:123][...] ... Player Name (a1b2c3) connected`
//! - `[<timestamp>] ...` followed by text matching one of the configured
//!   game-event patterns (mission, airdrop, ...)
//!
//! Everything else is discarded.

use regex::Regex;

use super::timestamp::parse_log_timestamp;
use crate::config::GameEventPattern;
use crate::types::{ConnectionAction, ConnectionEvent, GameEvent};

const CONNECTION_PATTERN: &str = r"\[([\d.\-]+)-([\d.]+)(?::\d+)?\].*Player (\S+) \(([0-9a-fA-F]+)\) (connected|disconnected)";

const LEADING_TIMESTAMP: &str = r"^\s*\[([^\]]+)\]";

/// Classification of one log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogLine {
    Connection(ConnectionEvent),
    Game(GameEvent),
    Discard,
}

#[derive(Debug, Clone)]
pub struct LogLineParser {
    connection: Regex,
    leading_timestamp: Regex,
    patterns: Vec<(String, Regex)>,
}

impl LogLineParser {
    /// Compile the connection matcher and the ordered game-event table.
    pub fn new(patterns: &[GameEventPattern]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Ok((p.kind.clone(), Regex::new(&p.pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            connection: Regex::new(CONNECTION_PATTERN)?,
            leading_timestamp: Regex::new(LEADING_TIMESTAMP)?,
            patterns,
        })
    }

    pub fn parse_line(&self, line: &str) -> LogLine {
        if let Some(event) = self.parse_connection(line) {
            return LogLine::Connection(event);
        }
        self.parse_game_event(line).map_or(LogLine::Discard, LogLine::Game)
    }

    fn parse_connection(&self, line: &str) -> Option<ConnectionEvent> {
        let caps = self.connection.captures(line)?;
        let timestamp = parse_log_timestamp(&format!("{}-{}", &caps[1], &caps[2]))?;
        Some(ConnectionEvent {
            timestamp,
            player_name: caps[3].to_string(),
            player_id: caps[4].to_string(),
            action: caps[5].parse().ok()?,
        })
    }

    fn parse_game_event(&self, line: &str) -> Option<GameEvent> {
        let stamp = self.leading_timestamp.captures(line)?;
        let timestamp = parse_log_timestamp(&stamp[1])?;
        let body = &line[stamp.get(0)?.end()..];

        self.patterns.iter().find_map(|(kind, re)| {
            let caps = re.captures(body)?;
            let details = caps
                .iter()
                .skip(1)
                .map(|m| m.map_or_else(String::new, |m| m.as_str().trim().to_string()))
                .collect();
            Some(GameEvent { timestamp, kind: kind.clone(), details })
        })
    }

    /// Parse lines in order into `(game_events, connection_events)`.
    pub fn parse_batch<'a, I>(&self, lines: I) -> (Vec<GameEvent>, Vec<ConnectionEvent>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut game = Vec::new();
        let mut connections = Vec::new();
        for line in lines {
            match self.parse_line(line) {
                LogLine::Connection(c) => connections.push(c),
                LogLine::Game(g) => game.push(g),
                LogLine::Discard => {}
            }
        }
        (game, connections)
    }
}
