//! Event types produced by the line parsers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification of a suicide by its weapon/cause field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuicideCategory {
    /// Player used the in-game relocation/respawn menu
    Menu,
    Fall,
    Vehicle,
    #[default]
    Other,
}

impl SuicideCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SuicideCategory::Menu => "menu",
            SuicideCategory::Fall => "fall",
            SuicideCategory::Vehicle => "vehicle",
            SuicideCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for SuicideCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One kill record from the death-log CSV.
///
/// Names and ids are `None` when the source field was empty (environmental
/// deaths, anonymised players). Console fields only exist in the newer
/// 9-field format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KillEvent {
    pub timestamp: DateTime<Utc>,
    pub killer_name: Option<String>,
    pub killer_id: Option<String>,
    pub victim_name: Option<String>,
    pub victim_id: Option<String>,
    pub weapon: String,
    /// Distance in meters
    pub distance: f64,
    pub killer_console: Option<String>,
    pub victim_console: Option<String>,
    pub is_suicide: bool,
    /// Set only when `is_suicide` is true
    pub suicide_category: Option<SuicideCategory>,
}

/// Player join/leave direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionAction {
    Connected,
    Disconnected,
}

impl std::str::FromStr for ConnectionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(ConnectionAction::Connected),
            "disconnected" => Ok(ConnectionAction::Disconnected),
            other => Err(format!("unknown connection action '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionEvent {
    pub timestamp: DateTime<Utc>,
    pub player_id: String,
    pub player_name: String,
    pub action: ConnectionAction,
}

/// A world event announced in the text log (mission, airdrop, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEvent {
    pub timestamp: DateTime<Utc>,
    /// Pattern name that matched, e.g. `"airdrop"`
    pub kind: String,
    /// Captured groups in pattern order
    pub details: Vec<String>,
}
