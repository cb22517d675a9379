//! Player tallies and prey/nemesis results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kill count against (or by) one opponent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OpponentCount {
    pub name: String,
    pub count: u32,
}

/// Head-to-head kill/death counts for one player on one server.
///
/// Maps are keyed by opponent id; `BTreeMap` keeps iteration order stable so
/// tie-breaking in the rivalry computation is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PlayerTally {
    pub player_id: String,
    pub player_name: String,
    /// Opponents this player killed
    #[serde(default)]
    pub victims: BTreeMap<String, OpponentCount>,
    /// Opponents who killed this player
    #[serde(default)]
    pub killers: BTreeMap<String, OpponentCount>,
}

impl PlayerTally {
    pub fn new(player_id: &str, player_name: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            player_name: player_name.to_string(),
            ..Default::default()
        }
    }

    pub fn total_kills(&self) -> u32 {
        self.victims.values().map(|o| o.count).sum()
    }

    pub fn total_deaths(&self) -> u32 {
        self.killers.values().map(|o| o.count).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RivalEntry {
    pub player_id: String,
    pub player_name: String,
    /// Kills in the relationship's primary direction
    pub kill_count: u32,
    /// Kills in the opposite direction
    pub death_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RivalryResult {
    pub player_id: String,
    /// Opponent this player kills most
    pub prey: Option<RivalEntry>,
    /// Opponent who kills this player most
    pub nemesis: Option<RivalEntry>,
    pub computed_at: DateTime<Utc>,
}
