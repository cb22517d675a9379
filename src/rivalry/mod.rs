//! Prey/nemesis aggregation
//!
//! Tallies fold kill events into per-player head-to-head counts; the
//! rivalry computation is a pure function over a server's tallies. It is
//! recomputed from scratch each run, so reruns over the same tallies yield
//! identical results.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::types::{KillEvent, OpponentCount, PlayerTally, RivalEntry, RivalryResult};

// ============================================================================
// Tally folding
// ============================================================================

fn bump(map: &mut BTreeMap<String, OpponentCount>, id: &str, name: &str) {
    let entry = map.entry(id.to_string()).or_default();
    entry.count += 1;
    entry.name = name.to_string();
}

/// Fold one kill into `tallies` (keyed by player id).
///
/// Suicides and kills with a missing side are not head-to-head and are
/// skipped. Returns whether the event was counted. The most recent name
/// seen for a player wins.
pub fn record_kill(tallies: &mut BTreeMap<String, PlayerTally>, event: &KillEvent) -> bool {
    let (Some(killer_id), Some(victim_id)) = (&event.killer_id, &event.victim_id) else {
        return false;
    };
    if event.is_suicide || killer_id == victim_id {
        return false;
    }
    let killer_name = event.killer_name.as_deref().unwrap_or(killer_id);
    let victim_name = event.victim_name.as_deref().unwrap_or(victim_id);

    let killer = tallies
        .entry(killer_id.clone())
        .or_insert_with(|| PlayerTally::new(killer_id, killer_name));
    killer.player_name = killer_name.to_string();
    bump(&mut killer.victims, victim_id, victim_name);

    let victim = tallies
        .entry(victim_id.clone())
        .or_insert_with(|| PlayerTally::new(victim_id, victim_name));
    victim.player_name = victim_name.to_string();
    bump(&mut victim.killers, killer_id, killer_name);

    true
}

/// Build tallies from scratch.
pub fn build_tallies<'a, I>(events: I) -> BTreeMap<String, PlayerTally>
where
    I: IntoIterator<Item = &'a KillEvent>,
{
    let mut tallies = BTreeMap::new();
    for event in events {
        record_kill(&mut tallies, event);
    }
    tallies
}

// ============================================================================
// Rivalry computation
// ============================================================================

/// Highest count at or above `min_kills`; ties keep the first in id order.
fn strongest(map: &BTreeMap<String, OpponentCount>, min_kills: u32) -> Option<(&String, &OpponentCount)> {
    let mut best: Option<(&String, &OpponentCount)> = None;
    for (id, opponent) in map {
        if opponent.count < min_kills {
            continue;
        }
        if best.map_or(true, |(_, b)| opponent.count > b.count) {
            best = Some((id, opponent));
        }
    }
    best
}

/// Prey and nemesis for one player.
pub fn compute_for_player(tally: &PlayerTally, min_kills: u32, computed_at: DateTime<Utc>) -> RivalryResult {
    let prey = strongest(&tally.victims, min_kills).map(|(id, victim)| RivalEntry {
        player_id: id.clone(),
        player_name: victim.name.clone(),
        kill_count: victim.count,
        death_count: tally.killers.get(id).map_or(0, |k| k.count),
    });
    let nemesis = strongest(&tally.killers, min_kills).map(|(id, killer)| RivalEntry {
        player_id: id.clone(),
        player_name: killer.name.clone(),
        kill_count: killer.count,
        death_count: tally.victims.get(id).map_or(0, |v| v.count),
    });
    RivalryResult {
        player_id: tally.player_id.clone(),
        prey,
        nemesis,
        computed_at,
    }
}

/// One result per tally, in input order.
pub fn compute_rivalries(tallies: &[PlayerTally], min_kills: u32, computed_at: DateTime<Utc>) -> Vec<RivalryResult> {
    tallies
        .iter()
        .map(|t| compute_for_player(t, min_kills, computed_at))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opponents(entries: &[(&str, u32)]) -> BTreeMap<String, OpponentCount> {
        entries
            .iter()
            .map(|(id, count)| (id.to_string(), OpponentCount { name: format!("name-{id}"), count: *count }))
            .collect()
    }

    fn tally(victims: &[(&str, u32)], killers: &[(&str, u32)]) -> PlayerTally {
        PlayerTally {
            player_id: "A".to_string(),
            player_name: "Alice".to_string(),
            victims: opponents(victims),
            killers: opponents(killers),
        }
    }

    fn kill(killer: Option<&str>, victim: Option<&str>) -> KillEvent {
        KillEvent {
            timestamp: Utc::now(),
            killer_name: killer.map(|k| format!("n{k}")),
            killer_id: killer.map(str::to_string),
            victim_name: victim.map(|v| format!("n{v}")),
            victim_id: victim.map(str::to_string),
            weapon: "M4A1".to_string(),
            distance: 10.0,
            killer_console: None,
            victim_console: None,
            is_suicide: killer.is_some() && killer == victim,
            suicide_category: None,
        }
    }

    #[test]
    fn test_prey_is_highest_victim() {
        let t = tally(&[("B", 5), ("C", 2)], &[("B", 1)]);
        let r = compute_for_player(&t, 3, Utc::now());
        let prey = r.prey.unwrap();
        assert_eq!(prey.player_id, "B");
        assert_eq!(prey.kill_count, 5);
        assert_eq!(prey.death_count, 1);
        assert!(r.nemesis.is_none());
    }

    #[test]
    fn test_below_threshold_is_none() {
        let t = tally(&[("B", 2), ("C", 2)], &[("D", 2)]);
        let r = compute_for_player(&t, 3, Utc::now());
        assert!(r.prey.is_none());
        assert!(r.nemesis.is_none());
    }

    #[test]
    fn test_ties_keep_first_in_id_order() {
        let t = tally(&[("C", 4), ("B", 4)], &[("Z", 3), ("Y", 3)]);
        let r = compute_for_player(&t, 3, Utc::now());
        assert_eq!(r.prey.unwrap().player_id, "B");
        assert_eq!(r.nemesis.unwrap().player_id, "Y");
    }

    #[test]
    fn test_nemesis_counts_both_directions() {
        let t = tally(&[("K", 2)], &[("K", 6)]);
        let nemesis = compute_for_player(&t, 3, Utc::now()).nemesis.unwrap();
        assert_eq!(nemesis.kill_count, 6);
        assert_eq!(nemesis.death_count, 2);
    }

    #[test]
    fn test_rerun_is_identical() {
        let tallies = vec![tally(&[("B", 5)], &[("C", 7)]), tally(&[], &[])];
        let at = Utc::now();
        assert_eq!(compute_rivalries(&tallies, 3, at), compute_rivalries(&tallies, 3, at));
    }

    #[test]
    fn test_record_kill_skips_suicides_and_missing() {
        let mut tallies = BTreeMap::new();
        assert!(!record_kill(&mut tallies, &kill(Some("1"), Some("1"))));
        assert!(!record_kill(&mut tallies, &kill(None, Some("1"))));
        assert!(tallies.is_empty());

        assert!(record_kill(&mut tallies, &kill(Some("1"), Some("2"))));
        assert_eq!(tallies["1"].victims["2"].count, 1);
        assert_eq!(tallies["2"].killers["1"].count, 1);
        assert_eq!(tallies["2"].killers["1"].name, "n1");
    }

    #[test]
    fn test_build_then_compute() {
        let mut events: Vec<KillEvent> = (0..5).map(|_| kill(Some("A"), Some("B"))).collect();
        events.extend((0..2).map(|_| kill(Some("A"), Some("C"))));
        events.push(kill(Some("B"), Some("A")));

        let tallies: Vec<PlayerTally> = build_tallies(&events).into_values().collect();
        let results = compute_rivalries(&tallies, 3, Utc::now());
        let a = results.iter().find(|r| r.player_id == "A").unwrap();
        let prey = a.prey.as_ref().unwrap();
        assert_eq!((prey.player_id.as_str(), prey.kill_count, prey.death_count), ("B", 5, 1));

        let b = results.iter().find(|r| r.player_id == "B").unwrap();
        assert_eq!(b.nemesis.as_ref().unwrap().player_id, "A");
        assert!(b.prey.is_none());
    }
}
