//! Latest kill-CSV search.
//!
//! Walks the search paths with an explicit worklist (no recursion) bounded
//! by `max_depth`. `world_<n>` directories are visited before others, but
//! the walk is exhaustive: the newest file wins wherever it lives.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::DiscoveryError;
use crate::config::DiscoverySettings;
use crate::parsing::find_embedded_timestamp;
use crate::transport::{join_remote, RemoteEntry, RemoteOutcome, TransportError, TransportSession};
use crate::types::{DiscoveredFile, TimestampSource};

/// What a walk found.
#[derive(Debug, Default)]
pub struct CsvSearch {
    pub best: Option<DiscoveredFile>,
    pub candidates: usize,
    pub directories_visited: usize,
    /// Some listing timed out or failed, so a newer file may be unseen
    pub incomplete: bool,
}

pub fn is_world_dir(name: &str) -> bool {
    name.to_ascii_lowercase()
        .strip_prefix("world_")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn is_csv(entry: &RemoteEntry) -> bool {
    !entry.is_dir && entry.name.to_ascii_lowercase().ends_with(".csv")
}

/// Timestamp for ranking: embedded name stamp, else mtime, else the epoch.
pub fn candidate_timestamp(entry: &RemoteEntry) -> (DateTime<Utc>, TimestampSource) {
    if let Some(ts) = find_embedded_timestamp(&entry.name) {
        return (ts, TimestampSource::Filename);
    }
    match entry.mtime.and_then(|m| DateTime::<Utc>::from_timestamp(m, 0)) {
        Some(ts) => (ts, TimestampSource::Mtime),
        None => (DateTime::<Utc>::UNIX_EPOCH, TimestampSource::Unknown),
    }
}

/// Newer timestamp wins; equal timestamps go to the greater path.
fn newer(candidate: &DiscoveredFile, current: &DiscoveredFile) -> bool {
    (candidate.inferred_timestamp, &candidate.path) > (current.inferred_timestamp, &current.path)
}

/// Walk from `start` and fold every CSV into `search`.
async fn walk(
    session: &mut TransportSession,
    start: &str,
    max_depth: usize,
    visited: &mut HashSet<String>,
    search: &mut CsvSearch,
) -> Result<(), TransportError> {
    let mut worklist: Vec<(String, usize)> = vec![(start.to_string(), 0)];

    while let Some((dir, depth)) = worklist.pop() {
        if !visited.insert(dir.clone()) {
            continue;
        }
        let entries = match session.list_dir(&dir).await {
            RemoteOutcome::Ok(entries) => entries,
            RemoteOutcome::Failed(TransportError::NotFound(_)) => continue,
            RemoteOutcome::Failed(TransportError::NotConnected) => return Err(TransportError::NotConnected),
            RemoteOutcome::TimedOut | RemoteOutcome::Failed(_) => {
                search.incomplete = true;
                continue;
            }
        };
        search.directories_visited += 1;

        let mut worlds = Vec::new();
        let mut others = Vec::new();
        for entry in &entries {
            if entry.is_dir {
                if depth < max_depth {
                    let path = join_remote(&dir, &entry.name);
                    if is_world_dir(&entry.name) {
                        worlds.push(path);
                    } else {
                        others.push(path);
                    }
                }
            } else if is_csv(entry) {
                let (ts, source) = candidate_timestamp(entry);
                let found = DiscoveredFile {
                    path: join_remote(&dir, &entry.name),
                    raw_name: entry.name.clone(),
                    inferred_timestamp: ts,
                    timestamp_source: source,
                };
                search.candidates += 1;
                if search.best.as_ref().map_or(true, |best| newer(&found, best)) {
                    search.best = Some(found);
                }
            }
        }

        // LIFO: pushed last is visited first
        worklist.extend(others.into_iter().rev().map(|p| (p, depth + 1)));
        worklist.extend(worlds.into_iter().rev().map(|p| (p, depth + 1)));
    }
    Ok(())
}

/// Search the configured subpaths of `root`, then `root` itself if they
/// yielded nothing.
pub async fn find_latest_csv(
    session: &mut TransportSession,
    root: &str,
    settings: &DiscoverySettings,
) -> Result<CsvSearch, DiscoveryError> {
    let mut search = CsvSearch::default();
    let mut visited = HashSet::new();

    for sub in &settings.csv_search_paths {
        let start = join_remote(root, sub);
        walk(session, &start, settings.max_depth, &mut visited, &mut search).await?;
    }
    if search.candidates == 0 {
        walk(session, root, settings.max_depth, &mut visited, &mut search).await?;
    }

    if search.best.is_none() && search.incomplete {
        return Err(DiscoveryError::Incomplete { root: root.to_string() });
    }
    Ok(search)
}
