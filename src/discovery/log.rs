//! Text log lookup: `{root}/Logs/<name>`, then a breadth-first scan.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};

use super::DiscoveryError;
use crate::config::DiscoverySettings;
use crate::transport::{join_remote, RemoteEntry, RemoteOutcome, TransportError, TransportSession};
use crate::types::{DiscoveredFile, TimestampSource};

fn discovered(dir: &str, entry: &RemoteEntry) -> DiscoveredFile {
    let (inferred_timestamp, timestamp_source) = match entry.mtime.and_then(|m| DateTime::<Utc>::from_timestamp(m, 0)) {
        Some(ts) => (ts, TimestampSource::Mtime),
        None => (DateTime::<Utc>::UNIX_EPOCH, TimestampSource::Unknown),
    };
    DiscoveredFile {
        path: join_remote(dir, &entry.name),
        raw_name: entry.name.clone(),
        inferred_timestamp,
        timestamp_source,
    }
}

fn matching<'a>(entries: &'a [RemoteEntry], filename: &str) -> Option<&'a RemoteEntry> {
    entries
        .iter()
        .find(|e| !e.is_dir && e.name.eq_ignore_ascii_case(filename))
}

pub async fn find_log_file(
    session: &mut TransportSession,
    root: &str,
    settings: &DiscoverySettings,
) -> Result<Option<DiscoveredFile>, DiscoveryError> {
    let logs_dir = join_remote(root, "Logs");
    match session.list_dir(&logs_dir).await {
        RemoteOutcome::Ok(entries) => {
            if let Some(entry) = matching(&entries, &settings.log_filename) {
                return Ok(Some(discovered(&logs_dir, entry)));
            }
        }
        RemoteOutcome::Failed(TransportError::NotConnected) => {
            return Err(TransportError::NotConnected.into());
        }
        _ => {}
    }

    tracing::debug!(root = %root, file = %settings.log_filename, "Log not under Logs/, scanning root");

    let mut visited = HashSet::from([logs_dir]);
    let mut queue = VecDeque::from([(root.to_string(), 0usize)]);
    let mut incomplete = false;
    while let Some((dir, depth)) = queue.pop_front() {
        if !visited.insert(dir.clone()) {
            continue;
        }
        let entries = match session.list_dir(&dir).await {
            RemoteOutcome::Ok(entries) => entries,
            RemoteOutcome::Failed(TransportError::NotFound(_)) => continue,
            RemoteOutcome::Failed(TransportError::NotConnected) => {
                return Err(TransportError::NotConnected.into());
            }
            RemoteOutcome::TimedOut | RemoteOutcome::Failed(_) => {
                incomplete = true;
                continue;
            }
        };
        if let Some(entry) = matching(&entries, &settings.log_filename) {
            return Ok(Some(discovered(&dir, entry)));
        }
        if depth < settings.max_depth {
            queue.extend(
                entries
                    .iter()
                    .filter(|e| e.is_dir)
                    .map(|e| (join_remote(&dir, &e.name), depth + 1)),
            );
        }
    }

    if incomplete {
        return Err(DiscoveryError::Incomplete { root: root.to_string() });
    }
    Ok(None)
}
