//! Server directory selection.

use crate::transport::{join_remote, RemoteEntry};

/// First directory in `entries` whose name contains `marker`, ignoring case.
pub fn select_root(base: &str, entries: &[RemoteEntry], marker: &str) -> Option<String> {
    let marker = marker.to_lowercase();
    entries
        .iter()
        .find(|e| e.is_dir && e.name.to_lowercase().contains(&marker))
        .map(|e| join_remote(base, &e.name))
}
