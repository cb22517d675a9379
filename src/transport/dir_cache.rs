//! TTL-bounded cache of directory listings, one per session.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::RemoteEntry;

#[derive(Debug, Clone)]
pub struct DirectoryCacheEntry {
    pub path: String,
    pub entries: Vec<RemoteEntry>,
    pub cached_at: Instant,
}

/// Listings are served while younger than the TTL and never after.
/// Only successful listings are stored.
#[derive(Debug)]
pub struct DirectoryCache {
    ttl: Duration,
    entries: HashMap<String, DirectoryCacheEntry>,
    hits: u64,
    misses: u64,
}

impl DirectoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, path: &str) -> Option<&[RemoteEntry]> {
        let fresh = self
            .entries
            .get(path)
            .is_some_and(|e| e.cached_at.elapsed() < self.ttl);
        if fresh {
            self.hits += 1;
            self.entries.get(path).map(|e| e.entries.as_slice())
        } else {
            self.misses += 1;
            self.entries.remove(path);
            None
        }
    }

    pub fn insert(&mut self, path: &str, entries: Vec<RemoteEntry>) {
        self.entries.insert(
            path.to_string(),
            DirectoryCacheEntry {
                path: path.to_string(),
                entries,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&mut self, path: &str) {
        self.entries.remove(path);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since creation
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
