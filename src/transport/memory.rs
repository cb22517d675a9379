//! In-process filesystem backend.
//!
//! Files live in a shared map so a test (or a dry run) can append lines
//! between harvest cycles. Stalls and connect failures can be injected to
//! exercise timeout and backoff paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Connector, RemoteEntry, RemoteFs, RemoteStat, TransportError};
use crate::types::ServerDescriptor;

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    mtimes: HashMap<String, i64>,
    /// Reads of `path` at or beyond the offset never complete
    stalled_reads: HashMap<String, u64>,
    /// Listings of these directories never complete
    stalled_listings: BTreeSet<String>,
    stall_everything: bool,
    failing_connects: u32,
    exec_enabled: bool,
}

/// Cloning shares the underlying files.
#[derive(Clone, Default)]
pub struct MemoryFs {
    state: Arc<RwLock<MemoryState>>,
    read_calls: Arc<AtomicU64>,
    connects: Arc<AtomicU64>,
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect::<Vec<_>>()
        .join("/")
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn write_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.write_state().files.insert(normalize(path), contents.into());
    }

    pub fn append(&self, path: &str, contents: impl AsRef<[u8]>) {
        self.write_state()
            .files
            .entry(normalize(path))
            .or_default()
            .extend_from_slice(contents.as_ref());
    }

    pub fn remove(&self, path: &str) {
        self.write_state().files.remove(&normalize(path));
    }

    pub fn mkdir(&self, path: &str) {
        self.write_state().dirs.insert(normalize(path));
    }

    pub fn set_mtime(&self, path: &str, unix_secs: i64) {
        self.write_state().mtimes.insert(normalize(path), unix_secs);
    }

    /// Make reads of `path` starting at or past `offset` hang forever.
    pub fn stall_reads_from(&self, path: &str, offset: u64) {
        self.write_state().stalled_reads.insert(normalize(path), offset);
    }

    /// Make listings of `dir` hang forever.
    pub fn stall_listing(&self, dir: &str) {
        self.write_state().stalled_listings.insert(normalize(dir));
    }

    pub fn clear_stalls(&self) {
        let mut state = self.write_state();
        state.stalled_reads.clear();
        state.stalled_listings.clear();
        state.stall_everything = false;
    }

    /// Make every operation hang (a dead link).
    pub fn stall_everything(&self, stall: bool) {
        self.write_state().stall_everything = stall;
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.write_state().failing_connects = count;
    }

    /// Answer `wc -l` commands like a shell would.
    pub fn enable_exec(&self, enabled: bool) {
        self.write_state().exec_enabled = enabled;
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    fn is_dir(state: &MemoryState, norm: &str) -> bool {
        norm.is_empty()
            || state.dirs.contains(norm)
            || state.dirs.iter().chain(state.files.keys()).any(|p| {
                p.strip_prefix(norm).is_some_and(|rest| rest.starts_with('/'))
            })
    }

    async fn stall_if_dead(&self) {
        if self.read_state().stall_everything {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl RemoteFs for MemoryFs {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        self.stall_if_dead().await;
        let norm = normalize(path);
        let stalled = self.read_state().stalled_listings.contains(&norm);
        if stalled {
            std::future::pending::<()>().await;
        }
        let state = self.read_state();
        if !Self::is_dir(&state, &norm) {
            return Err(TransportError::NotFound(path.to_string()));
        }

        let prefix = if norm.is_empty() { String::new() } else { format!("{norm}/") };
        let mut children: BTreeMap<String, RemoteEntry> = BTreeMap::new();
        let paths = state.files.keys().map(|k| (k, false)).chain(state.dirs.iter().map(|d| (d, true)));
        for (full, explicit_dir) in paths {
            let Some(rest) = full.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let (name, nested) = match rest.split_once('/') {
                Some((first, _)) => (first, true),
                None => (rest, explicit_dir),
            };
            let child_path = format!("{prefix}{name}");
            let entry = children.entry(name.to_string()).or_insert_with(|| RemoteEntry {
                name: name.to_string(),
                is_dir: nested,
                size: 0,
                mtime: state.mtimes.get(&child_path).copied(),
            });
            entry.is_dir |= nested;
            if !entry.is_dir {
                entry.size = state.files.get(&child_path).map_or(0, |f| f.len() as u64);
            }
        }
        Ok(children.into_values().collect())
    }

    async fn stat(&self, path: &str) -> Result<RemoteStat, TransportError> {
        self.stall_if_dead().await;
        let norm = normalize(path);
        let state = self.read_state();
        let mtime = state.mtimes.get(&norm).copied();
        if let Some(file) = state.files.get(&norm) {
            return Ok(RemoteStat { size: file.len() as u64, is_dir: false, mtime });
        }
        if Self::is_dir(&state, &norm) {
            return Ok(RemoteStat { size: 0, is_dir: true, mtime });
        }
        Err(TransportError::NotFound(path.to_string()))
    }

    async fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        self.stall_if_dead().await;
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        let norm = normalize(path);
        let stalled = self
            .read_state()
            .stalled_reads
            .get(&norm)
            .is_some_and(|from| offset >= *from);
        if stalled {
            std::future::pending::<()>().await;
        }

        let state = self.read_state();
        let file = state
            .files
            .get(&norm)
            .ok_or_else(|| TransportError::NotFound(path.to_string()))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(file.len());
        let end = start.saturating_add(len).min(file.len());
        Ok(file[start..end].to_vec())
    }

    async fn exec(&self, command: &str) -> Result<Option<String>, TransportError> {
        self.stall_if_dead().await;
        let state = self.read_state();
        if !state.exec_enabled {
            return Ok(None);
        }
        let Some(quoted) = command.strip_prefix("wc -l ") else {
            return Err(TransportError::Io(format!("unsupported command: {command}")));
        };
        let path = quoted.trim().trim_matches('\'');
        let file = state
            .files
            .get(&normalize(path))
            .ok_or_else(|| TransportError::NotFound(path.to_string()))?;
        let lines = file.iter().filter(|b| **b == b'\n').count();
        Ok(Some(format!("{lines} {path}\n")))
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

/// Hands out clones of one shared [`MemoryFs`].
#[derive(Clone, Default)]
pub struct MemoryConnector {
    fs: MemoryFs,
}

impl MemoryConnector {
    pub fn new(fs: MemoryFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _server: &ServerDescriptor) -> Result<Box<dyn RemoteFs>, TransportError> {
        self.fs.connects.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.fs.write_state();
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(TransportError::ConnectionFailed("injected connect failure".to_string()));
            }
        }
        self.fs.stall_if_dead().await;
        Ok(Box::new(self.fs.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_infers_directories() {
        let fs = MemoryFs::new();
        fs.write_file("srv_1/Logs/Deadside.log", "a\n");
        fs.write_file("srv_1/deathlogs/world_0/x.csv", "b\n");
        fs.mkdir("srv_1/empty");

        let root = fs.list_dir(".").await.unwrap();
        assert_eq!(root.len(), 1);
        assert!(root[0].is_dir);

        let inner = fs.list_dir("./srv_1").await.unwrap();
        let names: Vec<_> = inner.iter().map(|e| (e.name.as_str(), e.is_dir)).collect();
        assert_eq!(names, vec![("Logs", true), ("deathlogs", true), ("empty", true)]);

        let logs = fs.list_dir("srv_1/Logs").await.unwrap();
        assert_eq!(logs[0].size, 2);
        assert!(!logs[0].is_dir);

        assert!(matches!(fs.list_dir("nowhere").await, Err(TransportError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_range_and_append() {
        let fs = MemoryFs::new();
        fs.write_file("f.log", "abc");
        fs.append("f.log", "def");
        assert_eq!(fs.read_range("./f.log", 2, 3).await.unwrap(), b"cde");
        assert!(fs.read_range("f.log", 10, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exec_wc() {
        let fs = MemoryFs::new();
        fs.write_file("d/f.csv", "1\n2\n3\n");
        assert_eq!(fs.exec("wc -l 'd/f.csv'").await.unwrap(), None);
        fs.enable_exec(true);
        assert_eq!(fs.exec("wc -l 'd/f.csv'").await.unwrap().as_deref(), Some("3 d/f.csv\n"));
    }

    #[tokio::test]
    async fn test_injected_connect_failures() {
        let fs = MemoryFs::new();
        fs.fail_next_connects(1);
        let connector = MemoryConnector::new(fs.clone());
        let server = ServerDescriptor {
            server_id: "1".into(),
            host: "h".into(),
            port: 22,
            username: String::new(),
            credentials: crate::types::Credentials::None,
            base_path_hint: None,
            backend: crate::types::Backend::Local,
        };
        assert!(connector.connect(&server).await.is_err());
        assert!(connector.connect(&server).await.is_ok());
        assert_eq!(fs.connects(), 2);
    }
}
