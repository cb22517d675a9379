//! Transport session with timeout, liveness and reconnect resilience.
//!
//! One session per server. Every remote operation runs under
//! `op_timeout_secs` and returns a [`RemoteOutcome`]; nothing here blocks
//! longer than its timeout. Repeated timeouts tear the connection down, and
//! reconnects are gated by capped exponential backoff so a dead server is
//! retried at a decreasing rate instead of on every tick.

use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{Connector, DirectoryCache, RemoteEntry, RemoteFs, RemoteStat, TransportError};
use crate::config::TransportSettings;
use crate::discovery::root::select_root;
use crate::types::ServerDescriptor;

/// Retry horizon used when a configured backoff cannot be represented.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Result of one remote operation.
#[derive(Debug)]
pub enum RemoteOutcome<T> {
    Ok(T),
    /// The operation did not finish within its timeout
    TimedOut,
    Failed(TransportError),
}

impl<T> RemoteOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            RemoteOutcome::Ok(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteOutcome::TimedOut)
    }

    /// Collapse into a `Result`, reporting timeouts as `TransportError::Timeout`.
    pub fn into_result(self, timeout_secs: u64) -> Result<T, TransportError> {
        match self {
            RemoteOutcome::Ok(v) => Ok(v),
            RemoteOutcome::TimedOut => Err(TransportError::Timeout(timeout_secs)),
            RemoteOutcome::Failed(e) => Err(e),
        }
    }
}

/// Connection health snapshot, for logs and the `inspect` command.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub server_id: String,
    pub backend: Option<String>,
    pub connected: bool,
    pub degraded: bool,
    pub root_path: Option<String>,
    pub operations: u64,
    pub timeouts: u64,
    pub consecutive_timeouts: u32,
    pub connect_failures: u32,
    pub reconnections: u64,
    pub heartbeat_age_secs: Option<u64>,
    pub last_error: Option<String>,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub struct TransportSession {
    server: ServerDescriptor,
    connector: Arc<dyn Connector>,
    settings: TransportSettings,
    fs: Option<Box<dyn RemoteFs>>,
    /// Server directory found after the first successful connect
    root_path: Option<String>,
    cache: DirectoryCache,
    last_error: Option<String>,
    /// Time of the last successful remote operation
    last_heartbeat: Option<Instant>,
    consecutive_timeouts: u32,
    /// Failed connects (or forced disconnects) since the last good connect
    connect_failures: u32,
    /// Earliest time the next connect may be attempted
    next_attempt_at: Option<Instant>,
    ever_connected: bool,
    operations: u64,
    timeouts: u64,
    reconnections: u64,
}

impl TransportSession {
    pub fn new(
        server: ServerDescriptor,
        connector: Arc<dyn Connector>,
        settings: TransportSettings,
        dir_cache_ttl: Duration,
    ) -> Self {
        Self {
            server,
            connector,
            settings,
            fs: None,
            root_path: None,
            cache: DirectoryCache::new(dir_cache_ttl),
            last_error: None,
            last_heartbeat: None,
            consecutive_timeouts: 0,
            connect_failures: 0,
            next_attempt_at: None,
            ever_connected: false,
            operations: 0,
            timeouts: 0,
            reconnections: 0,
        }
    }

    pub fn server(&self) -> &ServerDescriptor {
        &self.server
    }

    pub fn is_connected(&self) -> bool {
        self.fs.is_some()
    }

    pub fn root_path(&self) -> Option<&str> {
        self.root_path.as_deref()
    }

    pub fn op_timeout_secs(&self) -> u64 {
        self.settings.op_timeout_secs
    }

    /// Repeated connect failures mark the server degraded until a connect succeeds.
    pub fn is_degraded(&self) -> bool {
        self.connect_failures >= self.settings.degraded_after_failures
    }

    /// Time left before the next connect attempt is allowed.
    pub fn backoff_remaining(&self) -> Option<Duration> {
        self.next_attempt_at
            .map(|at| at.saturating_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    /// Connected and heard from within the stale window.
    pub fn is_alive(&self) -> bool {
        let stale = Duration::from_secs(self.settings.heartbeat_stale_secs);
        self.fs.is_some() && self.last_heartbeat.is_some_and(|hb| hb.elapsed() <= stale)
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Open the connection (if not already open) and resolve the server root.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.fs.is_some() {
            return Ok(());
        }
        if let Some(remaining) = self.backoff_remaining() {
            return Err(TransportError::BackingOff { retry_in_secs: remaining.as_secs().max(1) });
        }

        let label = self.server.label();
        tracing::info!(server = %label, "Connecting to server");

        let timeout = Duration::from_secs(self.settings.connect_timeout_secs);
        let result = match tokio::time::timeout(timeout, self.connector.connect(&self.server)).await {
            Ok(r) => r,
            Err(_) => Err(TransportError::Timeout(self.settings.connect_timeout_secs)),
        };

        match result {
            Ok(fs) => {
                tracing::info!(server = %label, backend = fs.backend_name(), "Connection established");
                self.fs = Some(fs);
                self.last_heartbeat = Some(Instant::now());
                self.consecutive_timeouts = 0;
                self.next_attempt_at = None;
                if self.ever_connected {
                    self.reconnections += 1;
                }
                self.ever_connected = true;
                self.connect_failures = 0;
                self.last_error = None;
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                let delay = self.schedule_backoff();
                tracing::warn!(
                    server = %label,
                    error = %e,
                    failures = self.connect_failures,
                    retry_in_secs = delay.as_secs(),
                    degraded = self.is_degraded(),
                    "Connect failed"
                );
                return Err(e);
            }
        }

        if self.root_path.is_none() {
            if let Err(e) = self.ensure_root().await {
                tracing::warn!(server = %label, error = %e, "Root discovery deferred");
            }
        }
        Ok(())
    }

    /// Reconnect if the session is closed or has gone stale.
    pub async fn ensure_connected(&mut self) -> Result<(), TransportError> {
        if self.fs.is_some() && !self.is_alive() {
            tracing::warn!(
                server = %self.server.label(),
                threshold_secs = self.settings.heartbeat_stale_secs,
                "Session stale, forcing reconnect"
            );
            self.disconnect().await;
        }
        self.connect().await
    }

    /// Close the connection. Cached root path and listings survive.
    pub async fn disconnect(&mut self) {
        if let Some(fs) = self.fs.take() {
            fs.close().await;
            tracing::info!(server = %self.server.label(), "Connection closed");
        }
        self.consecutive_timeouts = 0;
    }

    /// Tear down after a failure and delay the next connect.
    pub async fn fail_and_disconnect(&mut self, reason: &str) {
        self.last_error = Some(reason.to_string());
        self.disconnect().await;
        let delay = self.schedule_backoff();
        tracing::warn!(
            server = %self.server.label(),
            reason = reason,
            retry_in_secs = delay.as_secs(),
            "Session torn down"
        );
    }

    fn schedule_backoff(&mut self) -> Duration {
        self.connect_failures = self.connect_failures.saturating_add(1);
        let exponent = self.connect_failures.saturating_sub(1).min(16);
        let base = self
            .settings
            .backoff_initial_secs
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.settings.backoff_max_secs);
        let jitter_ms = rand::thread_rng().gen_range(0..=base.saturating_mul(100));
        let delay = Duration::from_secs(base)
            .saturating_add(Duration::from_millis(jitter_ms))
            .min(Duration::from_secs(self.settings.backoff_max_secs));
        let now = Instant::now();
        self.next_attempt_at = Some(now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE));
        delay
    }

    /// Resolve (once) the server's directory under the discovery base.
    pub async fn ensure_root(&mut self) -> Result<String, TransportError> {
        if let Some(root) = &self.root_path {
            return Ok(root.clone());
        }
        let base = self.server.discovery_base().to_string();
        let entries = self.list_dir(&base).await.into_result(self.settings.op_timeout_secs)?;
        let marker = self.server.directory_marker();
        let root = match select_root(&base, &entries, &marker) {
            Some(found) => {
                tracing::info!(server = %self.server.label(), root = %found, "Server directory found");
                found
            }
            None => {
                tracing::warn!(
                    server = %self.server.label(),
                    marker = %marker,
                    base = %base,
                    "No directory matches server marker, using base directory"
                );
                base
            }
        };
        self.root_path = Some(root.clone());
        Ok(root)
    }

    // ========================================================================
    // Remote operations
    // ========================================================================

    async fn record<T>(
        &mut self,
        op: &'static str,
        path: &str,
        result: Result<Result<T, TransportError>, tokio::time::error::Elapsed>,
    ) -> RemoteOutcome<T> {
        match result {
            Ok(Ok(value)) => {
                self.last_heartbeat = Some(Instant::now());
                self.consecutive_timeouts = 0;
                self.operations += 1;
                RemoteOutcome::Ok(value)
            }
            Ok(Err(e)) => {
                if !matches!(e, TransportError::NotFound(_)) {
                    self.last_error = Some(e.to_string());
                    tracing::warn!(server = %self.server.label(), op = op, path = %path, error = %e, "Remote operation failed");
                }
                RemoteOutcome::Failed(e)
            }
            Err(_) => {
                self.note_timeout(op, path).await;
                RemoteOutcome::TimedOut
            }
        }
    }

    /// Count a timeout observed by a caller's own deadline (e.g. a read
    /// chunk). Disconnects once the consecutive limit is reached.
    pub async fn note_timeout(&mut self, op: &str, path: &str) {
        self.timeouts += 1;
        self.consecutive_timeouts += 1;
        tracing::warn!(
            server = %self.server.label(),
            op = op,
            path = %path,
            consecutive = self.consecutive_timeouts,
            total_timeouts = self.timeouts,
            "Remote operation timed out"
        );
        if self.consecutive_timeouts >= self.settings.max_consecutive_timeouts {
            self.fail_and_disconnect("too many consecutive timeouts").await;
        }
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.op_timeout_secs)
    }

    /// List a directory, served from the cache while fresh.
    pub async fn list_dir(&mut self, path: &str) -> RemoteOutcome<Vec<RemoteEntry>> {
        if let Some(entries) = self.cache.get(path) {
            return RemoteOutcome::Ok(entries.to_vec());
        }
        let outcome = self.list_dir_uncached(path).await;
        if let RemoteOutcome::Ok(entries) = &outcome {
            self.cache.insert(path, entries.clone());
        }
        outcome
    }

    pub async fn list_dir_uncached(&mut self, path: &str) -> RemoteOutcome<Vec<RemoteEntry>> {
        let Some(fs) = self.fs.as_deref() else {
            return RemoteOutcome::Failed(TransportError::NotConnected);
        };
        let result = tokio::time::timeout(self.op_timeout(), fs.list_dir(path)).await;
        self.record("list_dir", path, result).await
    }

    pub async fn stat(&mut self, path: &str) -> RemoteOutcome<RemoteStat> {
        let Some(fs) = self.fs.as_deref() else {
            return RemoteOutcome::Failed(TransportError::NotConnected);
        };
        let result = tokio::time::timeout(self.op_timeout(), fs.stat(path)).await;
        self.record("stat", path, result).await
    }

    pub async fn read_range(&mut self, path: &str, offset: u64, len: usize) -> RemoteOutcome<Vec<u8>> {
        let Some(fs) = self.fs.as_deref() else {
            return RemoteOutcome::Failed(TransportError::NotConnected);
        };
        let result = tokio::time::timeout(self.op_timeout(), fs.read_range(path, offset, len)).await;
        self.record("read_range", path, result).await
    }

    /// Run a command under its own timeout. `Ok(None)`: backend has no shell.
    pub async fn exec(&mut self, command: &str, timeout: Duration) -> RemoteOutcome<Option<String>> {
        let Some(fs) = self.fs.as_deref() else {
            return RemoteOutcome::Failed(TransportError::NotConnected);
        };
        let result = tokio::time::timeout(timeout, fs.exec(command)).await;
        self.record("exec", command, result).await
    }

    pub fn invalidate_listing(&mut self, path: &str) {
        self.cache.invalidate(path);
    }

    pub fn stats(&self) -> SessionStats {
        let (cache_hits, cache_misses) = self.cache.counters();
        SessionStats {
            server_id: self.server.server_id.clone(),
            backend: self.fs.as_ref().map(|fs| fs.backend_name().to_string()),
            connected: self.fs.is_some(),
            degraded: self.is_degraded(),
            root_path: self.root_path.clone(),
            operations: self.operations,
            timeouts: self.timeouts,
            consecutive_timeouts: self.consecutive_timeouts,
            connect_failures: self.connect_failures,
            reconnections: self.reconnections,
            heartbeat_age_secs: self.last_heartbeat.map(|hb| hb.elapsed().as_secs()),
            last_error: self.last_error.clone(),
            cache_entries: self.cache.len(),
            cache_hits,
            cache_misses,
        }
    }
}
