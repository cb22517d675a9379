//! Remote filesystem transport.
//!
//! A [`RemoteFs`] is one live connection to a server's files; a
//! [`Connector`] opens them. [`TransportSession`] wraps both with timeouts,
//! liveness tracking, reconnect backoff and the directory cache, and is what
//! the rest of the pipeline talks to.
//!
//! Backends:
//! - `LocalFs`: a mounted or synced copy of the server directory
//! - `MemoryFs`: in-process files for tests and dry runs
//! - `SftpFs`: SSH file transfer (behind the `sftp` feature)

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::config::TransportSettings;
use crate::types::{Backend, ServerDescriptor};

pub mod dir_cache;
pub mod local;
pub mod memory;
pub mod session;
#[cfg(feature = "sftp")]
pub mod sftp;

pub use dir_cache::DirectoryCache;
pub use local::{LocalConnector, LocalFs};
pub use memory::{MemoryConnector, MemoryFs};
pub use session::{RemoteOutcome, SessionStats, TransportSession};

/// Transport-level failures. All are recoverable by reconnecting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Not connected")]
    NotConnected,

    #[error("Reconnect backing off, next attempt in {retry_in_secs}s")]
    BackingOff { retry_in_secs: u64 },

    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Backend unavailable: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            TransportError::NotFound(e.to_string())
        } else {
            TransportError::Io(e.to_string())
        }
    }
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Modification time, Unix seconds
    pub mtime: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemoteStat {
    pub size: u64,
    pub is_dir: bool,
    pub mtime: Option<i64>,
}

/// A live connection to a server's filesystem.
///
/// Paths are `/`-separated and interpreted by the backend; `"."` is the
/// backend's starting directory. Implementations do not apply timeouts;
/// [`TransportSession`] does.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    async fn stat(&self, path: &str) -> Result<RemoteStat, TransportError>;

    /// Read up to `len` bytes at `offset`. An empty result means EOF.
    async fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, TransportError>;

    /// Run a shell command and return its stdout, or `Ok(None)` when the
    /// backend cannot execute commands.
    async fn exec(&self, _command: &str) -> Result<Option<String>, TransportError> {
        Ok(None)
    }

    async fn close(&self) {}

    /// Human-readable name for logging (e.g. "sftp", "local").
    fn backend_name(&self) -> &str;
}

/// Opens [`RemoteFs`] connections for a server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, server: &ServerDescriptor) -> Result<Box<dyn RemoteFs>, TransportError>;
}

/// Pick the connector for a server's configured backend.
#[cfg_attr(not(feature = "sftp"), allow(unused_variables))]
pub fn connector_for(
    server: &ServerDescriptor,
    settings: &TransportSettings,
) -> Result<Arc<dyn Connector>, TransportError> {
    match server.backend {
        Backend::Local => Ok(Arc::new(LocalConnector)),
        #[cfg(feature = "sftp")]
        Backend::Sftp => Ok(Arc::new(sftp::SftpConnector::new(settings))),
        #[cfg(not(feature = "sftp"))]
        Backend::Sftp => Err(TransportError::Unsupported(
            "sftp backend requires building with --features sftp".to_string(),
        )),
    }
}

/// Join a remote directory and a child name with `/`.
pub fn join_remote(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        if name.starts_with('/') {
            name.to_string()
        } else {
            format!("/{name}")
        }
    } else {
        format!("{base}/{}", name.trim_start_matches('/'))
    }
}

/// Quote a path for a POSIX shell.
pub fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote(".", "Logs"), "./Logs");
        assert_eq!(join_remote("/srv/", "Logs"), "/srv/Logs");
        assert_eq!(join_remote("/", "srv"), "/srv");
        assert_eq!(join_remote("a/b", "/c"), "a/b/c");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("a b.csv"), "'a b.csv'");
        assert_eq!(shell_quote("it's.log"), r"'it'\''s.log'");
    }

    fn descriptor(backend: Backend) -> ServerDescriptor {
        ServerDescriptor {
            server_id: "7020".into(),
            host: "10.0.0.5".into(),
            port: 22,
            username: "u".into(),
            credentials: crate::types::Credentials::None,
            base_path_hint: None,
            backend,
        }
    }

    #[test]
    fn test_connector_for_local() {
        assert!(connector_for(&descriptor(Backend::Local), &TransportSettings::default()).is_ok());
    }

    #[cfg(not(feature = "sftp"))]
    #[test]
    fn test_sftp_needs_feature() {
        let err = connector_for(&descriptor(Backend::Sftp), &TransportSettings::default()).err();
        assert!(matches!(err, Some(TransportError::Unsupported(_))));
    }

    #[cfg(feature = "sftp")]
    #[test]
    fn test_sftp_connector_built_from_settings() {
        assert!(connector_for(&descriptor(Backend::Sftp), &TransportSettings::default()).is_ok());
    }
}
