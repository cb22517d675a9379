//! Local directory backend.
//!
//! Serves a mounted or synced copy of a server directory. The descriptor's
//! `base_path_hint` is the local directory that plays the role of the
//! remote root.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{Connector, RemoteEntry, RemoteFs, RemoteStat, TransportError};
use crate::types::ServerDescriptor;

pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a `/`-separated path onto the local root. Parent components are
    /// rejected so nothing outside the root is reachable.
    fn resolve(&self, path: &str) -> Result<PathBuf, TransportError> {
        let mut resolved = self.root.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(TransportError::NotFound(format!("{path} escapes the local root")));
                }
            }
        }
        Ok(resolved)
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> Option<i64> {
    let modified = meta.modified().ok()?;
    let secs = modified.duration_since(std::time::UNIX_EPOCH).ok()?.as_secs();
    i64::try_from(secs).ok()
}

#[async_trait]
impl RemoteFs for LocalFs {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let dir = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&dir).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: meta.len(),
                mtime: mtime_secs(&meta),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<RemoteStat, TransportError> {
        let meta = tokio::fs::metadata(self.resolve(path)?).await?;
        Ok(RemoteStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            mtime: mtime_secs(&meta),
        })
    }

    async fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut file = tokio::fs::File::open(self.resolve(path)?).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len.min(1 << 20));
        file.take(len as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    fn backend_name(&self) -> &str {
        "local"
    }
}

/// Opens [`LocalFs`] rooted at the server's `base_path_hint`.
pub struct LocalConnector;

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, server: &ServerDescriptor) -> Result<Box<dyn RemoteFs>, TransportError> {
        let root = server.base_path_hint.as_deref().ok_or_else(|| {
            TransportError::ConnectionFailed(format!(
                "server {} uses the local backend but has no base_path_hint",
                server.server_id
            ))
        })?;
        let meta = tokio::fs::metadata(root)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{root}: {e}")))?;
        if !meta.is_dir() {
            return Err(TransportError::ConnectionFailed(format!("{root} is not a directory")));
        }
        Ok(Box::new(LocalFs::new(root)))
    }
}
