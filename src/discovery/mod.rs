//! File discovery
//!
//! Locates the file each stream should be read from: the newest kill CSV
//! anywhere under the server's death-log directories, and the text log by
//! name. All listings go through the session's directory cache.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::DiscoverySettings;
use crate::transport::{TransportError, TransportSession};
use crate::types::{DiscoveredFile, FileKind};

pub mod csv;
pub mod log;
pub mod root;

pub use csv::{find_latest_csv, CsvSearch};
pub use log::find_log_file;
pub use root::select_root;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no {kind} file found under {root}")]
    NotFound { kind: FileKind, root: String },

    #[error("search under {root} was cut short by transport errors")]
    Incomplete { root: String },
}

/// Per-server discovery state: remembers results for `csv_result_ttl_secs`.
#[derive(Debug)]
pub struct FileDiscovery {
    settings: DiscoverySettings,
    latest_csv: Option<(DiscoveredFile, Instant)>,
    log_file: Option<(DiscoveredFile, Instant)>,
}

impl FileDiscovery {
    pub fn new(settings: DiscoverySettings) -> Self {
        Self {
            settings,
            latest_csv: None,
            log_file: None,
        }
    }

    fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.settings.csv_result_ttl_secs)
    }

    fn cached(&self, kind: FileKind) -> Option<&DiscoveredFile> {
        let slot = match kind {
            FileKind::Csv => &self.latest_csv,
            FileKind::Log => &self.log_file,
        };
        slot.as_ref()
            .filter(|(_, at)| at.elapsed() < self.result_ttl())
            .map(|(file, _)| file)
    }

    /// Drop the remembered result for `kind` (e.g. after the file vanished).
    pub fn invalidate(&mut self, kind: FileKind) {
        match kind {
            FileKind::Csv => self.latest_csv = None,
            FileKind::Log => self.log_file = None,
        }
    }

    /// Resolve the file to read for `kind`.
    pub async fn locate(
        &mut self,
        session: &mut TransportSession,
        kind: FileKind,
    ) -> Result<DiscoveredFile, DiscoveryError> {
        if let Some(file) = self.cached(kind) {
            return Ok(file.clone());
        }

        let root = session.ensure_root().await?;
        match kind {
            FileKind::Csv => {
                let search = find_latest_csv(session, &root, &self.settings).await?;
                let Some(best) = search.best else {
                    return Err(DiscoveryError::NotFound { kind, root });
                };
                tracing::info!(
                    server = %session.server().label(),
                    path = %best.path,
                    timestamp = %best.inferred_timestamp,
                    candidates = search.candidates,
                    dirs = search.directories_visited,
                    "Latest CSV selected"
                );
                // A partial walk may have missed a newer file; search again next time
                if !search.incomplete {
                    self.latest_csv = Some((best.clone(), Instant::now()));
                }
                Ok(best)
            }
            FileKind::Log => {
                let found = find_log_file(session, &root, &self.settings)
                    .await?
                    .ok_or_else(|| DiscoveryError::NotFound { kind, root })?;
                self.log_file = Some((found.clone(), Instant::now()));
                Ok(found)
            }
        }
    }
}
