//! Server descriptors loaded from configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How to reach a server's files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// SSH File Transfer Protocol (requires the `sftp` feature)
    #[default]
    Sftp,
    /// A locally mounted or synced copy of the server directory
    Local,
}

/// Authentication material for a remote session.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    Password {
        password: String,
    },
    KeyFile {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
    None,
}

impl Default for Credentials {
    fn default() -> Self {
        Credentials::None
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Password { .. } => f.write_str("Password(<redacted>)"),
            Credentials::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credentials::None => f.write_str("None"),
        }
    }
}

/// Immutable description of one game server to harvest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerDescriptor {
    /// Stable identifier, also embedded in the remote directory name
    pub server_id: String,
    /// Host name or address; may carry a `:port` suffix
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credentials: Credentials,
    /// Directory to start root discovery from (remote path, or local
    /// directory for the `local` backend)
    #[serde(default)]
    pub base_path_hint: Option<String>,
    #[serde(default)]
    pub backend: Backend,
}

fn default_port() -> u16 {
    22
}

impl ServerDescriptor {
    /// Host without any `:port` suffix.
    pub fn bare_host(&self) -> &str {
        match self.host.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => &self.host,
        }
    }

    /// Port to dial: an explicit `host:port` suffix wins over `port`.
    pub fn effective_port(&self) -> u16 {
        self.host
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(self.port)
    }

    /// Marker the server's directory name contains: `{host}_{server_id}`.
    pub fn directory_marker(&self) -> String {
        format!("{}_{}", self.bare_host(), self.server_id)
    }

    /// Directory whose listing is searched for the server directory.
    ///
    /// The local backend is already rooted at `base_path_hint`, so its view
    /// starts at `"."`.
    pub fn discovery_base(&self) -> &str {
        match self.backend {
            Backend::Local => ".",
            Backend::Sftp => self.base_path_hint.as_deref().unwrap_or("."),
        }
    }

    /// Short label for log prefixes.
    pub fn label(&self) -> String {
        format!("{}@{}", self.server_id, self.bare_host())
    }
}
