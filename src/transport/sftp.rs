//! SFTP backend over libssh2.
//!
//! libssh2 is blocking, so every call runs on the blocking pool behind a
//! mutex. The session-level timeout in [`super::TransportSession`] still
//! bounds how long the caller waits; libssh2's own timeout, set from
//! `op_timeout_secs`, bounds how long the blocking thread stays busy. The
//! TCP dial uses `connect_timeout_secs`.

use async_trait::async_trait;
use std::io::{Read, Seek, SeekFrom};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Connector, RemoteEntry, RemoteFs, RemoteStat, TransportError};
use crate::config::TransportSettings;
use crate::types::{Credentials, ServerDescriptor};

/// libssh2 SFTP status for a missing path
const SFTP_NO_SUCH_FILE: i32 = 2;

struct SftpHandle {
    session: ssh2::Session,
    sftp: ssh2::Sftp,
}

pub struct SftpFs {
    handle: Arc<Mutex<SftpHandle>>,
}

fn map_ssh_error(e: ssh2::Error, path: &str) -> TransportError {
    match e.code() {
        ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => TransportError::NotFound(path.to_string()),
        _ => TransportError::Io(format!("{path}: {e}")),
    }
}

impl SftpFs {
    /// Run `f` against the handle on the blocking pool.
    async fn with_handle<T, F>(&self, f: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&SftpHandle) -> Result<T, TransportError> + Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || {
            let guard = handle
                .lock()
                .map_err(|_| TransportError::Io("sftp handle poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| TransportError::Io(format!("sftp worker failed: {e}")))?
    }
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let path = path.to_string();
        self.with_handle(move |h| {
            let listing = h
                .sftp
                .readdir(Path::new(&path))
                .map_err(|e| map_ssh_error(e, &path))?;
            Ok(listing
                .into_iter()
                .filter_map(|(p, stat)| {
                    let name = p.file_name()?.to_string_lossy().into_owned();
                    if name == "." || name == ".." {
                        return None;
                    }
                    Some(RemoteEntry {
                        name,
                        is_dir: stat.is_dir(),
                        size: stat.size.unwrap_or(0),
                        mtime: stat.mtime.and_then(|m| i64::try_from(m).ok()),
                    })
                })
                .collect())
        })
        .await
    }

    async fn stat(&self, path: &str) -> Result<RemoteStat, TransportError> {
        let path = path.to_string();
        self.with_handle(move |h| {
            let stat = h.sftp.stat(Path::new(&path)).map_err(|e| map_ssh_error(e, &path))?;
            Ok(RemoteStat {
                size: stat.size.unwrap_or(0),
                is_dir: stat.is_dir(),
                mtime: stat.mtime.and_then(|m| i64::try_from(m).ok()),
            })
        })
        .await
    }

    async fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        let path = path.to_string();
        self.with_handle(move |h| {
            let mut file = h.sftp.open(Path::new(&path)).map_err(|e| map_ssh_error(e, &path))?;
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = Vec::with_capacity(len.min(1 << 20));
            file.take(len as u64).read_to_end(&mut buf)?;
            Ok(buf)
        })
        .await
    }

    async fn exec(&self, command: &str) -> Result<Option<String>, TransportError> {
        let command = command.to_string();
        self.with_handle(move |h| {
            let mut channel = h
                .session
                .channel_session()
                .map_err(|e| map_ssh_error(e, &command))?;
            channel.exec(&command).map_err(|e| map_ssh_error(e, &command))?;
            let mut output = String::new();
            channel.read_to_string(&mut output)?;
            let _ = channel.wait_close();
            match channel.exit_status() {
                Ok(0) => Ok(Some(output)),
                Ok(code) => Err(TransportError::Io(format!("'{command}' exited with {code}"))),
                Err(e) => Err(map_ssh_error(e, &command)),
            }
        })
        .await
    }

    async fn close(&self) {
        let _ = self
            .with_handle(|h| {
                let _ = h.session.disconnect(None, "harvest session closed", None);
                Ok(())
            })
            .await;
    }

    fn backend_name(&self) -> &str {
        "sftp"
    }
}

/// Dials, authenticates and opens an SFTP channel.
#[derive(Debug, Clone, Copy)]
pub struct SftpConnector {
    connect_timeout: Duration,
    op_timeout: Duration,
}

impl SftpConnector {
    pub fn new(settings: &TransportSettings) -> Self {
        Self {
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            op_timeout: Duration::from_secs(settings.op_timeout_secs),
        }
    }

    /// Per-call libssh2 timeout in milliseconds (0 would mean none).
    fn libssh2_timeout_ms(&self) -> u32 {
        u32::try_from(self.op_timeout.as_millis()).unwrap_or(u32::MAX).max(1)
    }
}

fn open_session(server: &ServerDescriptor, connector: SftpConnector) -> Result<SftpHandle, TransportError> {
    let addr = (server.bare_host(), server.effective_port())
        .to_socket_addrs()
        .map_err(|e| TransportError::ConnectionFailed(format!("resolve {}: {e}", server.host)))?
        .next()
        .ok_or_else(|| TransportError::ConnectionFailed(format!("no address for {}", server.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, connector.connect_timeout.max(Duration::from_secs(1)))
        .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

    // Detect half-open links between polls
    let sock_ref = socket2::SockRef::from(&tcp);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    let _ = sock_ref.set_tcp_keepalive(&keepalive);

    let mut session = ssh2::Session::new().map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(connector.libssh2_timeout_ms());
    session
        .handshake()
        .map_err(|e| TransportError::ConnectionFailed(format!("handshake: {e}")))?;

    let auth = match &server.credentials {
        Credentials::Password { password } => session.userauth_password(&server.username, password),
        Credentials::KeyFile { path, passphrase } => {
            session.userauth_pubkey_file(&server.username, None, path, passphrase.as_deref())
        }
        Credentials::None => session.userauth_agent(&server.username),
    };
    auth.map_err(|e| TransportError::AuthenticationFailed(e.to_string()))?;
    if !session.authenticated() {
        return Err(TransportError::AuthenticationFailed(format!(
            "server rejected credentials for {}",
            server.username
        )));
    }

    let sftp = session
        .sftp()
        .map_err(|e| TransportError::ConnectionFailed(format!("sftp subsystem: {e}")))?;
    Ok(SftpHandle { session, sftp })
}

#[async_trait]
impl Connector for SftpConnector {
    async fn connect(&self, server: &ServerDescriptor) -> Result<Box<dyn RemoteFs>, TransportError> {
        let server = server.clone();
        let connector = *self;
        let handle = tokio::task::spawn_blocking(move || open_session(&server, connector))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("connect worker failed: {e}")))??;
        Ok(Box::new(SftpFs {
            handle: Arc::new(Mutex::new(handle)),
        }))
    }
}
