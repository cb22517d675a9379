//! Line-count estimation for backlog sizing.
//!
//! Strategies, cheapest first:
//! 1. remote `wc -l` (backends with a shell)
//! 2. stream the file counting newlines, extrapolating once the byte budget
//!    is spent
//! 3. a fixed non-zero default

use serde::Serialize;
use std::time::Duration;

use crate::config::ReaderSettings;
use crate::transport::{shell_quote, RemoteOutcome, TransportSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMethod {
    RemoteCommand,
    Counted,
    Extrapolated,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineEstimate {
    pub lines: u64,
    pub method: EstimateMethod,
}

/// First integer token of `wc -l` output.
fn parse_wc_output(output: &str) -> Option<u64> {
    output.split_whitespace().next()?.parse().ok()
}

/// `counted * total / read`, computed without overflow.
pub fn extrapolate(counted: u64, bytes_read: u64, total_bytes: u64) -> u64 {
    if bytes_read == 0 {
        return 0;
    }
    let estimate = u128::from(counted) * u128::from(total_bytes) / u128::from(bytes_read);
    u64::try_from(estimate).unwrap_or(u64::MAX)
}

async fn count_streamed(session: &mut TransportSession, path: &str, settings: &ReaderSettings) -> Option<LineEstimate> {
    let total = session.stat(path).await.ok()?.size;
    let budget = settings.count_byte_budget.min(total);
    let chunk = settings.count_chunk_bytes.max(1);

    let mut offset = 0u64;
    let mut counted = 0u64;
    while offset < budget {
        let want = usize::try_from(budget - offset).map_or(chunk, |left| left.min(chunk));
        let block = session.read_range(path, offset, want).await.ok()?;
        if block.is_empty() {
            break;
        }
        counted += block.iter().filter(|b| **b == b'\n').count() as u64;
        offset += block.len() as u64;
    }

    if offset >= total {
        Some(LineEstimate { lines: counted, method: EstimateMethod::Counted })
    } else {
        Some(LineEstimate {
            lines: extrapolate(counted, offset, total).max(1),
            method: EstimateMethod::Extrapolated,
        })
    }
}

/// Estimate the number of lines in `path`. Never fails; never returns zero
/// unless a strategy actually measured an empty file.
pub async fn estimate_line_count(
    session: &mut TransportSession,
    path: &str,
    settings: &ReaderSettings,
) -> LineEstimate {
    let command = format!("wc -l {}", shell_quote(path));
    let timeout = Duration::from_secs(settings.remote_count_timeout_secs);
    match session.exec(&command, timeout).await {
        RemoteOutcome::Ok(Some(output)) => {
            if let Some(lines) = parse_wc_output(&output) {
                return LineEstimate { lines, method: EstimateMethod::RemoteCommand };
            }
            tracing::debug!(path = %path, output = %output.trim(), "Unparseable wc output");
        }
        RemoteOutcome::Ok(None) => {}
        outcome => {
            tracing::debug!(path = %path, timed_out = outcome.is_timeout(), "Remote line count unavailable");
        }
    }

    if let Some(estimate) = count_streamed(session, path, settings).await {
        return estimate;
    }

    tracing::warn!(
        path = %path,
        fallback = settings.fallback_line_estimate,
        "Line count failed, using fallback estimate"
    );
    LineEstimate {
        lines: settings.fallback_line_estimate.max(1),
        method: EstimateMethod::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportSettings;
    use crate::transport::{MemoryConnector, MemoryFs};
    use crate::types::{Backend, Credentials, ServerDescriptor};
    use std::sync::Arc;

    async fn session(fs: &MemoryFs) -> TransportSession {
        let server = ServerDescriptor {
            server_id: "1".into(),
            host: "h".into(),
            port: 22,
            username: String::new(),
            credentials: Credentials::None,
            base_path_hint: None,
            backend: Backend::Sftp,
        };
        let mut s = TransportSession::new(
            server,
            Arc::new(MemoryConnector::new(fs.clone())),
            TransportSettings { max_consecutive_timeouts: 100, ..TransportSettings::default() },
            Duration::from_secs(300),
        );
        s.connect().await.unwrap();
        s
    }

    fn lines(n: usize) -> String {
        "0123456789\n".repeat(n)
    }

    #[test]
    fn test_extrapolate() {
        assert_eq!(extrapolate(100, 1_000, 10_000), 1_000);
        assert_eq!(extrapolate(0, 0, 10), 0);
        assert_eq!(extrapolate(u64::MAX, 1, 2), u64::MAX);
    }

    #[test]
    fn test_parse_wc_output() {
        assert_eq!(parse_wc_output("  4213 /srv/a.csv\n"), Some(4213));
        assert_eq!(parse_wc_output("wc: no such file"), None);
    }

    #[tokio::test]
    async fn test_remote_command_preferred() {
        let fs = MemoryFs::new();
        fs.write_file("d/a.csv", lines(42));
        fs.enable_exec(true);
        let mut s = session(&fs).await;
        let est = estimate_line_count(&mut s, "d/a.csv", &ReaderSettings::default()).await;
        assert_eq!(est, LineEstimate { lines: 42, method: EstimateMethod::RemoteCommand });
    }

    #[tokio::test]
    async fn test_streamed_count_without_shell() {
        let fs = MemoryFs::new();
        fs.write_file("d/a.csv", lines(42));
        let mut s = session(&fs).await;
        let settings = ReaderSettings { count_chunk_bytes: 50, ..ReaderSettings::default() };
        let est = estimate_line_count(&mut s, "d/a.csv", &settings).await;
        assert_eq!(est, LineEstimate { lines: 42, method: EstimateMethod::Counted });
    }

    #[tokio::test]
    async fn test_extrapolates_past_budget() {
        let fs = MemoryFs::new();
        fs.write_file("d/a.csv", lines(1_000));
        let mut s = session(&fs).await;
        let settings = ReaderSettings {
            count_chunk_bytes: 110,
            count_byte_budget: 1_100,
            ..ReaderSettings::default()
        };
        let est = estimate_line_count(&mut s, "d/a.csv", &settings).await;
        assert_eq!(est, LineEstimate { lines: 1_000, method: EstimateMethod::Extrapolated });
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_when_everything_fails() {
        let fs = MemoryFs::new();
        fs.write_file("d/a.csv", lines(10));
        let mut s = session(&fs).await;
        fs.stall_everything(true);
        let est = estimate_line_count(&mut s, "d/a.csv", &ReaderSettings::default()).await;
        assert_eq!(est, LineEstimate { lines: 600, method: EstimateMethod::Fallback });
    }

    #[tokio::test]
    async fn test_empty_file_counts_zero() {
        let fs = MemoryFs::new();
        fs.write_file("d/a.csv", "");
        let mut s = session(&fs).await;
        let est = estimate_line_count(&mut s, "d/a.csv", &ReaderSettings::default()).await;
        assert_eq!(est, LineEstimate { lines: 0, method: EstimateMethod::Counted });
    }
}
