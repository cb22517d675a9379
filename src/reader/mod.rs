//! Chunked, resumable line reader.
//!
//! `read_lines(path, start_line, max_lines)` skips exactly `start_line`
//! newline-terminated records and returns up to `max_lines` more, in chunks
//! of `chunk_lines`. Each chunk runs under its own timeout; when one expires
//! the lines already assembled are still returned, so the caller advances
//! its cursor by what it actually got.
//!
//! An unterminated trailing line is held back until its newline arrives.
//! Bytes are decoded per line with lossy UTF-8.
//!
//! Skipping from byte zero on every call would be quadratic over a file's
//! life, so the reader remembers `(line, byte)` checkpoints per path and
//! seeks from the nearest one. Checkpoints are dropped when a file shrinks.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::config::ReaderSettings;
use crate::transport::{RemoteOutcome, TransportError, TransportSession};

pub mod estimator;

pub use estimator::{estimate_line_count, EstimateMethod, LineEstimate};

/// Checkpoints kept per path.
const MAX_CHECKPOINTS: usize = 64;

/// Result of one `read_lines` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub lines: Vec<String>,
    /// Line index of `lines[0]`
    pub start_line: u64,
    /// No more complete lines were available
    pub reached_eof: bool,
    /// A chunk (or the initial stat/skip) hit its timeout
    pub timed_out: bool,
    /// The file has fewer lines than `start_line`
    pub rotated: bool,
    /// Size of an unterminated tail left for a later read
    pub held_back_bytes: usize,
}

impl ReadOutcome {
    fn empty(start_line: u64) -> Self {
        Self { start_line, ..Self::default() }
    }

    pub fn next_line(&self) -> u64 {
        self.start_line + self.lines.len() as u64
    }
}

#[derive(Debug, Default)]
struct LineCheckpoints {
    size_seen: u64,
    /// line index -> byte offset where that line starts
    marks: BTreeMap<u64, u64>,
}

impl LineCheckpoints {
    fn record(&mut self, line: u64, byte: u64) {
        self.marks.insert(line, byte);
        while self.marks.len() > MAX_CHECKPOINTS {
            self.marks.pop_first();
        }
    }

    fn nearest(&self, line: u64) -> (u64, u64) {
        self.marks
            .range(..=line)
            .next_back()
            .map_or((0, 0), |(l, b)| (*l, *b))
    }
}

/// Read position within a file.
struct Position {
    /// Index of the next line to emit
    line: u64,
    /// Byte offset where that line starts
    byte: u64,
    /// Bytes read past `byte` that do not yet form a complete line
    pending: Vec<u8>,
    eof: bool,
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Pull complete lines into `out` until `target` is reached or EOF.
///
/// Cancellation-safe at every await: `pos` and `out` only change together
/// after a read completes, so a dropped future loses no delivered line.
async fn fill_chunk(
    session: &mut TransportSession,
    path: &str,
    pos: &mut Position,
    out: &mut Vec<String>,
    target: usize,
    block_bytes: usize,
) -> Result<(), TransportError> {
    loop {
        while out.len() < target {
            let Some(nl) = pos.pending.iter().position(|b| *b == b'\n') else {
                break;
            };
            out.push(decode_line(&pos.pending[..nl]));
            pos.pending.drain(..=nl);
            pos.line += 1;
            pos.byte += nl as u64 + 1;
        }
        if out.len() >= target || pos.eof {
            return Ok(());
        }

        let offset = pos.byte + pos.pending.len() as u64;
        match session.read_range(path, offset, block_bytes).await {
            RemoteOutcome::Ok(block) if block.is_empty() => pos.eof = true,
            RemoteOutcome::Ok(block) => pos.pending.extend_from_slice(&block),
            RemoteOutcome::TimedOut => return Err(TransportError::Timeout(session.op_timeout_secs())),
            RemoteOutcome::Failed(e) => return Err(e),
        }
    }
}

pub struct ChunkedReader {
    settings: ReaderSettings,
    checkpoints: HashMap<String, LineCheckpoints>,
}

impl ChunkedReader {
    pub fn new(settings: ReaderSettings) -> Self {
        Self {
            settings,
            checkpoints: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Forget checkpoints for `path` (or all paths).
    pub fn forget(&mut self, path: Option<&str>) {
        match path {
            Some(p) => {
                self.checkpoints.remove(p);
            }
            None => self.checkpoints.clear(),
        }
    }

    /// Advance from the nearest checkpoint to the start of `start_line`.
    ///
    /// Yields `Ok(None)` when EOF arrives first. A checkpoint is recorded
    /// after every scanned block, so a skip cut short by a timeout or a
    /// dropped cycle resumes where it stopped.
    async fn seek_line(
        &mut self,
        session: &mut TransportSession,
        path: &str,
        size: u64,
        start_line: u64,
    ) -> RemoteOutcome<Option<u64>> {
        let checkpoints = self.checkpoints.entry(path.to_string()).or_default();
        if size < checkpoints.size_seen {
            tracing::info!(path = %path, size, previous = checkpoints.size_seen, "File shrank, dropping checkpoints");
            checkpoints.marks.clear();
        }
        checkpoints.size_seen = size;

        let (mut line, mut byte) = checkpoints.nearest(start_line);
        let mut scan = byte;
        while line < start_line {
            let block = match session.read_range(path, scan, self.settings.count_chunk_bytes).await {
                RemoteOutcome::Ok(block) => block,
                RemoteOutcome::TimedOut => return RemoteOutcome::TimedOut,
                RemoteOutcome::Failed(e) => return RemoteOutcome::Failed(e),
            };
            if block.is_empty() {
                return RemoteOutcome::Ok(None);
            }
            for (i, b) in block.iter().enumerate() {
                if *b == b'\n' {
                    line += 1;
                    byte = scan + i as u64 + 1;
                    if line == start_line {
                        break;
                    }
                }
            }
            scan += block.len() as u64;
            checkpoints.record(line, byte);
        }

        checkpoints.record(line, byte);
        RemoteOutcome::Ok(Some(byte))
    }

    /// Read up to `max_lines` complete lines after skipping `start_line`.
    ///
    /// Transport failures before any line was read are returned as errors;
    /// timeouts never are.
    pub async fn read_lines(
        &mut self,
        session: &mut TransportSession,
        path: &str,
        start_line: u64,
        max_lines: usize,
    ) -> Result<ReadOutcome, TransportError> {
        let mut outcome = ReadOutcome::empty(start_line);

        let size = match session.stat(path).await {
            RemoteOutcome::Ok(stat) => stat.size,
            RemoteOutcome::TimedOut => {
                outcome.timed_out = true;
                return Ok(outcome);
            }
            RemoteOutcome::Failed(e) => return Err(e),
        };

        let byte = match self.seek_line(session, path, size, start_line).await {
            RemoteOutcome::Ok(Some(byte)) => byte,
            RemoteOutcome::Ok(None) => {
                outcome.rotated = true;
                outcome.reached_eof = true;
                return Ok(outcome);
            }
            RemoteOutcome::Failed(e) => return Err(e),
            RemoteOutcome::TimedOut => {
                outcome.timed_out = true;
                return Ok(outcome);
            }
        };

        let mut pos = Position { line: start_line, byte, pending: Vec::new(), eof: false };
        let chunk_timeout = Duration::from_secs(self.settings.chunk_timeout_secs);
        let chunk_lines = self.settings.chunk_lines.max(1);
        let block_bytes = self.settings.block_bytes.max(1);

        while outcome.lines.len() < max_lines && !pos.eof {
            let target = chunk_lines.min(max_lines - outcome.lines.len());
            let mut chunk = Vec::with_capacity(target);
            let result = tokio::time::timeout(
                chunk_timeout,
                fill_chunk(session, path, &mut pos, &mut chunk, target, block_bytes),
            )
            .await;
            outcome.lines.append(&mut chunk);

            match result {
                Ok(Ok(())) => {}
                Ok(Err(TransportError::Timeout(_))) => {
                    outcome.timed_out = true;
                    break;
                }
                Err(_) => {
                    session.note_timeout("read_chunk", path).await;
                    outcome.timed_out = true;
                    break;
                }
                Ok(Err(e)) if outcome.lines.is_empty() => return Err(e),
                Ok(Err(e)) => {
                    tracing::warn!(path = %path, error = %e, delivered = outcome.lines.len(), "Read stopped early");
                    break;
                }
            }
        }

        outcome.reached_eof = pos.eof && pos.pending.iter().all(|b| *b != b'\n');
        outcome.held_back_bytes = if pos.eof { pos.pending.len() } else { 0 };

        let cp = self.checkpoints.entry(path.to_string()).or_default();
        cp.size_seen = cp.size_seen.max(pos.byte + pos.pending.len() as u64);
        cp.record(pos.line, pos.byte);

        if outcome.timed_out {
            tracing::warn!(
                path = %path,
                start_line,
                delivered = outcome.lines.len(),
                "Read timed out, returning partial data"
            );
        }
        Ok(outcome)
    }
}
