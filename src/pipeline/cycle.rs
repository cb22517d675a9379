//! One harvest cycle for one (server, kind) stream.
//!
//! `Idle -> Connecting -> Discovering -> Reading -> Parsing -> Emitting -> Idle`
//!
//! Any failure drops back to `Idle` with the cursor untouched. The cursor
//! moves only after the sink accepted the batch, and by exactly the number
//! of lines that were read, so partial reads resume with no gap or repeat.
//! When discovery turns up a newer file, the one the cursor points at is
//! read to its end first.

use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::discovery::{DiscoveryError, FileDiscovery};
use crate::parsing::{KillLineParser, LogLineParser};
use crate::reader::{estimate_line_count, ChunkedReader, LineEstimate, ReadOutcome};
use crate::storage::{CursorStore, StorageError};
use crate::transport::{TransportError, TransportSession};
use crate::types::{DiscoveredFile, EventBatch, FileKind, IngestionCursor};

use super::sink::{EventSink, SinkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Connecting,
    Discovering,
    Reading,
    Parsing,
    Emitting,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Connecting => "connecting",
            CyclePhase::Discovering => "discovering",
            CyclePhase::Reading => "reading",
            CyclePhase::Parsing => "parsing",
            CyclePhase::Emitting => "emitting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("sink rejected batch: {0}")]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CycleError {
    /// Waiting out reconnect backoff is expected and not worth a warning.
    pub fn is_backoff(&self) -> bool {
        matches!(
            self,
            CycleError::Transport(TransportError::BackingOff { .. })
                | CycleError::Discovery(DiscoveryError::Transport(TransportError::BackingOff { .. }))
        )
    }
}

/// What one successful cycle did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub server_id: String,
    pub kind: FileKind,
    pub file: String,
    pub start_line: u64,
    pub lines_read: usize,
    pub events: usize,
    pub parse_failures: usize,
    pub cursor: u64,
    pub new_file: bool,
    pub rotated: bool,
    pub timed_out: bool,
    pub reached_eof: bool,
}

/// Backlog snapshot for one stream.
#[derive(Debug, Clone, Serialize)]
pub struct Backlog {
    pub kind: FileKind,
    pub file: DiscoveredFile,
    pub estimate: LineEstimate,
    pub cursor: Option<IngestionCursor>,
    pub pending_lines: u64,
}

/// Parsed lines plus the number that failed to parse.
fn parse_lines(
    kind: FileKind,
    lines: &[String],
    kills: &KillLineParser,
    log: &LogLineParser,
) -> (EventBatch, usize) {
    let iter = lines.iter().map(String::as_str);
    match kind {
        FileKind::Csv => {
            let batch = kills.parse_batch(iter);
            if let Some((line, reason)) = &batch.first_failure {
                tracing::warn!(
                    failures = batch.failures,
                    first = %line,
                    reason = %reason,
                    "Malformed CSV lines skipped"
                );
            }
            (EventBatch::Csv { kills: batch.events }, batch.failures)
        }
        FileKind::Log => {
            let (game_events, connections) = log.parse_batch(iter);
            (EventBatch::Log { game_events, connections }, 0)
        }
    }
}

fn parent_dir(path: &str) -> &str {
    Path::new(path)
        .parent()
        .and_then(|p| p.to_str())
        .filter(|p| !p.is_empty())
        .unwrap_or(".")
}

/// Owns everything needed to harvest one server.
pub struct ServerHarvester {
    session: TransportSession,
    discovery: FileDiscovery,
    reader: ChunkedReader,
    kill_parser: KillLineParser,
    log_parser: LogLineParser,
    cursors: Arc<dyn CursorStore>,
    sink: Arc<dyn EventSink>,
    max_lines: usize,
    phase: CyclePhase,
}

impl ServerHarvester {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: TransportSession,
        discovery: FileDiscovery,
        reader: ChunkedReader,
        kill_parser: KillLineParser,
        log_parser: LogLineParser,
        cursors: Arc<dyn CursorStore>,
        sink: Arc<dyn EventSink>,
        max_lines: usize,
    ) -> Self {
        Self {
            session,
            discovery,
            reader,
            kill_parser,
            log_parser,
            cursors,
            sink,
            max_lines: max_lines.max(1),
            phase: CyclePhase::Idle,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.session.server().server_id
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut TransportSession {
        &mut self.session
    }

    /// Fail an in-flight cycle that overran its ceiling.
    pub async fn abort_cycle(&mut self, reason: &str) {
        tracing::warn!(server = %self.server_id(), phase = %self.phase, reason, "Cycle aborted");
        self.phase = CyclePhase::Idle;
        self.session.fail_and_disconnect(reason).await;
    }

    /// Run one cycle for `kind`.
    pub async fn run_cycle(&mut self, kind: FileKind) -> Result<CycleReport, CycleError> {
        let result = self.cycle(kind).await;
        if let Err(e) = &result {
            if !e.is_backoff() {
                tracing::warn!(server = %self.server_id(), kind = %kind, phase = %self.phase, error = %e, "Cycle failed");
            }
        }
        self.phase = CyclePhase::Idle;
        result
    }

    async fn cycle(&mut self, kind: FileKind) -> Result<CycleReport, CycleError> {
        self.phase = CyclePhase::Connecting;
        self.session.ensure_connected().await?;

        self.phase = CyclePhase::Discovering;
        let file = self.discovery.locate(&mut self.session, kind).await?;

        let server_id = self.server_id().to_string();
        let cursor = self.cursors.load(&server_id, kind)?;
        let previous_path = cursor.as_ref().and_then(|c| c.file_path.clone());
        let new_file = previous_path.as_deref() != Some(file.path.as_str());
        let start_line = cursor.as_ref().map_or(0, |c| c.start_line_for(&file.path));
        if new_file {
            if let Some(old) = previous_path.as_deref() {
                let old_line = cursor.as_ref().map_or(0, |c| c.last_line_index);
                if let Some(report) = self.drain_previous(kind, &server_id, old, old_line).await? {
                    return Ok(report);
                }
                tracing::info!(server = %server_id, kind = %kind, from = %old, to = %file.path, "Switched to new file");
                self.reader.forget(Some(old));
            }
        }

        self.phase = CyclePhase::Reading;
        let mut outcome = self.read(kind, &file.path, start_line).await?;
        let rotated = outcome.rotated;
        if rotated {
            tracing::info!(
                server = %server_id,
                kind = %kind,
                path = %file.path,
                cursor = start_line,
                "File is shorter than cursor, treating as rotated"
            );
            self.cursors.save(&IngestionCursor {
                server_id: server_id.clone(),
                file_kind: kind,
                file_path: Some(file.path.clone()),
                last_line_index: 0,
                updated_at: Utc::now(),
            })?;
            self.reader.forget(Some(&file.path));
            outcome = self.read(kind, &file.path, 0).await?;
        }

        self.emit(kind, server_id, file.path, outcome, new_file, rotated).await
    }

    /// Finish the file the cursor still points at before moving on.
    ///
    /// Returns a report while the old file still yields lines (or a read
    /// timed out); `None` once it is exhausted, gone or truncated.
    async fn drain_previous(
        &mut self,
        kind: FileKind,
        server_id: &str,
        old: &str,
        start_line: u64,
    ) -> Result<Option<CycleReport>, CycleError> {
        self.phase = CyclePhase::Reading;
        let outcome = match self
            .reader
            .read_lines(&mut self.session, old, start_line, self.max_lines)
            .await
        {
            Ok(outcome) => outcome,
            Err(TransportError::NotFound(_)) => {
                tracing::warn!(server = %server_id, kind = %kind, path = %old, cursor = start_line, "Previous file vanished before it was finished");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if outcome.rotated {
            tracing::warn!(server = %server_id, kind = %kind, path = %old, cursor = start_line, "Previous file shrank, abandoning it");
            return Ok(None);
        }
        if outcome.lines.is_empty() && !outcome.timed_out {
            if outcome.held_back_bytes > 0 {
                tracing::warn!(
                    server = %server_id,
                    kind = %kind,
                    path = %old,
                    bytes = outcome.held_back_bytes,
                    "Previous file ends without a newline, dropping its last partial line"
                );
            }
            return Ok(None);
        }

        tracing::debug!(server = %server_id, kind = %kind, path = %old, lines = outcome.lines.len(), "Finishing previous file");
        let report = self
            .emit(kind, server_id.to_string(), old.to_string(), outcome, false, false)
            .await?;
        Ok(Some(report))
    }

    /// Parse, hand to the sink, then advance the cursor past what was read.
    async fn emit(
        &mut self,
        kind: FileKind,
        server_id: String,
        path: String,
        outcome: ReadOutcome,
        new_file: bool,
        rotated: bool,
    ) -> Result<CycleReport, CycleError> {
        self.phase = CyclePhase::Parsing;
        let (batch, parse_failures) = parse_lines(kind, &outcome.lines, &self.kill_parser, &self.log_parser);

        self.phase = CyclePhase::Emitting;
        if !batch.is_empty() {
            self.sink.accept(&server_id, &batch).await?;
        }

        let next = outcome.next_line();
        if !outcome.lines.is_empty() || new_file {
            self.cursors.advance(&server_id, kind, &path, next)?;
        }

        let report = CycleReport {
            server_id,
            kind,
            file: path,
            start_line: outcome.start_line,
            lines_read: outcome.lines.len(),
            events: batch.len(),
            parse_failures,
            cursor: next,
            new_file,
            rotated,
            timed_out: outcome.timed_out,
            reached_eof: outcome.reached_eof,
        };
        if report.lines_read > 0 {
            tracing::info!(
                server = %report.server_id,
                kind = %kind,
                lines = report.lines_read,
                events = report.events,
                cursor = report.cursor,
                "Cycle complete"
            );
        } else {
            tracing::debug!(server = %report.server_id, kind = %kind, cursor = report.cursor, "No new lines");
        }
        Ok(report)
    }

    async fn read(&mut self, kind: FileKind, path: &str, start_line: u64) -> Result<ReadOutcome, CycleError> {
        match self
            .reader
            .read_lines(&mut self.session, path, start_line, self.max_lines)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(TransportError::NotFound(missing)) => {
                self.discovery.invalidate(kind);
                self.session.invalidate_listing(parent_dir(path));
                self.reader.forget(Some(path));
                Err(TransportError::NotFound(missing).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Connect, locate the `kind` file and estimate how far behind the cursor is.
    pub async fn backlog(&mut self, kind: FileKind) -> Result<Backlog, CycleError> {
        self.session.ensure_connected().await?;
        let file = self.discovery.locate(&mut self.session, kind).await?;
        let estimate = estimate_line_count(&mut self.session, &file.path, self.reader.settings()).await;
        let cursor = self.cursors.load(self.server_id(), kind)?;
        let done = cursor.as_ref().map_or(0, |c| c.start_line_for(&file.path));
        Ok(Backlog {
            kind,
            pending_lines: estimate.lines.saturating_sub(done),
            file,
            estimate,
            cursor,
        })
    }
}
