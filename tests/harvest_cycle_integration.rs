//! Harvest Cycle Integration Tests
//!
//! Drives full cycles (connect -> discover -> read -> parse -> sink -> cursor)
//! against the in-memory filesystem and checks the cursor contract: it moves
//! by exactly the lines handed to the sink, never past them, and a resumed
//! stream has no gaps or duplicates.

use std::sync::Arc;
use std::time::Duration;

use log_harvester::config::HarvestConfig;
use log_harvester::pipeline::{build_harvester, run_bounded_cycle, CycleError, MemorySink, ServerHarvester};
use log_harvester::storage::{CursorStore, InMemoryCursorStore};
use log_harvester::transport::{MemoryConnector, MemoryFs, TransportError};
use log_harvester::types::{Backend, Credentials, EventBatch, FileKind, ServerDescriptor};

const ROOT: &str = "10.0.0.5_7020";

fn server() -> ServerDescriptor {
    ServerDescriptor {
        server_id: "7020".to_string(),
        host: "10.0.0.5".to_string(),
        port: 22,
        username: "harvest".to_string(),
        credentials: Credentials::None,
        base_path_hint: None,
        backend: Backend::Sftp,
    }
}

fn csv_path(world: &str, stamp: &str) -> String {
    format!("{ROOT}/deathlogs/{world}/{stamp}.csv")
}

fn kill_line(i: usize) -> String {
    format!(
        "2025.03.01-12.{:02}.{:02};Killer{i};{};Victim{i};{};AK-74;{}.5\n",
        i / 60 % 60,
        i % 60,
        1000 + i,
        2000 + i,
        10 + i
    )
}

fn kill_lines(range: std::ops::Range<usize>) -> String {
    range.map(kill_line).collect()
}

struct Harness {
    fs: MemoryFs,
    harvester: ServerHarvester,
    cursors: Arc<InMemoryCursorStore>,
    sink: Arc<MemorySink>,
}

fn harness_with(config: &HarvestConfig) -> Harness {
    let fs = MemoryFs::new();
    fs.mkdir(ROOT);
    let cursors = Arc::new(InMemoryCursorStore::new());
    let sink = Arc::new(MemorySink::new());
    let harvester = build_harvester(
        config,
        server(),
        Arc::new(MemoryConnector::new(fs.clone())),
        cursors.clone(),
        sink.clone(),
    )
    .unwrap();
    Harness { fs, harvester, cursors, sink }
}

fn harness() -> Harness {
    harness_with(&HarvestConfig::default())
}

/// Config with discovery caching off so new files are seen immediately.
fn uncached_config() -> HarvestConfig {
    let mut config = HarvestConfig::default();
    config.discovery.dir_cache_ttl_secs = 0;
    config.discovery.csv_result_ttl_secs = 0;
    config
}

fn killer_names(sink: &MemorySink) -> Vec<String> {
    sink.kills().into_iter().filter_map(|k| k.killer_name).collect()
}

fn expected_names(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("Killer{i}")).collect()
}

fn cursor_line(cursors: &InMemoryCursorStore, kind: FileKind) -> Option<u64> {
    cursors.load("7020", kind).unwrap().map(|c| c.last_line_index)
}

// ============================================================================
// Cursor advancement
// ============================================================================

#[tokio::test]
async fn cycle_emits_exactly_the_new_lines() {
    let mut h = harness();
    let path = csv_path("world_0", "2025.03.01-00.00.00");
    h.fs.write_file(&path, kill_lines(0..4));

    let first = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert_eq!(first.start_line, 0);
    assert_eq!(first.lines_read, 4);
    assert_eq!(first.cursor, 4);
    assert!(first.file.ends_with("2025.03.01-00.00.00.csv"));

    h.fs.append(&path, kill_lines(4..10));
    let second = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert_eq!(second.start_line, 4);
    assert_eq!(second.lines_read, 6);
    assert_eq!(cursor_line(&h.cursors, FileKind::Csv), Some(10));
    assert_eq!(killer_names(&h.sink), expected_names(0..10));

    // Nothing new: no sink call, cursor unchanged
    let idle = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert_eq!(idle.lines_read, 0);
    assert_eq!(h.sink.batches().len(), 2);
    assert_eq!(cursor_line(&h.cursors, FileKind::Csv), Some(10));
}

#[tokio::test]
async fn max_lines_per_cycle_bounds_each_cycle() {
    let mut config = HarvestConfig::default();
    config.harvest.max_lines_per_cycle = 3;
    let mut h = harness_with(&config);
    h.fs.write_file(&csv_path("world_0", "2025.03.01-00.00.00"), kill_lines(0..7));

    let cursors: Vec<u64> = {
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(h.harvester.run_cycle(FileKind::Csv).await.unwrap().cursor);
        }
        seen
    };
    assert_eq!(cursors, vec![3, 6, 7, 7]);
    assert_eq!(killer_names(&h.sink), expected_names(0..7));
}

#[tokio::test]
async fn malformed_lines_are_consumed_but_not_emitted() {
    let mut h = harness();
    let body = format!("{}garbage;line\n\n{}", kill_line(0), kill_line(1));
    h.fs.write_file(&csv_path("world_0", "2025.03.01-00.00.00"), body);

    let report = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert_eq!(report.lines_read, 4);
    assert_eq!(report.events, 2);
    assert_eq!(report.parse_failures, 1);
    assert_eq!(report.cursor, 4);
}

#[tokio::test]
async fn unterminated_tail_waits_for_newline() {
    let mut h = harness();
    let path = csv_path("world_0", "2025.03.01-00.00.00");
    let partial = kill_line(1);
    let (head, tail) = partial.split_at(20);
    h.fs.write_file(&path, format!("{}{}", kill_line(0), head));

    let first = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert_eq!(first.cursor, 1);

    h.fs.append(&path, tail);
    let second = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert_eq!(second.cursor, 2);
    assert_eq!(killer_names(&h.sink), expected_names(0..2));
}

#[tokio::test(start_paused = true)]
async fn timeout_mid_read_resumes_without_gap_or_duplicate() {
    let mut config = HarvestConfig::default();
    config.reader.chunk_lines = 2;
    config.reader.block_bytes = 16;
    let mut h = harness_with(&config);
    let path = csv_path("world_0", "2025.03.01-00.00.00");
    h.fs.write_file(&path, kill_lines(0..10));
    let stall_at = kill_lines(0..5).len() as u64;
    h.fs.stall_reads_from(&path, stall_at);

    let first = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert!(first.timed_out);
    let k = first.lines_read;
    assert!(k > 0 && k < 10, "partial read expected, got {k}");
    assert_eq!(first.cursor, k as u64);
    assert_eq!(cursor_line(&h.cursors, FileKind::Csv), Some(k as u64));
    assert_eq!(killer_names(&h.sink), expected_names(0..k));

    h.fs.clear_stalls();
    let second = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert_eq!(second.start_line, k as u64);
    assert!(!second.timed_out);
    assert_eq!(second.cursor, 10);
    assert_eq!(killer_names(&h.sink), expected_names(0..10));
}

#[tokio::test]
async fn sink_rejection_leaves_cursor_in_place() {
    let mut h = harness();
    h.fs.write_file(&csv_path("world_0", "2025.03.01-00.00.00"), kill_lines(0..5));

    h.sink.set_reject(true);
    let err = h.harvester.run_cycle(FileKind::Csv).await.unwrap_err();
    assert!(matches!(err, CycleError::Sink(_)));
    assert_eq!(cursor_line(&h.cursors, FileKind::Csv), None);

    h.sink.set_reject(false);
    let report = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert_eq!(report.start_line, 0);
    assert_eq!(report.cursor, 5);
    assert_eq!(killer_names(&h.sink), expected_names(0..5));
}

// ============================================================================
// File changes
// ============================================================================

#[tokio::test]
async fn newer_file_starts_a_new_watermark() {
    let mut h = harness_with(&uncached_config());
    h.fs.write_file(&csv_path("world_0", "2025.02.01-00.00.00"), kill_lines(0..3));
    assert_eq!(h.harvester.run_cycle(FileKind::Csv).await.unwrap().cursor, 3);

    h.fs.write_file(&csv_path("world_1", "2025.03.01-00.00.00"), kill_lines(3..5));
    let report = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert!(report.new_file);
    assert!(report.file.ends_with("world_1/2025.03.01-00.00.00.csv"));
    assert_eq!(report.start_line, 0);
    assert_eq!(report.cursor, 2);

    let cursor = h.cursors.load("7020", FileKind::Csv).unwrap().unwrap();
    assert_eq!(cursor.file_path.as_deref(), Some(report.file.as_str()));
    assert_eq!(killer_names(&h.sink), expected_names(0..5));
}

#[tokio::test]
async fn previous_file_is_finished_before_switching() {
    let mut h = harness_with(&uncached_config());
    let old = csv_path("world_0", "2025.02.01-00.00.00");
    h.fs.write_file(&old, kill_lines(0..3));
    assert_eq!(h.harvester.run_cycle(FileKind::Csv).await.unwrap().cursor, 3);

    // Server writes its last kills to the old file, then rolls over
    h.fs.append(&old, kill_lines(3..5));
    h.fs.write_file(&csv_path("world_0", "2025.03.01-00.00.00"), kill_lines(5..7));

    let tail = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert!(tail.file.ends_with("2025.02.01-00.00.00.csv"));
    assert!(!tail.new_file);
    assert_eq!((tail.start_line, tail.cursor), (3, 5));

    let switched = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert!(switched.new_file);
    assert!(switched.file.ends_with("2025.03.01-00.00.00.csv"));
    assert_eq!((switched.start_line, switched.cursor), (0, 2));

    let idle = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert_eq!(idle.lines_read, 0);
    assert_eq!(killer_names(&h.sink), expected_names(0..7));
}

#[tokio::test]
async fn previous_file_tail_respects_max_lines() {
    let mut config = uncached_config();
    config.harvest.max_lines_per_cycle = 2;
    let mut h = harness_with(&config);
    let old = csv_path("world_0", "2025.02.01-00.00.00");
    h.fs.write_file(&old, kill_lines(0..2));
    h.harvester.run_cycle(FileKind::Csv).await.unwrap();

    h.fs.append(&old, kill_lines(2..5));
    h.fs.write_file(&csv_path("world_1", "2025.03.01-00.00.00"), kill_lines(5..6));

    let files: Vec<(bool, u64)> = {
        let mut seen = Vec::new();
        for _ in 0..3 {
            let report = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
            seen.push((report.file.ends_with("2025.02.01-00.00.00.csv"), report.cursor));
        }
        seen
    };
    assert_eq!(files, [(true, 4), (true, 5), (false, 1)]);
    assert_eq!(killer_names(&h.sink), expected_names(0..6));
}

#[tokio::test]
async fn truncated_file_is_read_from_the_start() {
    let mut h = harness();
    let path = csv_path("world_0", "2025.03.01-00.00.00");
    h.fs.write_file(&path, kill_lines(0..6));
    assert_eq!(h.harvester.run_cycle(FileKind::Csv).await.unwrap().cursor, 6);

    h.fs.write_file(&path, kill_lines(100..102));
    let report = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert!(report.rotated);
    assert_eq!(report.start_line, 0);
    assert_eq!(report.cursor, 2);
    assert_eq!(&killer_names(&h.sink)[6..], &expected_names(100..102)[..]);
}

#[tokio::test]
async fn vanished_file_is_rediscovered() {
    let mut h = harness();
    let old = csv_path("world_0", "2025.02.01-00.00.00");
    h.fs.write_file(&old, kill_lines(0..2));
    h.harvester.run_cycle(FileKind::Csv).await.unwrap();

    h.fs.remove(&old);
    h.fs.write_file(&csv_path("world_0", "2025.03.01-00.00.00"), kill_lines(2..4));

    let err = h.harvester.run_cycle(FileKind::Csv).await.unwrap_err();
    assert!(matches!(err, CycleError::Transport(TransportError::NotFound(_))));
    assert_eq!(cursor_line(&h.cursors, FileKind::Csv), Some(2));

    let report = h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert!(report.new_file);
    assert_eq!(report.cursor, 2);
    assert_eq!(killer_names(&h.sink), expected_names(0..4));
}

// ============================================================================
// Log stream, backlog and failure handling
// ============================================================================

#[tokio::test]
async fn log_cycle_splits_connections_and_game_events() {
    let mut h = harness();
    h.fs.write_file(
        &format!("{ROOT}/Logs/Deadside.log"),
        "[2025.05.01-12.00.00:001][  0]LogNet: Player Rambo (a1b2c3d4) connected\n\
         [2025.05.01-12.00.05] LogStreaming: Display: noise\n\
         [2025.05.01-12.01.00] Air drop inbound at location: Sawmill\n\
         [2025.05.01-12.09.00] Player Rambo (a1b2c3d4) disconnected\n",
    );

    let report = h.harvester.run_cycle(FileKind::Log).await.unwrap();
    assert_eq!(report.lines_read, 4);
    assert_eq!(report.events, 3);
    assert_eq!(report.cursor, 4);

    let batches = h.sink.batches();
    assert_eq!(batches.len(), 1);
    match &batches[0].1 {
        EventBatch::Log { game_events, connections } => {
            assert_eq!(game_events.len(), 1);
            assert_eq!(game_events[0].kind, "airdrop");
            assert_eq!(connections.len(), 2);
        }
        other => panic!("expected log batch, got {other:?}"),
    }
    // The two streams keep separate cursors
    assert_eq!(cursor_line(&h.cursors, FileKind::Csv), None);
}

#[tokio::test]
async fn backlog_picks_march_file_and_subtracts_cursor() {
    let mut h = harness();
    h.fs.write_file(&csv_path("world_0", "2025.01.15-08.00.00"), kill_lines(0..1));
    h.fs.write_file(&csv_path("world_1", "2025.03.02-09.30.00"), kill_lines(0..8));
    h.fs.write_file(&csv_path("world_2", "2025.02.20-23.59.59"), kill_lines(0..1));

    h.harvester.run_cycle(FileKind::Csv).await.unwrap();
    h.fs.append(&csv_path("world_1", "2025.03.02-09.30.00"), kill_lines(8..11));

    let backlog = h.harvester.backlog(FileKind::Csv).await.unwrap();
    assert_eq!(backlog.file.raw_name, "2025.03.02-09.30.00.csv");
    assert_eq!(backlog.estimate.lines, 11);
    assert_eq!(backlog.pending_lines, 3);
}

#[tokio::test]
async fn missing_csv_is_a_discovery_error() {
    let mut h = harness();
    let err = h.harvester.run_cycle(FileKind::Csv).await.unwrap_err();
    assert!(matches!(err, CycleError::Discovery(_)));
    assert!(h.sink.batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cycle_over_ceiling_is_aborted_and_disconnected() {
    let mut h = harness();
    h.fs.write_file(&csv_path("world_0", "2025.03.01-00.00.00"), kill_lines(0..3));
    h.harvester.session_mut().connect().await.unwrap();
    h.fs.stall_everything(true);

    let outcome = run_bounded_cycle(&mut h.harvester, FileKind::Csv, Duration::from_secs(5)).await;
    assert!(outcome.is_none());
    assert!(!h.harvester.session().is_connected());
    assert!(h.harvester.session().backoff_remaining().is_some());
    assert_eq!(cursor_line(&h.cursors, FileKind::Csv), None);
}
