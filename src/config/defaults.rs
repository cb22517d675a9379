//! System-wide default constants.
//!
//! Every tunable in `harvester.toml` falls back to one of these values.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Harvest Scheduler
// ============================================================================

/// Poll interval for the kill CSV stream (seconds).
pub const CSV_INTERVAL_SECS: u64 = 60;

/// Poll interval for the text log stream (seconds).
pub const LOG_INTERVAL_SECS: u64 = 30;

/// Hard ceiling on a single harvest cycle (seconds). A cycle that runs
/// longer is failed and its connection torn down.
pub const CYCLE_CEILING_SECS: u64 = 45;

/// Maximum lines read per cycle. The remainder is picked up next tick.
pub const MAX_LINES_PER_CYCLE: usize = 5_000;

// ============================================================================
// Transport
// ============================================================================

/// TCP connect + handshake + authentication budget (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Timeout for a single remote operation (list, stat, read) (seconds).
pub const OP_TIMEOUT_SECS: u64 = 10;

/// A session with no successful operation for this long is considered
/// dead and is reconnected on next use (seconds).
pub const HEARTBEAT_STALE_SECS: u64 = 300;

/// Consecutive operation timeouts that force a disconnect.
pub const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

/// Initial reconnect delay (doubles each failed attempt).
pub const BACKOFF_INITIAL_SECS: u64 = 2;

/// Reconnect delay cap (seconds).
pub const BACKOFF_MAX_SECS: u64 = 60;

/// Failed connects in a row before the server is reported degraded.
pub const DEGRADED_AFTER_FAILURES: u32 = 5;

// ============================================================================
// Discovery
// ============================================================================

/// Directory listing cache lifetime (seconds).
pub const DIR_CACHE_TTL_SECS: u64 = 300;

/// How long the latest-CSV result is reused before searching again (seconds).
pub const CSV_RESULT_TTL_SECS: u64 = 300;

/// Maximum directory depth for recursive searches.
pub const MAX_SEARCH_DEPTH: usize = 6;

/// Text log file name looked up under `{server_root}/Logs/`.
pub const LOG_FILENAME: &str = "Deadside.log";

/// Subdirectories (relative to the server root) searched for kill CSVs.
pub const CSV_SEARCH_PATHS: &[&str] = &["actual1/deathlogs", "deathlogs"];

// ============================================================================
// Reader
// ============================================================================

/// Lines per read chunk.
pub const CHUNK_LINES: usize = 1_000;

/// Timeout per read chunk (seconds). A timed-out chunk returns what it had.
pub const CHUNK_TIMEOUT_SECS: u64 = 3;

/// Bytes requested per ranged read.
pub const BLOCK_BYTES: usize = 64 * 1024;

/// Chunk size for streamed line counting.
pub const COUNT_CHUNK_BYTES: usize = 1024 * 1024;

/// Total bytes streamed before the line count is extrapolated.
pub const COUNT_BYTE_BUDGET: u64 = 100 * 1024 * 1024;

/// Line estimate returned when both counting strategies fail. Never zero.
pub const FALLBACK_LINE_ESTIMATE: u64 = 600;

/// Timeout for the remote `wc -l` command (seconds).
pub const REMOTE_COUNT_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Rivalry
// ============================================================================

/// Minimum head-to-head kills for a prey or nemesis to be reported.
pub const RIVALRY_MIN_KILLS: u32 = 3;

/// Interval between rivalry recomputations (seconds). 3 600 = hourly.
pub const RIVALRY_INTERVAL_SECS: u64 = 3_600;

// ============================================================================
// Storage
// ============================================================================

/// Default data directory for the sled database.
pub const DATA_DIR: &str = "./data";

/// Default output directory for the JSONL event sink.
pub const SINK_OUTPUT_DIR: &str = "./data/events";

/// Config file looked up in the working directory.
pub const CONFIG_FILENAME: &str = "harvester.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "HARVESTER_CONFIG";
