//! Harvester configuration loaded from TOML.
//!
//! Every field has a serde default so a partial file (or no file at all)
//! yields a working configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::types::{ServerDescriptor, SuicideCategory};

// ============================================================================
// Top-level Config
// ============================================================================

/// Complete harvester configuration.
///
/// Loaded from (in order of priority):
/// 1. `$HARVESTER_CONFIG` env var
/// 2. `./harvester.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub harvest: HarvestSettings,

    #[serde(default)]
    pub transport: TransportSettings,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub reader: ReaderSettings,

    #[serde(default)]
    pub rivalry: RivalrySettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub sink: SinkSettings,

    /// Ordered keyword table for suicide classification. First match wins.
    #[serde(default = "default_suicide_categories")]
    pub suicide_categories: Vec<SuicideRule>,

    /// Ordered game-event patterns for the text log parser.
    #[serde(default = "default_game_events")]
    pub game_events: Vec<GameEventPattern>,

    #[serde(default)]
    pub servers: Vec<ServerDescriptor>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            harvest: HarvestSettings::default(),
            transport: TransportSettings::default(),
            discovery: DiscoverySettings::default(),
            reader: ReaderSettings::default(),
            rivalry: RivalrySettings::default(),
            storage: StorageSettings::default(),
            sink: SinkSettings::default(),
            suicide_categories: default_suicide_categories(),
            game_events: default_game_events(),
            servers: Vec::new(),
        }
    }
}

impl HarvestConfig {
    /// Load configuration using the standard search order.
    ///
    /// A file that fails to load or validate is logged and skipped, so the
    /// process always starts with *some* configuration.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), servers = config.servers.len(), "Loaded config from HARVESTER_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from HARVESTER_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "HARVESTER_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(defaults::CONFIG_FILENAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(servers = config.servers.len(), "Loaded config from ./harvester.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./harvester.toml, using defaults");
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys are warned, not rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string (used by `harvester config --dump`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Look up a configured server by id.
    pub fn server(&self, server_id: &str) -> Option<&ServerDescriptor> {
        self.servers.iter().find(|s| s.server_id == server_id)
    }

    /// Check internal consistency. All problems are reported at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let h = &self.harvest;
        Self::check_positive(h.csv_interval_secs, "harvest.csv_interval_secs", &mut errors);
        Self::check_positive(h.log_interval_secs, "harvest.log_interval_secs", &mut errors);
        Self::check_positive(h.cycle_ceiling_secs, "harvest.cycle_ceiling_secs", &mut errors);
        if h.max_lines_per_cycle == 0 {
            errors.push("harvest.max_lines_per_cycle must be > 0".to_string());
        }

        let t = &self.transport;
        Self::check_positive(t.connect_timeout_secs, "transport.connect_timeout_secs", &mut errors);
        Self::check_positive(t.op_timeout_secs, "transport.op_timeout_secs", &mut errors);
        Self::check_positive(t.backoff_initial_secs, "transport.backoff_initial_secs", &mut errors);
        if t.backoff_max_secs < t.backoff_initial_secs {
            errors.push(format!(
                "transport.backoff_max_secs ({}) must be >= backoff_initial_secs ({})",
                t.backoff_max_secs, t.backoff_initial_secs
            ));
        }
        if t.max_consecutive_timeouts == 0 {
            errors.push("transport.max_consecutive_timeouts must be > 0".to_string());
        }

        if self.discovery.max_depth == 0 {
            errors.push("discovery.max_depth must be > 0".to_string());
        }
        if self.discovery.log_filename.trim().is_empty() {
            errors.push("discovery.log_filename must not be empty".to_string());
        }

        let r = &self.reader;
        if r.chunk_lines == 0 {
            errors.push("reader.chunk_lines must be > 0".to_string());
        }
        Self::check_positive(r.chunk_timeout_secs, "reader.chunk_timeout_secs", &mut errors);
        if r.block_bytes == 0 || r.count_chunk_bytes == 0 {
            errors.push("reader.block_bytes and reader.count_chunk_bytes must be > 0".to_string());
        }
        if r.count_byte_budget < r.count_chunk_bytes as u64 {
            errors.push(format!(
                "reader.count_byte_budget ({}) must be >= count_chunk_bytes ({})",
                r.count_byte_budget, r.count_chunk_bytes
            ));
        }
        if r.fallback_line_estimate == 0 {
            errors.push("reader.fallback_line_estimate must be > 0 (zero reads as an empty file)".to_string());
        }

        if self.rivalry.min_kills == 0 {
            errors.push("rivalry.min_kills must be > 0".to_string());
        }
        Self::check_positive(self.rivalry.interval_secs, "rivalry.interval_secs", &mut errors);

        for rule in &self.suicide_categories {
            if rule.keywords.iter().all(|k| k.trim().is_empty()) {
                errors.push(format!("suicide_categories.{} has no keywords", rule.category));
            }
        }

        let mut kinds = HashSet::new();
        for pattern in &self.game_events {
            if !kinds.insert(pattern.kind.as_str()) {
                errors.push(format!("game_events: duplicate kind '{}'", pattern.kind));
            }
            if let Err(e) = regex::Regex::new(&pattern.pattern) {
                errors.push(format!("game_events.{}: invalid pattern: {}", pattern.kind, e));
            }
        }

        let mut ids = HashSet::new();
        for server in &self.servers {
            if server.server_id.trim().is_empty() {
                errors.push("servers: server_id must not be empty".to_string());
            }
            if server.host.trim().is_empty() {
                errors.push(format!("servers.{}: host must not be empty", server.server_id));
            }
            if !ids.insert(server.server_id.as_str()) {
                errors.push(format!("servers: duplicate server_id '{}'", server.server_id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: u64, name: &str, errors: &mut Vec<String>) {
        if value == 0 {
            errors.push(format!("{name} must be > 0"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSettings {
    #[serde(default = "default_csv_interval")]
    pub csv_interval_secs: u64,
    #[serde(default = "default_log_interval")]
    pub log_interval_secs: u64,
    #[serde(default = "default_cycle_ceiling")]
    pub cycle_ceiling_secs: u64,
    #[serde(default = "default_max_lines_per_cycle")]
    pub max_lines_per_cycle: usize,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            csv_interval_secs: defaults::CSV_INTERVAL_SECS,
            log_interval_secs: defaults::LOG_INTERVAL_SECS,
            cycle_ceiling_secs: defaults::CYCLE_CEILING_SECS,
            max_lines_per_cycle: defaults::MAX_LINES_PER_CYCLE,
        }
    }
}

fn default_csv_interval() -> u64 {
    defaults::CSV_INTERVAL_SECS
}
fn default_log_interval() -> u64 {
    defaults::LOG_INTERVAL_SECS
}
fn default_cycle_ceiling() -> u64 {
    defaults::CYCLE_CEILING_SECS
}
fn default_max_lines_per_cycle() -> usize {
    defaults::MAX_LINES_PER_CYCLE
}

/// Timeouts, liveness and reconnect backoff for a transport session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_op_timeout")]
    pub op_timeout_secs: u64,
    #[serde(default = "default_heartbeat_stale")]
    pub heartbeat_stale_secs: u64,
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: u32,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_degraded_after")]
    pub degraded_after_failures: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: defaults::CONNECT_TIMEOUT_SECS,
            op_timeout_secs: defaults::OP_TIMEOUT_SECS,
            heartbeat_stale_secs: defaults::HEARTBEAT_STALE_SECS,
            max_consecutive_timeouts: defaults::MAX_CONSECUTIVE_TIMEOUTS,
            backoff_initial_secs: defaults::BACKOFF_INITIAL_SECS,
            backoff_max_secs: defaults::BACKOFF_MAX_SECS,
            degraded_after_failures: defaults::DEGRADED_AFTER_FAILURES,
        }
    }
}

fn default_connect_timeout() -> u64 {
    defaults::CONNECT_TIMEOUT_SECS
}
fn default_op_timeout() -> u64 {
    defaults::OP_TIMEOUT_SECS
}
fn default_heartbeat_stale() -> u64 {
    defaults::HEARTBEAT_STALE_SECS
}
fn default_max_consecutive_timeouts() -> u32 {
    defaults::MAX_CONSECUTIVE_TIMEOUTS
}
fn default_backoff_initial() -> u64 {
    defaults::BACKOFF_INITIAL_SECS
}
fn default_backoff_max() -> u64 {
    defaults::BACKOFF_MAX_SECS
}
fn default_degraded_after() -> u32 {
    defaults::DEGRADED_AFTER_FAILURES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_dir_cache_ttl")]
    pub dir_cache_ttl_secs: u64,
    #[serde(default = "default_csv_result_ttl")]
    pub csv_result_ttl_secs: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Subdirectories of the server root searched for kill CSVs
    #[serde(default = "default_csv_search_paths")]
    pub csv_search_paths: Vec<String>,
    #[serde(default = "default_log_filename")]
    pub log_filename: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            dir_cache_ttl_secs: defaults::DIR_CACHE_TTL_SECS,
            csv_result_ttl_secs: defaults::CSV_RESULT_TTL_SECS,
            max_depth: defaults::MAX_SEARCH_DEPTH,
            csv_search_paths: default_csv_search_paths(),
            log_filename: default_log_filename(),
        }
    }
}

fn default_dir_cache_ttl() -> u64 {
    defaults::DIR_CACHE_TTL_SECS
}
fn default_csv_result_ttl() -> u64 {
    defaults::CSV_RESULT_TTL_SECS
}
fn default_max_depth() -> usize {
    defaults::MAX_SEARCH_DEPTH
}
fn default_csv_search_paths() -> Vec<String> {
    defaults::CSV_SEARCH_PATHS.iter().map(|s| s.to_string()).collect()
}
fn default_log_filename() -> String {
    defaults::LOG_FILENAME.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderSettings {
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,
    #[serde(default = "default_block_bytes")]
    pub block_bytes: usize,
    #[serde(default = "default_count_chunk_bytes")]
    pub count_chunk_bytes: usize,
    #[serde(default = "default_count_byte_budget")]
    pub count_byte_budget: u64,
    #[serde(default = "default_fallback_line_estimate")]
    pub fallback_line_estimate: u64,
    #[serde(default = "default_remote_count_timeout")]
    pub remote_count_timeout_secs: u64,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            chunk_lines: defaults::CHUNK_LINES,
            chunk_timeout_secs: defaults::CHUNK_TIMEOUT_SECS,
            block_bytes: defaults::BLOCK_BYTES,
            count_chunk_bytes: defaults::COUNT_CHUNK_BYTES,
            count_byte_budget: defaults::COUNT_BYTE_BUDGET,
            fallback_line_estimate: defaults::FALLBACK_LINE_ESTIMATE,
            remote_count_timeout_secs: defaults::REMOTE_COUNT_TIMEOUT_SECS,
        }
    }
}

fn default_chunk_lines() -> usize {
    defaults::CHUNK_LINES
}
fn default_chunk_timeout() -> u64 {
    defaults::CHUNK_TIMEOUT_SECS
}
fn default_block_bytes() -> usize {
    defaults::BLOCK_BYTES
}
fn default_count_chunk_bytes() -> usize {
    defaults::COUNT_CHUNK_BYTES
}
fn default_count_byte_budget() -> u64 {
    defaults::COUNT_BYTE_BUDGET
}
fn default_fallback_line_estimate() -> u64 {
    defaults::FALLBACK_LINE_ESTIMATE
}
fn default_remote_count_timeout() -> u64 {
    defaults::REMOTE_COUNT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RivalrySettings {
    #[serde(default = "default_min_kills")]
    pub min_kills: u32,
    #[serde(default = "default_rivalry_interval")]
    pub interval_secs: u64,
}

impl Default for RivalrySettings {
    fn default() -> Self {
        Self {
            min_kills: defaults::RIVALRY_MIN_KILLS,
            interval_secs: defaults::RIVALRY_INTERVAL_SECS,
        }
    }
}

fn default_min_kills() -> u32 {
    defaults::RIVALRY_MIN_KILLS
}
fn default_rivalry_interval() -> u64 {
    defaults::RIVALRY_INTERVAL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkSettings {
    #[serde(default = "default_sink_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self { output_dir: default_sink_output_dir() }
    }
}

fn default_sink_output_dir() -> PathBuf {
    PathBuf::from(defaults::SINK_OUTPUT_DIR)
}

// ============================================================================
// Classification Tables
// ============================================================================

/// One row of the suicide classification table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuicideRule {
    pub category: SuicideCategory,
    /// Matched as substrings of the normalized weapon field
    pub keywords: Vec<String>,
}

pub fn default_suicide_categories() -> Vec<SuicideRule> {
    let rule = |category, keywords: &[&str]| SuicideRule {
        category,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    };
    vec![
        rule(SuicideCategory::Menu, &["relocation"]),
        rule(SuicideCategory::Fall, &["fall"]),
        rule(SuicideCategory::Vehicle, &["vehicle", "boat"]),
    ]
}

/// A named game-event pattern. Capture groups become the event details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameEventPattern {
    pub kind: String,
    pub pattern: String,
}

pub fn default_game_events() -> Vec<GameEventPattern> {
    [
        ("mission", r"Mission started: (.+)"),
        ("airdrop", r"Air drop inbound at location: (.+)"),
        ("helicrash", r"Helicopter crash site spawned at: (.+)"),
        ("trader", r"Trader spawned at: (.+)"),
        ("convoy", r"Convoy started route from (.+) to (.+)"),
        ("encounter", r"Special encounter triggered: (.+) at (.+)"),
    ]
    .iter()
    .map(|(kind, pattern)| GameEventPattern {
        kind: kind.to_string(),
        pattern: pattern.to_string(),
    })
    .collect()
}
