//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! The raw TOML is first parsed into a `toml::Value` and its key tree is
//! compared against the known field names. Unknown keys produce warnings
//! with a "did you mean" hint; they never reject the file. Structural
//! checks live in `HarvestConfig::validate`.

use std::collections::HashSet;

/// A non-fatal config warning (typo, unknown section).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path in `harvester.toml`.
///
/// Array-of-table entries (`[[servers]]`, `[[game_events]]`, ...) share one
/// path without an index. Keep in sync with `harvest_config.rs`.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        "harvest",
        "harvest.csv_interval_secs",
        "harvest.log_interval_secs",
        "harvest.cycle_ceiling_secs",
        "harvest.max_lines_per_cycle",
        "transport",
        "transport.connect_timeout_secs",
        "transport.op_timeout_secs",
        "transport.heartbeat_stale_secs",
        "transport.max_consecutive_timeouts",
        "transport.backoff_initial_secs",
        "transport.backoff_max_secs",
        "transport.degraded_after_failures",
        "discovery",
        "discovery.dir_cache_ttl_secs",
        "discovery.csv_result_ttl_secs",
        "discovery.max_depth",
        "discovery.csv_search_paths",
        "discovery.log_filename",
        "reader",
        "reader.chunk_lines",
        "reader.chunk_timeout_secs",
        "reader.block_bytes",
        "reader.count_chunk_bytes",
        "reader.count_byte_budget",
        "reader.fallback_line_estimate",
        "reader.remote_count_timeout_secs",
        "rivalry",
        "rivalry.min_kills",
        "rivalry.interval_secs",
        "storage",
        "storage.data_dir",
        "sink",
        "sink.output_dir",
        "suicide_categories",
        "suicide_categories.category",
        "suicide_categories.keywords",
        "game_events",
        "game_events.kind",
        "game_events.pattern",
        "servers",
        "servers.server_id",
        "servers.host",
        "servers.port",
        "servers.username",
        "servers.base_path_hint",
        "servers.backend",
        "servers.credentials",
        "servers.credentials.type",
        "servers.credentials.password",
        "servers.credentials.path",
        "servers.credentials.passphrase",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively collects dotted key paths from a `toml::Value` tree.
///
/// Tables inside arrays are walked with the array's own path, so
/// `[[servers]] host = "a"` yields `servers` and `servers.host`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let Some(table) = value.as_table() else {
        return keys;
    };
    for (k, v) in table {
        let path = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        keys.push(path.clone());
        match v {
            toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
            toml::Value::Array(items) => {
                for item in items.iter().filter(|i| i.is_table()) {
                    for nested in walk_toml_keys(item, &path) {
                        if !keys.contains(&nested) {
                            keys.push(nested);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known key within edit distance 3. Ties resolve alphabetically.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), *k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Warnings for every unknown key in a raw TOML document.
///
/// Syntax errors return no warnings; serde reports those afterwards.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}
