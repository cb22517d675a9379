//! Harvester Configuration Module
//!
//! Operator-tunable settings loaded from TOML: poll intervals, transport
//! timeouts, discovery bounds, reader chunking, classification tables and
//! the list of servers to harvest.
//!
//! ## Loading Order
//!
//! 1. `HARVESTER_CONFIG` environment variable (path to TOML file)
//! 2. `harvester.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! The binary calls `config::init()` once at startup. Library components take
//! their settings sections explicitly so tests never touch the global.
//!
//! ```ignore
//! config::init(HarvestConfig::load());
//! let ttl = config::get().discovery.dir_cache_ttl_secs;
//! ```

mod harvest_config;
pub mod defaults;
pub mod validation;

pub use harvest_config::*;

use std::sync::OnceLock;

/// Global harvester configuration, initialized once at startup.
static HARVEST_CONFIG: OnceLock<HarvestConfig> = OnceLock::new();

/// Initialize the global configuration. Later calls are ignored.
pub fn init(config: HarvestConfig) {
    if HARVEST_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get the global configuration, or `None` before `init()`.
pub fn try_get() -> Option<&'static HarvestConfig> {
    HARVEST_CONFIG.get()
}

/// Get the global configuration.
///
/// Falls back to a lazily built default when `init()` was never called, so
/// library consumers that skip initialization still get sane values.
pub fn get() -> &'static HarvestConfig {
    static FALLBACK: OnceLock<HarvestConfig> = OnceLock::new();
    HARVEST_CONFIG
        .get()
        .unwrap_or_else(|| FALLBACK.get_or_init(HarvestConfig::default))
}

pub fn is_initialized() -> bool {
    HARVEST_CONFIG.get().is_some()
}
