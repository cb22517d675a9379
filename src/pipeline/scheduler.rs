//! Periodic drivers: one harvest task per server, one rivalry task overall.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{HarvestSettings, RivalrySettings};
use crate::rivalry::compute_rivalries;
use crate::storage::{StorageError, TallyStore};
use crate::types::{FileKind, RivalryResult};

use super::cycle::{CycleError, CycleReport, ServerHarvester};

/// Per-task counters, returned when the task stops.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HarvestSummary {
    pub server_id: String,
    pub cycles: u64,
    pub failures: u64,
    pub ceiling_hits: u64,
    pub skipped_degraded: u64,
    pub lines: u64,
    pub events: u64,
}

fn ticker(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Run one cycle under the ceiling. A cycle that overruns is dropped and
/// its connection torn down; the cursor is untouched because it is only
/// written at the end of a cycle.
pub async fn run_bounded_cycle(
    harvester: &mut ServerHarvester,
    kind: FileKind,
    ceiling: Duration,
) -> Option<Result<CycleReport, CycleError>> {
    match tokio::time::timeout(ceiling, harvester.run_cycle(kind)).await {
        Ok(result) => Some(result),
        Err(_) => {
            harvester.abort_cycle("cycle ceiling exceeded").await;
            None
        }
    }
}

async fn tick(harvester: &mut ServerHarvester, kind: FileKind, ceiling: Duration, summary: &mut HarvestSummary) {
    let server_id = harvester.server_id().to_string();
    if let Some(wait) = harvester.session().backoff_remaining() {
        if harvester.session().is_degraded() {
            summary.skipped_degraded += 1;
            debug!("[Harvest:{}] Degraded, {} tick skipped ({}s until retry)", server_id, kind, wait.as_secs());
            return;
        }
    }

    summary.cycles += 1;
    match run_bounded_cycle(harvester, kind, ceiling).await {
        Some(Ok(report)) => {
            summary.lines += report.lines_read as u64;
            summary.events += report.events as u64;
        }
        Some(Err(e)) => {
            summary.failures += 1;
            if e.is_backoff() {
                debug!("[Harvest:{}] {} cycle waiting: {}", server_id, kind, e);
            }
        }
        None => {
            summary.failures += 1;
            summary.ceiling_hits += 1;
            warn!("[Harvest:{}] {} cycle exceeded {}s ceiling", server_id, kind, ceiling.as_secs());
        }
    }
}

/// Drive both streams of one server until cancelled.
pub async fn run_server(
    mut harvester: ServerHarvester,
    settings: HarvestSettings,
    cancel: CancellationToken,
) -> HarvestSummary {
    let mut summary = HarvestSummary {
        server_id: harvester.server_id().to_string(),
        ..HarvestSummary::default()
    };
    let ceiling = Duration::from_secs(settings.cycle_ceiling_secs.max(1));
    let mut csv_ticks = ticker(settings.csv_interval_secs);
    let mut log_ticks = ticker(settings.log_interval_secs);

    info!(
        "[Harvest:{}] Task starting (csv every {}s, log every {}s)",
        summary.server_id, settings.csv_interval_secs, settings.log_interval_secs
    );

    loop {
        let kind = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = csv_ticks.tick() => FileKind::Csv,
            _ = log_ticks.tick() => FileKind::Log,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick(&mut harvester, kind, ceiling, &mut summary) => {}
        }
    }

    harvester.session_mut().disconnect().await;
    info!(
        "[Harvest:{}] Stopped after {} cycles ({} failed, {} lines)",
        summary.server_id, summary.cycles, summary.failures, summary.lines
    );
    summary
}

/// Recompute and store rivalries for one server.
pub fn recompute_rivalries(
    tallies: &dyn TallyStore,
    server_id: &str,
    min_kills: u32,
) -> Result<Vec<RivalryResult>, StorageError> {
    let loaded = tallies.load_tallies(server_id)?;
    let results = compute_rivalries(&loaded, min_kills, Utc::now());
    tallies.store_rivalries(server_id, &results)?;
    Ok(results)
}

/// Periodically recompute rivalries for every server until cancelled.
pub async fn run_rivalries(
    tallies: Arc<dyn TallyStore>,
    server_ids: Vec<String>,
    settings: RivalrySettings,
    cancel: CancellationToken,
) -> u64 {
    let mut interval = ticker(settings.interval_secs);
    let mut runs = 0u64;
    info!("[Rivalry] Task starting with interval {}s", settings.interval_secs);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[Rivalry] Received shutdown signal after {} runs", runs);
                return runs;
            }
            _ = interval.tick() => {
                for server_id in &server_ids {
                    match recompute_rivalries(tallies.as_ref(), server_id, settings.min_kills) {
                        Ok(results) => {
                            let with_rival = results
                                .iter()
                                .filter(|r| r.prey.is_some() || r.nemesis.is_some())
                                .count();
                            debug!("[Rivalry] {}: {} players, {} with a rival", server_id, results.len(), with_rival);
                        }
                        Err(e) => warn!("[Rivalry] {}: recompute failed: {}", server_id, e),
                    }
                }
                runs += 1;
            }
        }
    }
}
