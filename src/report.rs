//! Report assembly: health summary, odds freshness, input contracts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::engine::candidate::Candidate;
use crate::engine::gates::HealthGate;
use crate::engine::odds::rounded;
use crate::engine::portfolio::ExecutionPlan;
use crate::engine::pricing::{age_minutes, RowContract};
use crate::feed::types::Snapshot;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    FullBoard,
    WatchlistOnly,
}

impl StrategyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyMode::FullBoard => "full_board",
            StrategyMode::WatchlistOnly => "watchlist_only",
        }
    }
}

/// Freshness of the quotes candidates would actually be bet at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsHealth {
    pub selected_quotes: usize,
    pub missing_timestamps: usize,
    pub latest_quote_utc: Option<DateTime<Utc>>,
    pub oldest_quote_utc: Option<DateTime<Utc>>,
    #[serde(serialize_with = "rounded::option")]
    pub latest_age_minutes: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub oldest_age_minutes: Option<f64>,
    pub stale_after_minutes: u32,
    pub stale: bool,
}

impl OddsHealth {
    /// Stale when no selected quote carries a timestamp or the newest one is
    /// older than `stale_after_minutes`.
    pub fn from_candidates(
        candidates: &[Candidate],
        now: DateTime<Utc>,
        stale_after_minutes: u32,
    ) -> Self {
        let selected: Vec<Option<DateTime<Utc>>> = candidates
            .iter()
            .filter_map(|c| c.selected.as_ref())
            .map(|q| q.last_update)
            .collect();
        let stamps: Vec<DateTime<Utc>> = selected.iter().flatten().copied().collect();
        let latest = stamps.iter().max().copied();
        let oldest = stamps.iter().min().copied();
        let latest_age_minutes = latest.map(|ts| age_minutes(now, ts));
        let stale = latest_age_minutes.map_or(true, |age| age > f64::from(stale_after_minutes));

        Self {
            selected_quotes: selected.len(),
            missing_timestamps: selected.len() - stamps.len(),
            latest_quote_utc: latest,
            oldest_quote_utc: oldest,
            latest_age_minutes,
            oldest_age_minutes: oldest.map(|ts| age_minutes(now, ts)),
            stale_after_minutes,
            stale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractsReport {
    pub quotes: RowContract,
    /// Rows without a usable identity or point.
    pub ungrouped_rows: usize,
    pub missing_event_ids: Vec<String>,
    pub plan_violations: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedsReport {
    pub official_injuries_ready: bool,
    pub injuries_stale: bool,
    pub roster_stale: bool,
    pub events: usize,
    pub players: usize,
    pub malformed_quote_lines: usize,
    pub minutes_forecasts: usize,
    pub priors_rows_used: u64,
    pub priors_as_of_day: Option<String>,
    pub calibration_loaded: bool,
}

impl FeedsReport {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            official_injuries_ready: snapshot.health.official_injuries_ready,
            injuries_stale: snapshot.health.injuries_stale,
            roster_stale: snapshot.health.roster_stale,
            events: snapshot.events.len(),
            players: snapshot.players.len(),
            malformed_quote_lines: snapshot.malformed_quote_lines,
            minutes_forecasts: snapshot.minutes.len(),
            priors_rows_used: snapshot.priors.rows_used,
            priors_as_of_day: snapshot.priors.as_of_day.clone(),
            calibration_loaded: !snapshot.calibration.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub health_gates: Vec<HealthGate>,
    pub odds: OddsHealth,
    pub contracts: ContractsReport,
    pub feeds: FeedsReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyReport {
    pub schema_version: u32,
    pub snapshot_id: String,
    pub generated_at_utc: DateTime<Utc>,
    pub strategy_mode: StrategyMode,
    pub health_report: HealthReport,
    /// Candidates per gate reason; eligible rows count under `eligible`.
    pub gate_counts: BTreeMap<String, usize>,
    pub candidates: Vec<Candidate>,
    pub ranked_plays: Vec<Candidate>,
    pub watchlist: Vec<Candidate>,
    pub execution_plan: ExecutionPlan,
}

impl StrategyReport {
    pub fn new(
        snapshot: &Snapshot,
        strategy_mode: StrategyMode,
        health_report: HealthReport,
        candidates: Vec<Candidate>,
        ranked_plays: Vec<Candidate>,
        watchlist: Vec<Candidate>,
        execution_plan: ExecutionPlan,
    ) -> Self {
        let mut gate_counts = BTreeMap::new();
        for candidate in &candidates {
            let key = candidate
                .reason
                .as_ref()
                .map_or_else(|| "eligible".to_string(), ToString::to_string);
            *gate_counts.entry(key).or_insert(0) += 1;
        }
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            snapshot_id: snapshot.snapshot_id.clone(),
            generated_at_utc: snapshot.now_utc,
            strategy_mode,
            health_report,
            gate_counts,
            candidates,
            ranked_plays,
            watchlist,
            execution_plan,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
