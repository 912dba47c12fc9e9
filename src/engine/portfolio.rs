//! Greedy top-k selection under pick, per-player and per-game caps.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::baseline::BaselineUsed;
use super::candidate::{rank_order, Candidate};
use super::odds::rounded;
use super::pricing::Tier;
use crate::feed::types::Side;

pub const EXECUTION_PLAN_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortfolioConstraints {
    pub max_picks: usize,
    /// 0 disables the cap.
    pub max_per_player: usize,
    /// 0 disables the cap.
    pub max_per_game: usize,
}

/// `min(configured, top_n)` when configured, else `top_n`.
pub fn resolve_max_picks(configured: usize, top_n: usize) -> usize {
    if top_n == 0 {
        0
    } else if configured == 0 {
        top_n
    } else {
        configured.min(top_n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortfolioReason {
    MaxPicksReached,
    PerPlayerCap,
    PerGameCap,
}

/// A candidate projected to the fields a bettor acts on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlanEntry {
    pub portfolio_rank: usize,
    pub portfolio_reason: Option<PortfolioReason>,
    pub event_id: String,
    pub market: String,
    pub player: String,
    #[serde(serialize_with = "rounded::value")]
    pub point: f64,
    pub side: Side,
    pub tier: Tier,
    pub book: Option<String>,
    pub price: Option<i32>,
    pub link: Option<String>,
    pub baseline_used: BaselineUsed,
    #[serde(serialize_with = "rounded::option")]
    pub model_p_hit: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub p_hit_low: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub p_hit_calibrated: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub best_ev: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub ev_low: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub best_kelly: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub quarter_kelly: Option<f64>,
    pub play_to_american: Option<i32>,
    #[serde(serialize_with = "rounded::value")]
    pub score: f64,
}

impl ExecutionPlanEntry {
    fn from_candidate(c: &Candidate, rank: usize, reason: Option<PortfolioReason>) -> Self {
        Self {
            portfolio_rank: rank,
            portfolio_reason: reason,
            event_id: c.event_id.clone(),
            market: c.market.clone(),
            player: c.player.clone(),
            point: c.point,
            side: c.side,
            tier: c.tier,
            book: c.selected.as_ref().map(|q| q.book.clone()),
            price: c.selected_price(),
            link: c.selected.as_ref().map(|q| q.link.clone()),
            baseline_used: c.baseline_used,
            model_p_hit: c.model_p_hit,
            p_hit_low: c.p_hit_low,
            p_hit_calibrated: c.p_hit_calibrated,
            best_ev: c.best_ev,
            ev_low: c.ev_low,
            best_kelly: c.best_kelly,
            quarter_kelly: c.quarter_kelly,
            play_to_american: c.play_to_american,
            score: c.score,
        }
    }

    fn player_key(&self) -> String {
        self.player.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    pub eligible: usize,
    pub selected: usize,
    pub excluded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub schema_version: u32,
    pub snapshot_id: String,
    pub generated_at_utc: DateTime<Utc>,
    pub constraints: PortfolioConstraints,
    pub counts: PlanCounts,
    pub selected: Vec<ExecutionPlanEntry>,
    pub excluded: Vec<ExecutionPlanEntry>,
    pub exclusion_counts: BTreeMap<PortfolioReason, usize>,
}

/// Running pick counters, one pass over the ranked list.
struct PortfolioSelector {
    constraints: PortfolioConstraints,
    picked: usize,
    per_player: BTreeMap<String, usize>,
    per_game: BTreeMap<String, usize>,
}

impl PortfolioSelector {
    fn new(constraints: PortfolioConstraints) -> Self {
        Self {
            constraints,
            picked: 0,
            per_player: BTreeMap::new(),
            per_game: BTreeMap::new(),
        }
    }

    /// Why the candidate cannot be taken, or `None` if it can.
    fn blocked_by(&self, player: &str, game: &str) -> Option<PortfolioReason> {
        let c = &self.constraints;
        if self.picked >= c.max_picks {
            return Some(PortfolioReason::MaxPicksReached);
        }
        let player_count = self.per_player.get(player).copied().unwrap_or(0);
        if c.max_per_player > 0 && player_count >= c.max_per_player {
            return Some(PortfolioReason::PerPlayerCap);
        }
        let game_count = self.per_game.get(game).copied().unwrap_or(0);
        if c.max_per_game > 0 && game_count >= c.max_per_game {
            return Some(PortfolioReason::PerGameCap);
        }
        None
    }

    fn record_pick(&mut self, player: String, game: String) {
        self.picked += 1;
        *self.per_player.entry(player).or_insert(0) += 1;
        *self.per_game.entry(game).or_insert(0) += 1;
    }
}

impl ExecutionPlan {
    /// Select from `candidates`; ineligible rows are ignored.
    pub fn build(
        snapshot_id: &str,
        generated_at_utc: DateTime<Utc>,
        constraints: PortfolioConstraints,
        candidates: &[Candidate],
    ) -> Self {
        let mut ranked: Vec<&Candidate> = candidates.iter().filter(|c| c.eligible).collect();
        ranked.sort_by(|a, b| rank_order(a, b));

        let mut selector = PortfolioSelector::new(constraints);
        let mut selected = Vec::new();
        let mut excluded = Vec::new();
        let mut exclusion_counts = BTreeMap::new();

        for candidate in &ranked {
            let player = candidate.player.trim().to_lowercase();
            let game = candidate.event_id.clone();
            let rank = selector.picked + 1;
            match selector.blocked_by(&player, &game) {
                None => {
                    selector.record_pick(player, game);
                    selected.push(ExecutionPlanEntry::from_candidate(candidate, rank, None));
                }
                Some(reason) => {
                    *exclusion_counts.entry(reason).or_insert(0) += 1;
                    let entry = ExecutionPlanEntry::from_candidate(candidate, rank, Some(reason));
                    excluded.push(entry);
                }
            }
        }

        tracing::debug!(
            eligible = ranked.len(),
            selected = selected.len(),
            excluded = excluded.len(),
            "portfolio selected"
        );

        Self {
            schema_version: EXECUTION_PLAN_SCHEMA_VERSION,
            snapshot_id: snapshot_id.to_string(),
            generated_at_utc,
            constraints,
            counts: PlanCounts {
                eligible: ranked.len(),
                selected: selected.len(),
                excluded: excluded.len(),
            },
            selected,
            excluded,
            exclusion_counts,
        }
    }

    /// Contract violations, sorted and de-duplicated. Empty means valid.
    pub fn validate(&self) -> Vec<&'static str> {
        let mut violations = BTreeSet::new();
        let c = &self.constraints;

        if self.schema_version != EXECUTION_PLAN_SCHEMA_VERSION {
            violations.insert("schema_version_mismatch");
        }
        if self.counts.selected != self.selected.len() {
            violations.insert("selected_count_mismatch");
        }
        if self.counts.excluded != self.excluded.len() {
            violations.insert("excluded_count_mismatch");
        }
        if self.counts.eligible != self.selected.len() + self.excluded.len() {
            violations.insert("eligible_count_mismatch");
        }
        if self.exclusion_counts.values().sum::<usize>() != self.excluded.len() {
            violations.insert("exclusion_counts_mismatch");
        }
        if self.selected.len() > c.max_picks {
            violations.insert("max_picks_exceeded");
        }

        let mut ranks = BTreeSet::new();
        for (i, entry) in self.selected.iter().enumerate() {
            if !ranks.insert(entry.portfolio_rank) {
                violations.insert("duplicate_selected_rank");
            }
            if entry.portfolio_rank != i + 1 {
                violations.insert("selected_rank_gap");
            }
            if entry.portfolio_reason.is_some() {
                violations.insert("selected_row_has_reason");
            }
        }
        for entry in &self.excluded {
            if entry.portfolio_reason.is_none() {
                violations.insert("excluded_row_missing_reason");
            }
            if entry.portfolio_rank == 0 || entry.portfolio_rank > self.selected.len() + 1 {
                violations.insert("excluded_rank_out_of_range");
            }
        }

        let mut per_player: BTreeMap<String, usize> = BTreeMap::new();
        let mut per_game: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in &self.selected {
            *per_player.entry(entry.player_key()).or_insert(0) += 1;
            *per_game.entry(entry.event_id.as_str()).or_insert(0) += 1;
        }
        if c.max_per_player > 0 && per_player.values().any(|&n| n > c.max_per_player) {
            violations.insert("per_player_cap_exceeded");
        }
        if c.max_per_game > 0 && per_game.values().any(|&n| n > c.max_per_game) {
            violations.insert("per_game_cap_exceeded");
        }

        violations.into_iter().collect()
    }
}
