//! Eligibility gate chain.
//!
//! Hard gates all run and the last failure is recorded. Soft gates run only
//! while the candidate is still eligible and stop at the first failure.
//! Event mapping and snapshot health are terminal passes over the finished
//! candidate list.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use super::candidate::Candidate;
use super::pricing::Tier;
use crate::config::{Config, ProbabilisticProfile};
use crate::feed::types::{EventContext, SourceHealth};

pub const TIER_A_MIN_EV: f64 = 0.03;
pub const TIER_B_MIN_EV: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthGate {
    OfficialInjuryMissing,
    OddsSnapshotStale,
    InjuriesContextStale,
    RosterContextStale,
}

impl HealthGate {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthGate::OfficialInjuryMissing => "official_injury_missing",
            HealthGate::OddsSnapshotStale => "odds_snapshot_stale",
            HealthGate::InjuriesContextStale => "injuries_context_stale",
            HealthGate::RosterContextStale => "roster_context_stale",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateReason {
    TierBBlocked,
    RosterGate,
    InjuryGate,
    BaselineMissing,
    BaselineInsufficientCoverageAfterExclusion,
    TierBBaselineNotIndependent,
    BookPairsGate,
    HoldCap,
    HoldMissing,
    DispersionIqr,
    DispersionMissing,
    QualityScoreGate,
    UncertaintyBandGate,
    EvBelowThreshold,
    EvLowMissing,
    EvLowBelowThreshold,
    ProbConfidenceGate,
    ProbConfidenceMissing,
    MinutesBandGate,
    MinutesBandMissing,
    EventMappingMissing,
    HealthGate(Vec<HealthGate>),
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            GateReason::TierBBlocked => "tier_b_blocked",
            GateReason::RosterGate => "roster_gate",
            GateReason::InjuryGate => "injury_gate",
            GateReason::BaselineMissing => "baseline_missing",
            GateReason::BaselineInsufficientCoverageAfterExclusion => {
                "baseline_insufficient_coverage_after_exclusion"
            }
            GateReason::TierBBaselineNotIndependent => "tier_b_baseline_not_independent",
            GateReason::BookPairsGate => "book_pairs_gate",
            GateReason::HoldCap => "hold_cap",
            GateReason::HoldMissing => "hold_missing",
            GateReason::DispersionIqr => "dispersion_iqr",
            GateReason::DispersionMissing => "dispersion_missing",
            GateReason::QualityScoreGate => "quality_score_gate",
            GateReason::UncertaintyBandGate => "uncertainty_band_gate",
            GateReason::EvBelowThreshold => "ev_below_threshold",
            GateReason::EvLowMissing => "ev_low_missing",
            GateReason::EvLowBelowThreshold => "ev_low_below_threshold",
            GateReason::ProbConfidenceGate => "prob_confidence_gate",
            GateReason::ProbConfidenceMissing => "prob_confidence_missing",
            GateReason::MinutesBandGate => "minutes_band_gate",
            GateReason::MinutesBandMissing => "minutes_band_missing",
            GateReason::EventMappingMissing => "event_mapping_missing",
            GateReason::HealthGate(gates) => {
                let names: Vec<&str> = gates.iter().map(|g| g.as_str()).collect();
                return write!(f, "health_gate:{}", names.join(","));
            }
        };
        f.write_str(code)
    }
}

impl Serialize for GateReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Continue,
    Fail(GateReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateVerdict {
    pub eligible: bool,
    pub reason: Option<GateReason>,
}

/// EV a line has to clear for its tier.
pub fn ev_threshold(tier: Tier, min_ev: f64) -> f64 {
    match tier {
        Tier::A => min_ev.max(TIER_A_MIN_EV),
        Tier::B => min_ev.max(TIER_B_MIN_EV),
    }
}

fn check(failed: bool, reason: GateReason) -> GateOutcome {
    if failed {
        GateOutcome::Fail(reason)
    } else {
        GateOutcome::Continue
    }
}

/// Cap check where a missing measurement is its own failure.
fn cap(
    value: Option<f64>,
    limit: Option<f64>,
    over: GateReason,
    missing: GateReason,
) -> GateOutcome {
    match (limit, value) {
        (None, _) => GateOutcome::Continue,
        (Some(_), None) => GateOutcome::Fail(missing),
        (Some(limit), Some(value)) => check(value > limit, over),
    }
}

fn floor(
    value: Option<f64>,
    limit: Option<f64>,
    under: GateReason,
    missing: GateReason,
) -> GateOutcome {
    match (limit, value) {
        (None, _) => GateOutcome::Continue,
        (Some(_), None) => GateOutcome::Fail(missing),
        (Some(limit), Some(value)) => check(value < limit, under),
    }
}

fn hard_gates(c: &Candidate, config: &Config) -> Vec<GateOutcome> {
    let strategy = &config.strategy;
    let roster_blocked = c.roster_status.is_excluded()
        || (c.roster_status.is_unknown() && !strategy.allow_unknown_roster);
    vec![
        check(c.tier == Tier::B && !strategy.allow_tier_b, GateReason::TierBBlocked),
        check(roster_blocked, GateReason::RosterGate),
        check(c.injury_status.is_ruled_out(), GateReason::InjuryGate),
    ]
}

fn baseline_gate(c: &Candidate, _: &Config) -> GateOutcome {
    if c.p_over_fair.is_some() && c.p_under_fair.is_some() {
        GateOutcome::Continue
    } else if !c.baseline_excluded_books.is_empty() {
        GateOutcome::Fail(GateReason::BaselineInsufficientCoverageAfterExclusion)
    } else {
        GateOutcome::Fail(GateReason::BaselineMissing)
    }
}

fn tier_b_independence_gate(c: &Candidate, config: &Config) -> GateOutcome {
    match (c.tier, config.baseline.tier_b_min_other_books) {
        (Tier::B, Some(minimum)) => check(
            c.baseline_books_used.len() < minimum,
            GateReason::TierBBaselineNotIndependent,
        ),
        _ => GateOutcome::Continue,
    }
}

fn book_pairs_gate(c: &Candidate, config: &Config) -> GateOutcome {
    let minimum = config.gates.min_book_pairs;
    check(
        minimum > 0 && c.quality.book_pair_count < minimum,
        GateReason::BookPairsGate,
    )
}

fn hold_gate(c: &Candidate, config: &Config) -> GateOutcome {
    cap(
        c.quality.hold_book_median,
        config.gates.hold_cap,
        GateReason::HoldCap,
        GateReason::HoldMissing,
    )
}

fn dispersion_gate(c: &Candidate, config: &Config) -> GateOutcome {
    cap(
        c.quality.p_over_book_iqr,
        config.gates.p_over_iqr_cap,
        GateReason::DispersionIqr,
        GateReason::DispersionMissing,
    )
}

fn quality_gate(c: &Candidate, config: &Config) -> GateOutcome {
    match config.gates.min_quality_score {
        Some(minimum) => check(c.quality.quality_score < minimum, GateReason::QualityScoreGate),
        None => GateOutcome::Continue,
    }
}

fn uncertainty_gate(c: &Candidate, config: &Config) -> GateOutcome {
    match config.gates.max_uncertainty_band {
        Some(maximum) => check(
            c.quality.uncertainty_band > maximum,
            GateReason::UncertaintyBandGate,
        ),
        None => GateOutcome::Continue,
    }
}

fn ev_gate(c: &Candidate, config: &Config) -> GateOutcome {
    let threshold = ev_threshold(c.tier, config.strategy.min_ev);
    check(
        c.best_ev.map_or(true, |ev| ev < threshold),
        GateReason::EvBelowThreshold,
    )
}

fn ev_low_gate(c: &Candidate, config: &Config) -> GateOutcome {
    floor(
        c.ev_low,
        config.gates.min_ev_low,
        GateReason::EvLowBelowThreshold,
        GateReason::EvLowMissing,
    )
}

fn probabilistic(config: &Config) -> bool {
    config.strategy.probabilistic_profile == ProbabilisticProfile::MinutesV1
}

fn prob_confidence_gate(c: &Candidate, config: &Config) -> GateOutcome {
    if !probabilistic(config) {
        return GateOutcome::Continue;
    }
    floor(
        c.confidence_score,
        config.gates.min_prob_confidence,
        GateReason::ProbConfidenceGate,
        GateReason::ProbConfidenceMissing,
    )
}

fn minutes_band_gate(c: &Candidate, config: &Config) -> GateOutcome {
    if !probabilistic(config) {
        return GateOutcome::Continue;
    }
    cap(
        c.minutes_band,
        config.gates.max_minutes_band,
        GateReason::MinutesBandGate,
        GateReason::MinutesBandMissing,
    )
}

type SoftGate = fn(&Candidate, &Config) -> GateOutcome;

const SOFT_GATES: [SoftGate; 11] = [
    baseline_gate,
    tier_b_independence_gate,
    book_pairs_gate,
    hold_gate,
    dispersion_gate,
    quality_gate,
    uncertainty_gate,
    ev_gate,
    ev_low_gate,
    prob_confidence_gate,
    minutes_band_gate,
];

/// Run the per-candidate chain.
pub fn evaluate(candidate: &Candidate, config: &Config) -> GateVerdict {
    let mut verdict = GateVerdict {
        eligible: true,
        reason: None,
    };
    for outcome in hard_gates(candidate, config) {
        if let GateOutcome::Fail(reason) = outcome {
            verdict.eligible = false;
            verdict.reason = Some(reason);
        }
    }
    if !verdict.eligible {
        return verdict;
    }
    for gate in SOFT_GATES {
        if let GateOutcome::Fail(reason) = gate(candidate, config) {
            verdict.eligible = false;
            verdict.reason = Some(reason);
            break;
        }
    }
    verdict
}

/// Mark every candidate whose event has no team context.
pub fn apply_event_mapping(
    candidates: Vec<Candidate>,
    events: &BTreeMap<String, EventContext>,
) -> Vec<Candidate> {
    candidates
        .into_iter()
        .map(|mut c| {
            let mapped = events.get(&c.event_id).is_some_and(EventContext::has_teams);
            if !mapped {
                c.mark_ineligible(GateReason::EventMappingMissing);
            }
            c
        })
        .collect()
}

/// Snapshot-wide health gates, in reporting order.
pub fn collect_health_gates(
    config: &Config,
    health: &SourceHealth,
    odds_stale: bool,
) -> Vec<HealthGate> {
    let strategy = &config.strategy;
    let mut gates = Vec::new();
    if strategy.require_official_injuries && !health.official_injuries_ready {
        gates.push(HealthGate::OfficialInjuryMissing);
    }
    if odds_stale {
        gates.push(HealthGate::OddsSnapshotStale);
    }
    if strategy.require_fresh_context && health.injuries_stale {
        gates.push(HealthGate::InjuriesContextStale);
    }
    if strategy.require_fresh_context && health.roster_stale {
        gates.push(HealthGate::RosterContextStale);
    }
    gates
}

/// Force every still-eligible candidate onto the watchlist when any health
/// gate is active.
pub fn apply_health_gates(candidates: Vec<Candidate>, gates: &[HealthGate]) -> Vec<Candidate> {
    if gates.is_empty() {
        return candidates;
    }
    candidates
        .into_iter()
        .map(|mut c| {
            if c.eligible {
                c.mark_ineligible(GateReason::HealthGate(gates.to_vec()));
            }
            c
        })
        .collect()
}
