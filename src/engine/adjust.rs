//! Contextual probability adjustment for the OVER side.
//!
//! Two layers, applied in order: a base delta from injury/roster/teammate/
//! opponent/spread context plus a deterministic minutes-usage projection,
//! clamped to ±0.5; then, when the `minutes_v1` profile is on and a forecast
//! exists, a minutes-forecast delta. One final clamp to [0.01, 0.99].

use serde::Serialize;

use super::odds::clamp_probability;
use crate::config::ProbabilisticProfile;
use crate::feed::types::{InjuryStatus, MinutesForecast, RosterStatus, StatusCounts};

pub const MAX_BASE_DELTA: f64 = 0.5;
pub const MAX_MARKET_DELTA: f64 = 0.12;
pub const MAX_MINUTES_DELTA: f64 = 0.08;
/// Delta that all but zeroes a ruled-out player's over.
const RULED_OUT_DELTA: f64 = -0.49;
const BLOWOUT_SPREAD: f64 = 8.0;
const HEAVY_BLOWOUT_SPREAD: f64 = 12.0;

#[derive(Debug, Clone, Default)]
pub struct AdjustmentContext {
    pub injury_status: InjuryStatus,
    pub roster_status: RosterStatus,
    pub teammates: StatusCounts,
    pub opponents: StatusCounts,
    pub spread_abs: Option<f64>,
    pub forecast: Option<MinutesForecast>,
}

/// Per-market sensitivities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketWeights {
    pub baseline_minutes: f64,
    pub minutes: f64,
    pub usage: f64,
    pub opponent: f64,
}

pub fn market_weights(market: &str) -> MarketWeights {
    let (baseline_minutes, minutes, usage, opponent) = match market {
        "player_points" => (31.0, 0.008, 0.65, 0.006),
        "player_rebounds" => (30.0, 0.007, 0.35, 0.004),
        "player_assists" => (31.0, 0.008, 0.45, 0.004),
        "player_threes" => (30.0, 0.006, 0.5, 0.003),
        "player_points_rebounds_assists" => (32.0, 0.009, 0.75, 0.007),
        "player_points_rebounds" | "player_points_assists" => (30.0, 0.008, 0.4, 0.003),
        "player_rebounds_assists" => (30.0, 0.007, 0.4, 0.003),
        "player_turnovers" => (30.0, 0.005, 0.4, -0.005),
        "player_blocks" | "player_steals" | "player_blocks_steals" => (30.0, 0.004, 0.2, -0.003),
        _ => (30.0, 0.007, 0.4, 0.003),
    };
    MarketWeights {
        baseline_minutes,
        minutes,
        usage,
        opponent,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MinutesProjection {
    pub baseline_minutes: f64,
    pub projected_minutes: f64,
    pub usage_delta: f64,
}

impl MinutesProjection {
    pub fn minutes_delta(&self) -> f64 {
        self.projected_minutes - self.baseline_minutes
    }
}

/// Rule-based minutes and usage projection from context alone.
pub fn project_minutes(market: &str, ctx: &AdjustmentContext) -> MinutesProjection {
    let baseline = market_weights(market).baseline_minutes;
    let teammate_out = f64::from(ctx.teammates.ruled_out());
    let teammate_doubtful = f64::from(ctx.teammates.doubtful);

    let mut projected = baseline + (teammate_out * 1.1 + teammate_doubtful * 0.5).min(4.0);
    projected -= match ctx.injury_status {
        InjuryStatus::Doubtful => 6.0,
        InjuryStatus::Questionable => 3.0,
        InjuryStatus::DayToDay => 2.0,
        InjuryStatus::Probable => 0.5,
        _ => 0.0,
    };
    if ctx.roster_status.is_unknown() {
        projected -= 1.5;
    }
    projected -= blowout_steps(ctx.spread_abs) as f64;
    let projected = projected.clamp(10.0, 40.0);

    let mut usage_delta = (teammate_out * 0.012 + teammate_doubtful * 0.006).clamp(-0.08, 0.09);
    if matches!(
        ctx.injury_status,
        InjuryStatus::Questionable | InjuryStatus::Doubtful
    ) {
        usage_delta -= 0.01;
    }

    MinutesProjection {
        baseline_minutes: baseline,
        projected_minutes: projected,
        usage_delta,
    }
}

/// 0, 1 or 2 depending on how lopsided the spread is.
fn blowout_steps(spread_abs: Option<f64>) -> u8 {
    match spread_abs {
        Some(s) if s >= HEAVY_BLOWOUT_SPREAD => 2,
        Some(s) if s >= BLOWOUT_SPREAD => 1,
        _ => 0,
    }
}

/// Injury severity, teammate/opponent absences and blowout risk.
pub fn context_delta(ctx: &AdjustmentContext) -> f64 {
    if ctx.roster_status.is_excluded() || ctx.injury_status.is_ruled_out() {
        return RULED_OUT_DELTA;
    }
    let injury = match ctx.injury_status {
        InjuryStatus::Doubtful => -0.12,
        InjuryStatus::Questionable => -0.06,
        InjuryStatus::DayToDay => -0.04,
        InjuryStatus::Probable => -0.02,
        _ => 0.0,
    };
    let t = &ctx.teammates;
    let teammate_boost = (f64::from(t.ruled_out()) * 0.015
        + f64::from(t.doubtful) * 0.01
        + f64::from(t.questionable) * 0.005)
        .min(0.05);
    let o = &ctx.opponents;
    let opponent_boost =
        (f64::from(o.ruled_out()) * 0.008 + f64::from(o.doubtful) * 0.005).min(0.03);
    let blowout = match blowout_steps(ctx.spread_abs) {
        2 => -0.025,
        1 => -0.015,
        _ => 0.0,
    };
    injury + teammate_boost + opponent_boost + blowout
}

/// Minutes/usage/opponent delta weighted by market sensitivity.
pub fn market_delta(market: &str, projection: &MinutesProjection, opponents: &StatusCounts) -> f64 {
    let w = market_weights(market);
    let delta = projection.minutes_delta() * w.minutes
        + projection.usage_delta * w.usage
        + f64::from(opponents.ruled_out()) * w.opponent;
    delta.clamp(-MAX_MARKET_DELTA, MAX_MARKET_DELTA)
}

/// Forecast p50 vs. projected minutes, scaled by market sensitivity and by
/// `p_active * confidence_score`.
pub fn minutes_forecast_delta(
    market: &str,
    projection: &MinutesProjection,
    forecast: &MinutesForecast,
) -> f64 {
    let Some(p50) = forecast.minutes_p50 else {
        return 0.0;
    };
    let p_active = forecast.p_active.map_or(1.0, |p| p.clamp(0.0, 1.0));
    let confidence = forecast.confidence_score.map_or(0.0, |c| c.clamp(0.0, 1.0));
    let delta = (p50 - projection.projected_minutes)
        * market_weights(market).minutes
        * 0.75
        * p_active
        * confidence;
    delta.clamp(-MAX_MINUTES_DELTA, MAX_MINUTES_DELTA)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbSource {
    Off,
    MinutesV1Model,
    MinutesV1Missing,
    MinutesV1Invalid,
    MinutesV1BaselineMissing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub context_delta: f64,
    pub market_delta: f64,
    /// `context_delta + market_delta`, clamped to ±`MAX_BASE_DELTA`.
    pub base_delta: f64,
    pub minutes_delta: f64,
    pub projection: MinutesProjection,
    pub prob_source: ProbSource,
    /// Forecast actually used (consistent, profile on).
    pub forecast: Option<MinutesForecast>,
}

impl Adjustment {
    /// Adjusted OVER probability from a fair OVER probability.
    pub fn apply(&self, p_over_fair: f64) -> f64 {
        clamp_probability(p_over_fair + self.base_delta + self.minutes_delta)
    }

    pub fn confidence_score(&self) -> Option<f64> {
        self.forecast.as_ref().and_then(|f| f.confidence_score)
    }

    pub fn minutes_band(&self) -> Option<f64> {
        self.forecast.as_ref().and_then(MinutesForecast::minutes_band)
    }
}

pub fn adjust(market: &str, ctx: &AdjustmentContext, profile: ProbabilisticProfile) -> Adjustment {
    let projection = project_minutes(market, ctx);
    let context_delta = context_delta(ctx);
    let market_delta = market_delta(market, &projection, &ctx.opponents);
    let base_delta = (context_delta + market_delta).clamp(-MAX_BASE_DELTA, MAX_BASE_DELTA);

    let (prob_source, forecast) = match (profile, &ctx.forecast) {
        (ProbabilisticProfile::Off, _) => (ProbSource::Off, None),
        (ProbabilisticProfile::MinutesV1, None) => (ProbSource::MinutesV1Missing, None),
        (ProbabilisticProfile::MinutesV1, Some(f)) if !f.is_consistent() => {
            tracing::debug!(
                event_id = %f.event_id,
                player = %f.player,
                "minutes forecast quantiles out of order, ignoring"
            );
            (ProbSource::MinutesV1Invalid, None)
        }
        (ProbabilisticProfile::MinutesV1, Some(f)) if f.minutes_p50.is_none() => {
            (ProbSource::MinutesV1Missing, Some(f.clone()))
        }
        (ProbabilisticProfile::MinutesV1, Some(f)) => (ProbSource::MinutesV1Model, Some(f.clone())),
    };
    let minutes_delta = forecast
        .as_ref()
        .map_or(0.0, |f| minutes_forecast_delta(market, &projection, f));

    Adjustment {
        context_delta,
        market_delta,
        base_delta,
        minutes_delta,
        projection,
        prob_source,
        forecast,
    }
}
