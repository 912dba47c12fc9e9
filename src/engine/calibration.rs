//! Historical calibration feedback. Bucket deltas produce a calibrated
//! probability for display; rolling priors nudge the ranking score. Neither
//! ever decides eligibility.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::odds::{clamp_probability, rounded};
use crate::feed::types::Side;

pub const DEFAULT_BUCKET_SIZE: f64 = 0.05;
/// Score points per unit of historical prior delta.
pub const PRIOR_SCORE_WEIGHT: f64 = 250.0;
/// Ranking penalty when the baseline hold is unknown.
pub const UNKNOWN_HOLD_PENALTY: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalibrationBucket {
    pub delta: f64,
    #[serde(default)]
    pub sample_size: u32,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// One row of `calibration.json`.
#[derive(Debug, Deserialize)]
pub struct CalibrationEntry {
    market: String,
    side: String,
    bucket: u32,
    #[serde(flatten)]
    values: CalibrationBucket,
}

#[derive(Debug, Deserialize)]
pub struct CalibrationFile {
    #[serde(default = "default_bucket_size")]
    bucket_size: f64,
    #[serde(default)]
    entries: Vec<CalibrationEntry>,
}

fn default_bucket_size() -> f64 {
    DEFAULT_BUCKET_SIZE
}

/// `(market, side, probability bucket)` → calibration delta.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "CalibrationFile")]
pub struct CalibrationLookup {
    bucket_size: f64,
    buckets: BTreeMap<(String, Side, u32), CalibrationBucket>,
}

impl Default for CalibrationLookup {
    fn default() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
            buckets: BTreeMap::new(),
        }
    }
}

impl From<CalibrationFile> for CalibrationLookup {
    fn from(file: CalibrationFile) -> Self {
        let bucket_size = if file.bucket_size > 0.0 && file.bucket_size <= 1.0 {
            file.bucket_size
        } else {
            DEFAULT_BUCKET_SIZE
        };
        let mut lookup = Self {
            bucket_size,
            buckets: BTreeMap::new(),
        };
        for entry in file.entries {
            match Side::parse(&entry.side) {
                Some(side) => lookup.insert(&entry.market, side, entry.bucket, entry.values),
                None => tracing::warn!(side = %entry.side, "calibration entry with unknown side"),
            }
        }
        lookup
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationFeedback {
    pub bucket_index: u32,
    #[serde(serialize_with = "rounded::value")]
    pub bucket_low: f64,
    #[serde(serialize_with = "rounded::value")]
    pub bucket_high: f64,
    #[serde(serialize_with = "rounded::value")]
    pub delta: f64,
    pub sample_size: u32,
    #[serde(serialize_with = "rounded::option")]
    pub confidence: Option<f64>,
    #[serde(serialize_with = "rounded::value")]
    pub p_calibrated: f64,
}

impl CalibrationLookup {
    pub fn insert(&mut self, market: &str, side: Side, bucket: u32, values: CalibrationBucket) {
        self.buckets
            .insert((market.to_ascii_lowercase(), side, bucket), values);
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn bucket_index(&self, probability: f64) -> u32 {
        let max_index = (1.0 / self.bucket_size).floor() as u32;
        ((probability.clamp(0.0, 1.0) / self.bucket_size).floor() as u32).min(max_index)
    }

    /// Calibrated probability for a model probability, if history exists.
    pub fn feedback(
        &self,
        market: &str,
        side: Side,
        probability: f64,
    ) -> Option<CalibrationFeedback> {
        if !probability.is_finite() {
            return None;
        }
        let index = self.bucket_index(probability);
        let bucket = self
            .buckets
            .get(&(market.to_ascii_lowercase(), side, index))?;
        let low = f64::from(index) * self.bucket_size;
        Some(CalibrationFeedback {
            bucket_index: index,
            bucket_low: low,
            bucket_high: (low + self.bucket_size).min(1.0),
            delta: bucket.delta,
            sample_size: bucket.sample_size,
            confidence: bucket.confidence,
            p_calibrated: clamp_probability(probability + bucket.delta),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorAdjustment {
    pub delta: f64,
    #[serde(default)]
    pub sample_size: u32,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub hit_rate: Option<f64>,
}

/// Longer-run hit-rate priors keyed `"market::side"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingPriors {
    #[serde(default)]
    pub window_days: u32,
    #[serde(default)]
    pub rows_used: u64,
    #[serde(default)]
    pub as_of_day: Option<String>,
    #[serde(default)]
    pub adjustments: BTreeMap<String, PriorAdjustment>,
}

pub fn prior_key(market: &str, side: Side) -> String {
    format!("{}::{}", market.trim().to_ascii_lowercase(), side.as_str())
}

impl RollingPriors {
    pub fn prior_for(&self, market: &str, side: Side) -> Option<&PriorAdjustment> {
        self.adjustments.get(&prior_key(market, side))
    }
}

/// Inputs to the ranking score for one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingInputs {
    pub best_ev: Option<f64>,
    pub book_count: usize,
    /// Sum of both sides' best-minus-worst price spread.
    pub shop_value: i32,
    pub hold: Option<f64>,
    pub prior_delta: f64,
}

/// `ev*1000 + books*5 + shop/10 - hold_penalty + prior*250`. A missing EV
/// scores as -0.5 so it sinks below every priced line.
pub fn ranking_score(inputs: &RankingInputs) -> f64 {
    let hold_penalty = inputs.hold.map_or(UNKNOWN_HOLD_PENALTY, |h| h * 100.0);
    inputs.best_ev.unwrap_or(-0.5) * 1000.0
        + inputs.book_count as f64 * 5.0
        + f64::from(inputs.shop_value) / 10.0
        - hold_penalty
        + inputs.prior_delta * PRIOR_SCORE_WEIGHT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> CalibrationLookup {
        serde_json::from_str(
            r#"{"bucket_size": 0.05, "entries": [
                {"market": "player_points", "side": "over", "bucket": 11,
                 "delta": -0.03, "sample_size": 120, "confidence": 0.8},
                {"market": "player_points", "side": "sideways", "bucket": 11, "delta": 0.5}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_bucket_index() {
        let lookup = CalibrationLookup::default();
        assert_eq!(lookup.bucket_index(0.0), 0);
        assert_eq!(lookup.bucket_index(0.57), 11);
        assert_eq!(lookup.bucket_index(1.0), 20);
    }

    #[test]
    fn test_feedback_hit() {
        let feedback = lookup().feedback("PLAYER_POINTS", Side::Over, 0.57).unwrap();
        assert_eq!(feedback.bucket_index, 11);
        assert!((feedback.bucket_low - 0.55).abs() < 1e-12);
        assert!((feedback.bucket_high - 0.60).abs() < 1e-12);
        assert!((feedback.p_calibrated - 0.54).abs() < 1e-12);
        assert_eq!(feedback.sample_size, 120);
    }

    #[test]
    fn test_feedback_miss() {
        let lookup = lookup();
        assert!(lookup.feedback("player_points", Side::Under, 0.57).is_none());
        assert!(lookup.feedback("player_points", Side::Over, 0.42).is_none());
        assert!(lookup.feedback("player_points", Side::Over, f64::NAN).is_none());
    }

    #[test]
    fn test_unknown_side_entries_dropped() {
        assert_eq!(lookup().buckets.len(), 1);
    }

    #[test]
    fn test_prior_lookup() {
        let priors: RollingPriors = serde_json::from_str(
            r#"{"window_days": 30, "rows_used": 412, "as_of_day": "2026-01-09",
                "adjustments": {"player_points::over": {"delta": 0.02, "sample_size": 80}}}"#,
        )
        .unwrap();
        let prior = priors.prior_for("player_points", Side::Over).unwrap();
        assert_eq!(prior.delta, 0.02);
        assert!(priors.prior_for("player_points", Side::Under).is_none());
    }

    #[test]
    fn test_ranking_score() {
        // 0.05*1000 + 3*5 + 20/10 - 4.5 + 0.02*250 = 50 + 15 + 2 - 4.5 + 5 = 67.5
        let score = ranking_score(&RankingInputs {
            best_ev: Some(0.05),
            book_count: 3,
            shop_value: 20,
            hold: Some(0.045),
            prior_delta: 0.02,
        });
        assert!((score - 67.5).abs() < 1e-9);
    }

    #[test]
    fn test_ranking_score_unknowns() {
        // -0.5*1000 + 5 + 0 - 20 = -515
        let score = ranking_score(&RankingInputs {
            best_ev: None,
            book_count: 1,
            shop_value: 0,
            hold: None,
            prior_delta: 0.0,
        });
        assert!((score + 515.0).abs() < 1e-9);
    }
}
