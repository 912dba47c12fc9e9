//! Pricing quality: depth, hold, dispersion and freshness folded into one
//! 0–1 score, plus the uncertainty band used for probability bounds.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::odds::{clamp_probability, rounded};
use super::pricing::{age_minutes, freshest_update, PairSummary};
use crate::feed::types::Quote;

/// Books needed for full depth credit.
const FULL_DEPTH_BOOKS: f64 = 4.0;
/// Hold at or above this scores zero.
const HOLD_ZERO_AT: f64 = 0.12;
/// IQR (or range) at or above this scores zero.
const DISPERSION_ZERO_AT: f64 = 0.15;

const WEIGHT_DEPTH: f64 = 0.25;
const WEIGHT_HOLD: f64 = 0.25;
const WEIGHT_DISPERSION: f64 = 0.25;
const WEIGHT_FRESHNESS: f64 = 0.25;

pub const BASE_BAND: f64 = 0.12;
pub const MIN_BAND: f64 = 0.02;
pub const MAX_BAND: f64 = 0.20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingQuality {
    pub books_used: Vec<String>,
    pub book_pair_count: usize,
    #[serde(serialize_with = "rounded::option")]
    pub p_over_book_median: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub hold_book_median: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub p_over_book_iqr: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub p_over_book_range: Option<f64>,
    pub freshest_quote_utc: Option<DateTime<Utc>>,
    #[serde(serialize_with = "rounded::option")]
    pub quote_age_minutes: Option<f64>,
    #[serde(serialize_with = "rounded::value")]
    pub depth_score: f64,
    #[serde(serialize_with = "rounded::value")]
    pub hold_score: f64,
    #[serde(serialize_with = "rounded::value")]
    pub dispersion_score: f64,
    #[serde(serialize_with = "rounded::value")]
    pub freshness_score: f64,
    #[serde(serialize_with = "rounded::value")]
    pub quality_score: f64,
    #[serde(serialize_with = "rounded::value")]
    pub uncertainty_band: f64,
}

fn unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Score one line group's pricing.
///
/// - `summary`: per-book pair statistics at the exact point
/// - `book_count`: distinct books quoting the line
/// - `hold_fallback`: best-sides hold, used when no book pair exists
/// - `quotes`: every quote in the group, for freshness
pub fn score_quality(
    summary: &PairSummary,
    book_count: usize,
    hold_fallback: Option<f64>,
    quotes: &[Quote],
    now: DateTime<Utc>,
    stale_after_minutes: u32,
) -> PricingQuality {
    let freshest = freshest_update(quotes);
    let quote_age_minutes = freshest.map(|ts| age_minutes(now, ts));

    let depth_score = unit(book_count as f64 / FULL_DEPTH_BOOKS);
    let hold_score = summary
        .hold_median
        .or(hold_fallback)
        .map_or(0.0, |h| unit(1.0 - unit(h) / HOLD_ZERO_AT));
    let dispersion_score = summary
        .p_over_iqr
        .or(summary.p_over_range)
        .map_or(0.0, |d| unit(1.0 - unit(d) / DISPERSION_ZERO_AT));
    let freshness_score = quote_age_minutes.map_or(0.0, |age| {
        unit(1.0 - age / f64::from(stale_after_minutes.max(1)))
    });

    let quality_score = depth_score * WEIGHT_DEPTH
        + hold_score * WEIGHT_HOLD
        + dispersion_score * WEIGHT_DISPERSION
        + freshness_score * WEIGHT_FRESHNESS;

    PricingQuality {
        books_used: summary.books_used.clone(),
        book_pair_count: summary.book_pair_count,
        p_over_book_median: summary.p_over_median,
        hold_book_median: summary.hold_median,
        p_over_book_iqr: summary.p_over_iqr,
        p_over_book_range: summary.p_over_range,
        freshest_quote_utc: freshest,
        quote_age_minutes,
        depth_score,
        hold_score,
        dispersion_score,
        freshness_score,
        quality_score,
        uncertainty_band: uncertainty_band(quality_score, summary.p_over_iqr),
    }
}

/// `BASE_BAND * (1 - quality)`, never below `MIN_BAND` or half the book IQR,
/// never above `MAX_BAND`.
pub fn uncertainty_band(quality_score: f64, p_over_iqr: Option<f64>) -> f64 {
    let band = (BASE_BAND * (1.0 - unit(quality_score))).max(MIN_BAND);
    let band = p_over_iqr.map_or(band, |iqr| band.max(iqr / 2.0));
    band.min(MAX_BAND)
}

/// (low, high) bounds around a model probability.
pub fn hit_bounds(model_p: f64, band: f64) -> (f64, f64) {
    (clamp_probability(model_p - band), clamp_probability(model_p + band))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::Side;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 18, 0, 0).unwrap()
    }

    fn quote_at(minutes_ago: i64) -> Quote {
        Quote {
            side: Side::Over,
            price: -110,
            book: "fd".into(),
            link: String::new(),
            last_update: Some(now() - Duration::minutes(minutes_ago)),
        }
    }

    fn summary(pairs: usize, hold: f64, iqr: f64) -> PairSummary {
        PairSummary {
            books_used: (0..pairs).map(|i| format!("b{i}")).collect(),
            book_pair_count: pairs,
            p_over_median: Some(0.5),
            hold_median: Some(hold),
            p_over_iqr: Some(iqr),
            p_over_range: Some(iqr),
        }
    }

    #[test]
    fn test_perfect_line_scores_one() {
        let quality = score_quality(&summary(4, 0.0, 0.0), 4, None, &[quote_at(0)], now(), 20);
        assert!((quality.quality_score - 1.0).abs() < 1e-12);
        assert_eq!(quality.uncertainty_band, MIN_BAND);
    }

    #[test]
    fn test_component_scores() {
        // depth 2/4 = 0.5, hold 1 - 0.06/0.12 = 0.5,
        // dispersion 1 - 0.03/0.15 = 0.8, freshness 1 - 5/20 = 0.75
        // quality = 0.25 * (0.5 + 0.5 + 0.8 + 0.75) = 0.6375
        let quality = score_quality(&summary(2, 0.06, 0.03), 2, None, &[quote_at(5)], now(), 20);
        assert!((quality.depth_score - 0.5).abs() < 1e-12);
        assert!((quality.hold_score - 0.5).abs() < 1e-12);
        assert!((quality.dispersion_score - 0.8).abs() < 1e-12);
        assert!((quality.freshness_score - 0.75).abs() < 1e-12);
        assert!((quality.quality_score - 0.6375).abs() < 1e-12);
        // band = 0.12 * 0.3625 = 0.0435
        assert!((quality.uncertainty_band - 0.0435).abs() < 1e-12);
    }

    #[test]
    fn test_stale_quotes_score_zero_freshness() {
        let quality = score_quality(&summary(2, 0.05, 0.01), 2, None, &[quote_at(45)], now(), 20);
        assert_eq!(quality.freshness_score, 0.0);
        let quality = score_quality(&summary(2, 0.05, 0.01), 2, None, &[], now(), 20);
        assert_eq!(quality.freshness_score, 0.0);
        assert_eq!(quality.quote_age_minutes, None);
    }

    #[test]
    fn test_hold_falls_back_to_best_sides() {
        let empty = PairSummary::default();
        let quality = score_quality(&empty, 1, Some(0.03), &[quote_at(0)], now(), 20);
        assert!((quality.hold_score - 0.75).abs() < 1e-12);
        assert_eq!(quality.dispersion_score, 0.0);
    }

    #[test]
    fn test_band_respects_iqr_and_cap() {
        assert!((uncertainty_band(0.9, Some(0.1)) - 0.05).abs() < 1e-12);
        assert_eq!(uncertainty_band(0.0, Some(0.6)), MAX_BAND);
        assert!((uncertainty_band(0.0, None) - BASE_BAND).abs() < 1e-12);
    }

    #[test]
    fn test_hit_bounds_bracket_model() {
        let (low, high) = hit_bounds(0.985, 0.05);
        assert!((low - 0.935).abs() < 1e-12);
        assert_eq!(high, 0.99);
        assert!(low <= 0.985 && 0.985 <= high);
    }
}
