//! The per-line-group decision record.

use serde::Serialize;

use super::adjust::ProbSource;
use super::baseline::{BaselineUsed, LineSource};
use super::calibration::CalibrationFeedback;
use super::gates::GateReason;
use super::odds::rounded;
use super::pricing::{BestQuote, Tier};
use super::quality::PricingQuality;
use super::reference::ReferenceMethod;
use crate::feed::types::{InjuryStatus, RosterStatus, Side};
use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;

/// Best price for one side of the line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideQuote {
    pub book: String,
    pub price: i32,
    pub link: String,
    pub last_update: Option<DateTime<Utc>>,
    pub shop_delta: i32,
}

impl From<&BestQuote> for SideQuote {
    fn from(best: &BestQuote) -> Self {
        Self {
            book: best.book.clone(),
            price: best.price,
            link: best.link.clone(),
            last_update: best.last_update,
            shop_delta: best.shop_delta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub event_id: String,
    pub market: String,
    pub player: String,
    #[serde(serialize_with = "rounded::value")]
    pub point: f64,
    pub tier: Tier,
    pub book_count: usize,
    pub home_team: Option<String>,
    pub away_team: Option<String>,

    pub side: Side,
    pub selected: Option<SideQuote>,
    pub over: Option<SideQuote>,
    pub under: Option<SideQuote>,
    pub shop_value: i32,

    pub baseline_used: BaselineUsed,
    pub line_source: LineSource,
    pub reference_method: ReferenceMethod,
    pub reference_points_used: usize,
    pub baseline_books_used: Vec<String>,
    pub baseline_excluded_books: Vec<String>,
    #[serde(serialize_with = "rounded::option")]
    pub p_over_fair: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub p_under_fair: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub hold: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub hold_best: Option<f64>,
    pub quality: PricingQuality,

    pub injury_status: InjuryStatus,
    pub roster_status: RosterStatus,
    #[serde(serialize_with = "rounded::value")]
    pub context_delta: f64,
    #[serde(serialize_with = "rounded::value")]
    pub market_delta: f64,
    #[serde(serialize_with = "rounded::value")]
    pub base_delta: f64,
    #[serde(serialize_with = "rounded::value")]
    pub minutes_delta: f64,
    #[serde(serialize_with = "rounded::value")]
    pub projected_minutes: f64,
    #[serde(serialize_with = "rounded::value")]
    pub usage_delta: f64,
    pub prob_source: ProbSource,
    #[serde(serialize_with = "rounded::option")]
    pub minutes_p50: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub minutes_band: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub p_active: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub confidence_score: Option<f64>,

    #[serde(serialize_with = "rounded::option")]
    pub p_over_model: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub p_under_model: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub model_p_hit: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub p_hit_low: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub p_hit_high: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub ev_over: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub ev_under: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub best_ev: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub best_kelly: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub quarter_kelly: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub ev_low: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub ev_high: Option<f64>,

    pub calibration: Option<CalibrationFeedback>,
    #[serde(serialize_with = "rounded::option")]
    pub p_hit_calibrated: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub ev_calibrated: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub p_hit_low_calibrated: Option<f64>,
    #[serde(serialize_with = "rounded::option")]
    pub ev_low_calibrated: Option<f64>,
    #[serde(serialize_with = "rounded::value")]
    pub historical_prior_delta: f64,
    pub historical_prior_samples: u32,
    #[serde(serialize_with = "rounded::value")]
    pub score: f64,

    /// Break-even price at the model probability.
    #[serde(serialize_with = "rounded::option")]
    pub fair_decimal: Option<f64>,
    pub fair_american: Option<i32>,
    #[serde(serialize_with = "rounded::value")]
    pub target_roi: f64,
    #[serde(serialize_with = "rounded::option")]
    pub play_to_decimal: Option<f64>,
    pub play_to_american: Option<i32>,

    pub pre_bet_ready: bool,
    pub pre_bet_reason: String,
    pub eligible: bool,
    pub reason: Option<GateReason>,
}

impl Candidate {
    /// Identity used for ordering ties: `(event_id, player, point)`.
    pub fn tie_key(&self) -> (&str, &str, OrderedFloat<f64>) {
        (
            self.event_id.as_str(),
            self.player.as_str(),
            OrderedFloat(self.point),
        )
    }

    pub fn selected_price(&self) -> Option<i32> {
        self.selected.as_ref().map(|q| q.price)
    }

    pub fn mark_ineligible(&mut self, reason: GateReason) {
        self.eligible = false;
        self.reason = Some(reason);
    }
}

/// `(-best_ev, -score, event_id, player, point)`; a missing EV sorts last.
pub fn rank_order(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    let ev = |c: &Candidate| OrderedFloat(c.best_ev.unwrap_or(f64::NEG_INFINITY));
    ev(b)
        .cmp(&ev(a))
        .then_with(|| OrderedFloat(b.score).cmp(&OrderedFloat(a.score)))
        .then_with(|| a.tie_key().cmp(&b.tie_key()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::engine::quality::uncertainty_band;

    /// An eligible tier-A over with neutral context.
    pub fn candidate(event_id: &str, player: &str, point: f64, best_ev: f64) -> Candidate {
        let quality = PricingQuality {
            books_used: vec!["bk1".into(), "bk2".into()],
            book_pair_count: 2,
            p_over_book_median: Some(0.5),
            hold_book_median: Some(0.045),
            p_over_book_iqr: Some(0.01),
            p_over_book_range: Some(0.02),
            freshest_quote_utc: None,
            quote_age_minutes: Some(1.0),
            depth_score: 0.5,
            hold_score: 0.625,
            dispersion_score: 0.933333,
            freshness_score: 0.95,
            quality_score: 0.752083,
            uncertainty_band: uncertainty_band(0.752083, Some(0.01)),
        };
        let quote = SideQuote {
            book: "bk1".into(),
            price: -110,
            link: String::new(),
            last_update: None,
            shop_delta: 5,
        };
        Candidate {
            event_id: event_id.into(),
            market: "player_points".into(),
            player: player.into(),
            point,
            tier: Tier::A,
            book_count: 2,
            home_team: Some("BOS".into()),
            away_team: Some("NYK".into()),
            side: Side::Over,
            selected: Some(quote.clone()),
            over: Some(quote.clone()),
            under: Some(quote),
            shop_value: 10,
            baseline_used: BaselineUsed::MedianBook,
            line_source: LineSource::ExactPointPairs,
            reference_method: ReferenceMethod::Exact,
            reference_points_used: 1,
            baseline_books_used: vec!["bk2".into()],
            baseline_excluded_books: vec!["bk1".into()],
            p_over_fair: Some(0.5),
            p_under_fair: Some(0.5),
            hold: Some(0.045),
            hold_best: Some(0.04),
            quality,
            injury_status: InjuryStatus::Available,
            roster_status: RosterStatus::Active,
            context_delta: 0.0,
            market_delta: 0.0,
            base_delta: 0.0,
            minutes_delta: 0.0,
            projected_minutes: 31.0,
            usage_delta: 0.0,
            prob_source: ProbSource::Off,
            minutes_p50: None,
            minutes_band: None,
            p_active: None,
            confidence_score: None,
            p_over_model: Some(0.55),
            p_under_model: Some(0.45),
            model_p_hit: Some(0.55),
            p_hit_low: Some(0.5),
            p_hit_high: Some(0.6),
            ev_over: Some(best_ev),
            ev_under: Some(-0.14),
            best_ev: Some(best_ev),
            best_kelly: Some(best_ev / 0.909091),
            quarter_kelly: Some(best_ev / 0.909091 / 4.0),
            ev_low: Some(best_ev - 0.1),
            ev_high: Some(best_ev + 0.1),
            calibration: None,
            p_hit_calibrated: None,
            ev_calibrated: None,
            p_hit_low_calibrated: None,
            ev_low_calibrated: None,
            historical_prior_delta: 0.0,
            historical_prior_samples: 0,
            score: best_ev * 1000.0,
            fair_decimal: Some(1.818182),
            fair_american: Some(-122),
            target_roi: 0.03,
            play_to_decimal: Some(1.872727),
            play_to_american: Some(-115),
            pre_bet_ready: true,
            pre_bet_reason: "ready".into(),
            eligible: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::candidate;
    use super::*;

    #[test]
    fn test_rank_order() {
        let mut rows = vec![
            candidate("e2", "B", 20.5, 0.05),
            candidate("e1", "A", 20.5, 0.08),
            candidate("e1", "A", 19.5, 0.05),
        ];
        let mut missing = candidate("e0", "Z", 1.5, 0.0);
        missing.best_ev = None;
        rows.push(missing);
        rows.sort_by(rank_order);
        let order: Vec<(&str, f64)> = rows.iter().map(|c| (c.event_id.as_str(), c.point)).collect();
        assert_eq!(order, vec![("e1", 20.5), ("e1", 19.5), ("e2", 20.5), ("e0", 1.5)]);
    }

    #[test]
    fn test_mark_ineligible() {
        let mut row = candidate("e1", "A", 20.5, 0.05);
        row.mark_ineligible(GateReason::EventMappingMissing);
        assert!(!row.eligible);
        assert_eq!(row.reason, Some(GateReason::EventMappingMissing));
    }
}
