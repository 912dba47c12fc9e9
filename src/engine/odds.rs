//! American-odds conversions, no-vig normalization, and EV/Kelly math.
//!
//! Every function here is total: undefined inputs (price 0, probability
//! outside the open unit interval) come back as `None` instead of panicking.

pub const PROB_FLOOR: f64 = 0.01;
pub const PROB_CEIL: f64 = 0.99;

/// Convert American odds to decimal odds.
/// Positive odds (e.g., +150): 1 + 150/100 = 2.5
/// Negative odds (e.g., -150): 1 + 100/150 = 1.667
pub fn american_to_decimal(price: i32) -> Option<f64> {
    match price {
        0 => None,
        p if p > 0 => Some(1.0 + p as f64 / 100.0),
        p => Some(1.0 + 100.0 / (p as f64).abs()),
    }
}

/// Convert American odds to the bookmaker-implied probability (vig included).
pub fn implied_probability(price: i32) -> Option<f64> {
    american_to_decimal(price).map(|decimal| 1.0 / decimal)
}

/// Convert decimal odds back to the nearest American price.
pub fn decimal_to_american(decimal: f64) -> Option<i32> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return None;
    }
    if decimal >= 2.0 {
        Some(((decimal - 1.0) * 100.0).round() as i32)
    } else {
        Some((-100.0 / (decimal - 1.0)).round() as i32)
    }
}

/// Devig an over/under pair of implied probabilities.
/// Returns (p_over_fair, p_under_fair), summing to 1.
pub fn no_vig_pair(over_implied: Option<f64>, under_implied: Option<f64>) -> Option<(f64, f64)> {
    let (over, under) = (over_implied?, under_implied?);
    let total = over + under;
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    Some((over / total, under / total))
}

/// Bookmaker margin: implied_over + implied_under - 1.
pub fn hold(over_implied: Option<f64>, under_implied: Option<f64>) -> Option<f64> {
    Some(over_implied? + under_implied? - 1.0)
}

/// Expected profit per unit staked.
pub fn expected_value(probability: f64, price: i32) -> Option<f64> {
    if !(probability > 0.0 && probability < 1.0) {
        return None;
    }
    let decimal = american_to_decimal(price)?;
    if decimal <= 1.0 {
        return None;
    }
    Some(probability * (decimal - 1.0) - (1.0 - probability))
}

/// Full Kelly fraction: ev / net payout odds.
pub fn kelly_fraction(probability: f64, price: i32) -> Option<f64> {
    let ev = expected_value(probability, price)?;
    let profit_if_win = american_to_decimal(price)? - 1.0;
    if profit_if_win <= 0.0 {
        return None;
    }
    Some(ev / profit_if_win)
}

/// EV and Kelly together; either input missing propagates as `(None, None)`.
pub fn ev_and_kelly(probability: Option<f64>, price: Option<i32>) -> (Option<f64>, Option<f64>) {
    match (probability, price) {
        (Some(p), Some(price)) => (expected_value(p, price), kelly_fraction(p, price)),
        _ => (None, None),
    }
}

/// Minimum acceptable price for a target ROI at a given hit probability.
/// Returns (decimal, american).
pub fn play_to(probability: Option<f64>, target_roi: f64) -> (Option<f64>, Option<i32>) {
    match probability {
        Some(p) if p > 0.0 => {
            let minimum_decimal = (1.0 + target_roi) / p;
            (Some(minimum_decimal), decimal_to_american(minimum_decimal))
        }
        _ => (None, None),
    }
}

pub fn clamp_probability(p: f64) -> f64 {
    p.clamp(PROB_FLOOR, PROB_CEIL)
}

/// Round to the 6-decimal precision used in every emitted record.
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// `serialize_with` helpers that round floats to 6 decimals on the way out.
pub mod rounded {
    use serde::Serializer;

    pub fn value<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(super::round6(*value))
    }

    pub fn option<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&super::round6(*v)),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_american_to_decimal() {
        assert!((american_to_decimal(150).unwrap() - 2.5).abs() < 1e-12);
        assert!((american_to_decimal(-150).unwrap() - (1.0 + 100.0 / 150.0)).abs() < 1e-12);
        assert_eq!(american_to_decimal(0), None);
    }

    #[test]
    fn test_implied_probability() {
        let prob = implied_probability(-150).unwrap();
        assert!((prob - 0.6).abs() < 1e-9);

        let prob = implied_probability(150).unwrap();
        assert!((prob - 0.4).abs() < 1e-9);

        assert_eq!(implied_probability(0), None);
    }

    #[test]
    fn test_no_vig_pair_sums_to_one() {
        let (over, under) =
            no_vig_pair(implied_probability(-110), implied_probability(-110)).unwrap();
        assert!((over - 0.5).abs() < 1e-12);
        assert!((over + under - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_vig_pair_missing_side() {
        assert_eq!(no_vig_pair(None, Some(0.5)), None);
        assert_eq!(no_vig_pair(implied_probability(0), implied_probability(-110)), None);
    }

    #[test]
    fn test_fair_pair_round_trip() {
        // p=0.6 → fair decimal 1/0.6=1.667 → -150; 1-p → 2.5 → +150
        for p in [0.6, 0.5, 0.4] {
            let over = decimal_to_american(1.0 / p).unwrap();
            let under = decimal_to_american(1.0 / (1.0 - p)).unwrap();
            let (fair_over, fair_under) =
                no_vig_pair(implied_probability(over), implied_probability(under)).unwrap();
            assert!((fair_over - p).abs() < 1e-3, "p={p} got {fair_over}");
            assert!((fair_under - (1.0 - p)).abs() < 1e-3);
        }
    }

    #[test]
    fn test_hold_standard_juice() {
        // -110/-110: 0.5238 + 0.5238 - 1 = 0.0476
        let h = hold(implied_probability(-110), implied_probability(-110)).unwrap();
        assert!((h - 0.047619).abs() < 1e-6);
    }

    #[test]
    fn test_ev_at_minus_110() {
        // decimal = 1.9091, ev = 0.55*0.9091 - 0.45 = 0.05
        let ev = expected_value(0.55, -110).unwrap();
        assert!((ev - 0.05).abs() < 1e-3);
    }

    #[test]
    fn test_ev_rejects_degenerate_probability() {
        assert_eq!(expected_value(0.0, -110), None);
        assert_eq!(expected_value(1.0, -110), None);
        assert_eq!(expected_value(0.5, 0), None);
        assert_eq!(expected_value(f64::NAN, 120), None);
    }

    #[test]
    fn test_kelly_fraction() {
        // +100: b=1, p=0.55 → ev=0.10, kelly=0.10
        let k = kelly_fraction(0.55, 100).unwrap();
        assert!((k - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_ev_and_kelly_propagates_none() {
        assert_eq!(ev_and_kelly(None, Some(-110)), (None, None));
        assert_eq!(ev_and_kelly(Some(0.5), None), (None, None));
    }

    #[test]
    fn test_decimal_to_american() {
        assert_eq!(decimal_to_american(2.5), Some(150));
        assert_eq!(decimal_to_american(2.0), Some(100));
        assert_eq!(decimal_to_american(1.5), Some(-200));
        assert_eq!(decimal_to_american(1.0), None);
    }

    #[test]
    fn test_play_to() {
        // p=0.5, roi=0.03 → 1.03/0.5 = 2.06 → +106
        let (decimal, american) = play_to(Some(0.5), 0.03);
        assert!((decimal.unwrap() - 2.06).abs() < 1e-9);
        assert_eq!(american, Some(106));
        assert_eq!(play_to(Some(0.0), 0.03), (None, None));
    }

    #[test]
    fn test_round6() {
        assert_eq!(round6(0.123_456_7), 0.123_457);
        assert_eq!(round6(-0.000_000_4), 0.0);
    }
}
