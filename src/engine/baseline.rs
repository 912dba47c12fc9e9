//! Baseline selection: which fair-probability source backs a candidate.
//!
//! Resolution order for `median_book`: exact-point book median (needs at
//! least two book pairs), then the identity's reference curve, then the
//! best-sides pair when the fallback allows it. `best_sides` goes straight to
//! the best-priced pair. Anything that fails to resolve is `missing`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use super::pricing::{
    best_side, best_sides_pair, book_fair_pairs, BestQuote, LineGroup, PairSummary,
};
use super::quality::{score_quality, PricingQuality};
use super::reference::{ReferenceEstimate, ReferenceIndex, ReferenceMethod};
use crate::config::{BaselineFallback, BaselineMethod};
use crate::feed::types::Side;

/// Book pairs needed at the exact point before the median is trusted.
pub const MIN_MEDIAN_BOOK_PAIRS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineUsed {
    MedianBook,
    MedianBookInterpolated,
    BestSides,
    BestSidesFallback,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSource {
    ExactPointPairs,
    ReferenceCurve,
    BestSides,
    Missing,
}

impl BaselineUsed {
    pub fn line_source(self) -> LineSource {
        match self {
            BaselineUsed::MedianBook => LineSource::ExactPointPairs,
            BaselineUsed::MedianBookInterpolated => LineSource::ReferenceCurve,
            BaselineUsed::BestSides | BaselineUsed::BestSidesFallback => LineSource::BestSides,
            BaselineUsed::Missing => LineSource::Missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaselineSelection {
    pub p_over_fair: Option<f64>,
    pub p_under_fair: Option<f64>,
    pub hold: Option<f64>,
    pub used: BaselineUsed,
    pub reference_method: ReferenceMethod,
}

impl BaselineSelection {
    fn missing(reference_method: ReferenceMethod) -> Self {
        Self {
            p_over_fair: None,
            p_under_fair: None,
            hold: None,
            used: BaselineUsed::Missing,
            reference_method,
        }
    }

    fn from_p_over(
        p_over: f64,
        hold: Option<f64>,
        used: BaselineUsed,
        method: ReferenceMethod,
    ) -> Self {
        Self {
            p_over_fair: Some(p_over),
            p_under_fair: Some(1.0 - p_over),
            hold,
            used,
            reference_method: method,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.p_over_fair.is_some() && self.p_under_fair.is_some()
    }
}

/// Walk the resolution chain for one set of inputs.
pub fn resolve_baseline(
    method: BaselineMethod,
    fallback: BaselineFallback,
    best_pair: Option<(f64, f64)>,
    hold_best: Option<f64>,
    exact: &PairSummary,
    reference: &ReferenceEstimate,
) -> BaselineSelection {
    let best_sides = |used: BaselineUsed| match best_pair {
        Some((p_over, p_under)) => BaselineSelection {
            p_over_fair: Some(p_over),
            p_under_fair: Some(p_under),
            hold: hold_best,
            used,
            reference_method: reference.method,
        },
        None => BaselineSelection::missing(reference.method),
    };

    match method {
        BaselineMethod::BestSides => best_sides(BaselineUsed::BestSides),
        BaselineMethod::MedianBook => {
            if exact.book_pair_count >= MIN_MEDIAN_BOOK_PAIRS {
                if let (Some(p_over), Some(hold)) = (exact.p_over_median, exact.hold_median) {
                    return BaselineSelection::from_p_over(
                        p_over,
                        Some(hold),
                        BaselineUsed::MedianBook,
                        ReferenceMethod::Exact,
                    );
                }
            }
            if let Some(p_over) = reference.p_over {
                return BaselineSelection::from_p_over(
                    p_over,
                    reference.hold,
                    BaselineUsed::MedianBookInterpolated,
                    reference.method,
                );
            }
            match fallback {
                BaselineFallback::BestSides => best_sides(BaselineUsed::BestSidesFallback),
                BaselineFallback::None => BaselineSelection::missing(reference.method),
            }
        }
    }
}

/// Everything the baseline needs for one line group with a fixed set of
/// books removed from every input.
#[derive(Debug, Clone)]
pub struct BaselineScenario {
    pub excluded_books: BTreeSet<String>,
    pub best_over: Option<BestQuote>,
    pub best_under: Option<BestQuote>,
    pub hold_best: Option<f64>,
    pub reference: ReferenceEstimate,
    pub quality: PricingQuality,
    pub selection: BaselineSelection,
    /// Distinct books backing the chosen baseline.
    pub books_used: BTreeSet<String>,
}

pub struct ScenarioSettings {
    pub method: BaselineMethod,
    pub fallback: BaselineFallback,
    pub now: DateTime<Utc>,
    pub stale_quote_minutes: u32,
}

pub fn build_scenario(
    group: &LineGroup,
    index: &mut ReferenceIndex<'_>,
    settings: &ScenarioSettings,
    excluded: BTreeSet<String>,
) -> BaselineScenario {
    let best_over = best_side(&group.quotes, Side::Over, &excluded);
    let best_under = best_side(&group.quotes, Side::Under, &excluded);
    let (best_pair, hold_best) = best_sides_pair(best_over.as_ref(), best_under.as_ref());

    let exact = PairSummary::from_pairs(&book_fair_pairs(&group.quotes, &excluded));
    let book_count = group
        .books()
        .into_iter()
        .filter(|book| !excluded.contains(*book))
        .count();
    let quality = score_quality(
        &exact,
        book_count,
        hold_best,
        &group.quotes,
        settings.now,
        settings.stale_quote_minutes,
    );

    let entry = index.curve(group.identity(), &excluded);
    let reference = entry.curve.estimate(group.point());
    let selection = resolve_baseline(
        settings.method,
        settings.fallback,
        best_pair,
        hold_best,
        &exact,
        &reference,
    );

    let books_used: BTreeSet<String> = match selection.used {
        BaselineUsed::BestSides | BaselineUsed::BestSidesFallback => best_over
            .iter()
            .chain(best_under.iter())
            .map(|q| q.book.clone())
            .collect(),
        BaselineUsed::MedianBookInterpolated => entry.books.clone(),
        BaselineUsed::MedianBook => exact.books_used.iter().cloned().collect(),
        BaselineUsed::Missing => BTreeSet::new(),
    };

    BaselineScenario {
        excluded_books: excluded,
        best_over,
        best_under,
        hold_best,
        reference,
        quality,
        selection,
        books_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(pairs: usize, p_over: Option<f64>) -> PairSummary {
        PairSummary {
            books_used: (0..pairs).map(|i| format!("b{i}")).collect(),
            book_pair_count: pairs,
            p_over_median: p_over,
            hold_median: p_over.map(|_| 0.045),
            p_over_iqr: p_over.map(|_| 0.01),
            p_over_range: p_over.map(|_| 0.02),
        }
    }

    fn reference(p_over: Option<f64>) -> ReferenceEstimate {
        match p_over {
            Some(p) => ReferenceEstimate {
                p_over: Some(p),
                hold: Some(0.05),
                method: ReferenceMethod::Interpolated,
                points_used: 2,
            },
            None => ReferenceEstimate::missing(),
        }
    }

    #[test]
    fn test_median_book_with_two_pairs() {
        let selection = resolve_baseline(
            BaselineMethod::MedianBook,
            BaselineFallback::BestSides,
            Some((0.52, 0.48)),
            Some(0.04),
            &summary(2, Some(0.55)),
            &reference(Some(0.5)),
        );
        assert_eq!(selection.used, BaselineUsed::MedianBook);
        assert_eq!(selection.p_over_fair, Some(0.55));
        assert_eq!(selection.reference_method, ReferenceMethod::Exact);
        assert_eq!(selection.used.line_source(), LineSource::ExactPointPairs);
    }

    #[test]
    fn test_single_pair_falls_to_reference_curve() {
        let selection = resolve_baseline(
            BaselineMethod::MedianBook,
            BaselineFallback::BestSides,
            Some((0.52, 0.48)),
            Some(0.04),
            &summary(1, Some(0.55)),
            &reference(Some(0.5)),
        );
        assert_eq!(selection.used, BaselineUsed::MedianBookInterpolated);
        assert_eq!(selection.p_over_fair, Some(0.5));
        assert_eq!(selection.hold, Some(0.05));
    }

    #[test]
    fn test_fallback_to_best_sides() {
        let selection = resolve_baseline(
            BaselineMethod::MedianBook,
            BaselineFallback::BestSides,
            Some((0.52, 0.48)),
            Some(0.04),
            &summary(0, None),
            &reference(None),
        );
        assert_eq!(selection.used, BaselineUsed::BestSidesFallback);
        assert_eq!(selection.p_under_fair, Some(0.48));
        assert_eq!(selection.hold, Some(0.04));
    }

    #[test]
    fn test_no_fallback_is_missing() {
        let selection = resolve_baseline(
            BaselineMethod::MedianBook,
            BaselineFallback::None,
            Some((0.52, 0.48)),
            Some(0.04),
            &summary(0, None),
            &reference(None),
        );
        assert_eq!(selection.used, BaselineUsed::Missing);
        assert!(!selection.is_resolved());
    }

    #[test]
    fn test_best_sides_without_pair_is_missing() {
        let selection = resolve_baseline(
            BaselineMethod::BestSides,
            BaselineFallback::BestSides,
            None,
            None,
            &summary(3, Some(0.55)),
            &reference(Some(0.5)),
        );
        assert_eq!(selection.used, BaselineUsed::Missing);
        assert_eq!(selection.used.line_source(), LineSource::Missing);
    }

    #[test]
    fn test_median_pair_sums_to_one() {
        let selection = resolve_baseline(
            BaselineMethod::MedianBook,
            BaselineFallback::None,
            None,
            None,
            &summary(3, Some(0.5731)),
            &reference(None),
        );
        let total = selection.p_over_fair.unwrap() + selection.p_under_fair.unwrap();
        assert!((total - 1.0).abs() < 1e-12);
    }
}
