//! Per-identity reference curves (point → fair `p_over`) used to price lines
//! that lack enough exact-point book pairs.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::odds::clamp_probability;
use super::pricing::{book_fair_pairs, median, LineGroup, LineIdentity, LinePoint, PairSummary};

/// Points closer than this are treated as the same line.
const POINT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePoint {
    pub point: f64,
    pub p_over: f64,
    pub hold: Option<f64>,
    /// Number of book pairs behind this point.
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMethod {
    Exact,
    Interpolated,
    Extrapolated,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEstimate {
    pub p_over: Option<f64>,
    pub hold: Option<f64>,
    pub method: ReferenceMethod,
    pub points_used: usize,
}

impl ReferenceEstimate {
    pub fn missing() -> Self {
        Self {
            p_over: None,
            hold: None,
            method: ReferenceMethod::Missing,
            points_used: 0,
        }
    }
}

/// Sorted, monotone curve for one identity: points ascending, `p_over`
/// non-increasing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceCurve {
    points: Vec<ReferencePoint>,
    hold_median: Option<f64>,
}

impl ReferenceCurve {
    /// Merge duplicate points by weight, then force monotonicity with a
    /// weighted pool-adjacent-violators pass.
    pub fn build(raw: Vec<ReferencePoint>) -> Self {
        let mut merged: Vec<ReferencePoint> = Vec::new();
        let mut sorted = raw;
        sorted.sort_by(|a, b| a.point.total_cmp(&b.point));

        // (p·w, hold·w, hold weight) accumulators, parallel to `merged`.
        let mut sums: Vec<(f64, f64, f64)> = Vec::new();
        for row in sorted {
            let weight = row.weight.max(1e-9);
            let p = clamp_probability(row.p_over) * weight;
            let (h, hw) = row.hold.map_or((0.0, 0.0), |h| (h * weight, weight));
            match merged.last_mut() {
                Some(last) if (last.point - row.point).abs() < POINT_EPSILON => {
                    last.weight += weight;
                    if let Some(acc) = sums.last_mut() {
                        acc.0 += p;
                        acc.1 += h;
                        acc.2 += hw;
                    }
                }
                _ => {
                    merged.push(ReferencePoint {
                        point: row.point,
                        p_over: 0.0,
                        hold: None,
                        weight,
                    });
                    sums.push((p, h, hw));
                }
            }
        }
        for (point, (p, h, hw)) in merged.iter_mut().zip(&sums) {
            point.p_over = p / point.weight;
            point.hold = (*hw > 0.0).then(|| h / hw);
        }

        let values: Vec<f64> = merged.iter().map(|p| p.p_over).collect();
        let weights: Vec<f64> = merged.iter().map(|p| p.weight).collect();
        for (point, fitted) in merged.iter_mut().zip(pav_nonincreasing(&values, &weights)) {
            point.p_over = clamp_probability(fitted);
        }

        let holds: Vec<f64> = merged.iter().filter_map(|p| p.hold).collect();
        Self {
            hold_median: median(&holds),
            points: merged,
        }
    }

    pub fn points(&self) -> &[ReferencePoint] {
        &self.points
    }

    /// Estimate `p_over` and hold at `target`.
    pub fn estimate(&self, target: f64) -> ReferenceEstimate {
        if self.points.is_empty() || !target.is_finite() {
            return ReferenceEstimate::missing();
        }
        let hold_or_median = |p: &ReferencePoint| p.hold.or(self.hold_median);

        if let Some(exact) = self
            .points
            .iter()
            .find(|p| (p.point - target).abs() < POINT_EPSILON)
        {
            return ReferenceEstimate {
                p_over: Some(exact.p_over),
                hold: hold_or_median(exact),
                method: ReferenceMethod::Exact,
                points_used: 1,
            };
        }

        let upper = self.points.partition_point(|p| p.point < target);
        let edge = match upper {
            0 => self.points.first(),
            n if n == self.points.len() => self.points.last(),
            _ => None,
        };
        if let Some(edge) = edge {
            return ReferenceEstimate {
                p_over: Some(edge.p_over),
                hold: hold_or_median(edge),
                method: ReferenceMethod::Extrapolated,
                points_used: 1,
            };
        }

        let (left, right) = (&self.points[upper - 1], &self.points[upper]);
        let ratio = (target - left.point) / (right.point - left.point);
        let lerp = |a: f64, b: f64| a + (b - a) * ratio;
        let hold = match (left.hold, right.hold) {
            (Some(a), Some(b)) => Some(lerp(a, b)),
            _ => self.hold_median,
        };
        ReferenceEstimate {
            p_over: Some(clamp_probability(lerp(left.p_over, right.p_over))),
            hold,
            method: ReferenceMethod::Interpolated,
            points_used: 2,
        }
    }
}

/// Weighted isotonic fit with each value ≥ its right neighbour.
fn pav_nonincreasing(values: &[f64], weights: &[f64]) -> Vec<f64> {
    // (value, weight, count of original positions)
    let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(values.len());
    for (&value, &weight) in values.iter().zip(weights) {
        blocks.push((value, weight.max(1e-9), 1));
        while blocks.len() >= 2 {
            let n = blocks.len();
            let (right, left) = (blocks[n - 1], blocks[n - 2]);
            if left.0 >= right.0 {
                break;
            }
            let weight = left.1 + right.1;
            let mean = (left.0 * left.1 + right.0 * right.1) / weight;
            blocks[n - 2] = (mean, weight, left.2 + right.2);
            blocks.pop();
        }
    }
    blocks
        .into_iter()
        .flat_map(|(value, _, count)| std::iter::repeat(value).take(count))
        .collect()
}

/// A built curve plus the books that fed it.
#[derive(Debug, Clone, Default)]
pub struct CurveEntry {
    pub curve: ReferenceCurve,
    pub books: BTreeSet<String>,
}

/// Lazily built reference curves, one per (identity, excluded books).
pub struct ReferenceIndex<'a> {
    by_identity: BTreeMap<&'a LineIdentity, Vec<&'a LineGroup>>,
    cache: BTreeMap<(LineIdentity, BTreeSet<String>), CurveEntry>,
}

impl<'a> ReferenceIndex<'a> {
    pub fn new(groups: &'a BTreeMap<LinePoint, LineGroup>) -> Self {
        let mut by_identity: BTreeMap<&'a LineIdentity, Vec<&'a LineGroup>> = BTreeMap::new();
        for group in groups.values() {
            by_identity.entry(group.identity()).or_default().push(group);
        }
        Self {
            by_identity,
            cache: BTreeMap::new(),
        }
    }

    pub fn curve(&mut self, identity: &LineIdentity, excluded: &BTreeSet<String>) -> &CurveEntry {
        let by_identity = &self.by_identity;
        self.cache
            .entry((identity.clone(), excluded.clone()))
            .or_insert_with(|| {
                let groups = by_identity.get(identity).map(Vec::as_slice).unwrap_or(&[]);
                build_entry(groups, excluded)
            })
    }

    pub fn cached_curves(&self) -> usize {
        self.cache.len()
    }
}

fn build_entry(groups: &[&LineGroup], excluded: &BTreeSet<String>) -> CurveEntry {
    let mut books = BTreeSet::new();
    let mut raw = Vec::new();
    for group in groups {
        let pairs = book_fair_pairs(&group.quotes, excluded);
        let summary = PairSummary::from_pairs(&pairs);
        let Some(p_over) = summary.p_over_median else {
            continue;
        };
        books.extend(summary.books_used);
        raw.push(ReferencePoint {
            point: group.point(),
            p_over,
            hold: summary.hold_median,
            weight: summary.book_pair_count as f64,
        });
    }
    CurveEntry {
        curve: ReferenceCurve::build(raw),
        books,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(point: f64, p_over: f64) -> ReferencePoint {
        ReferencePoint {
            point,
            p_over,
            hold: Some(0.045),
            weight: 1.0,
        }
    }

    #[test]
    fn test_interpolates_between_brackets() {
        let curve = ReferenceCurve::build(vec![point(24.5, 0.55), point(26.5, 0.45)]);
        let estimate = curve.estimate(25.5);
        assert_eq!(estimate.method, ReferenceMethod::Interpolated);
        assert_eq!(estimate.points_used, 2);
        assert!((estimate.p_over.unwrap() - 0.50).abs() < 1e-12);
        assert!((estimate.hold.unwrap() - 0.045).abs() < 1e-12);
    }

    #[test]
    fn test_exact_point() {
        let curve = ReferenceCurve::build(vec![point(24.5, 0.55), point(26.5, 0.45)]);
        let estimate = curve.estimate(26.5);
        assert_eq!(estimate.method, ReferenceMethod::Exact);
        assert_eq!(estimate.points_used, 1);
        assert_eq!(estimate.p_over, Some(0.45));
    }

    #[test]
    fn test_extrapolates_flat_outside_curve() {
        let curve = ReferenceCurve::build(vec![point(24.5, 0.55), point(26.5, 0.45)]);
        let low = curve.estimate(20.5);
        assert_eq!(low.method, ReferenceMethod::Extrapolated);
        assert_eq!(low.points_used, 1);
        assert_eq!(low.p_over, Some(0.55));

        let high = curve.estimate(30.5);
        assert_eq!(high.method, ReferenceMethod::Extrapolated);
        assert_eq!(high.p_over, Some(0.45));
    }

    #[test]
    fn test_empty_curve_is_missing() {
        let curve = ReferenceCurve::build(Vec::new());
        assert_eq!(curve.estimate(24.5), ReferenceEstimate::missing());
    }

    #[test]
    fn test_pav_repairs_noisy_curve() {
        // 25.5 prices above 24.5: the pair is pooled to its weighted mean.
        // (0.50*1 + 0.56*3) / 4 = 0.545
        let curve = ReferenceCurve::build(vec![
            point(24.5, 0.50),
            ReferencePoint {
                weight: 3.0,
                ..point(25.5, 0.56)
            },
            point(26.5, 0.40),
        ]);
        let probs: Vec<f64> = curve.points().iter().map(|p| p.p_over).collect();
        assert!((probs[0] - 0.545).abs() < 1e-12);
        assert!((probs[1] - 0.545).abs() < 1e-12);
        assert!((probs[2] - 0.40).abs() < 1e-12);
        assert!(probs.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_duplicate_points_merge_by_weight() {
        let curve = ReferenceCurve::build(vec![
            point(24.5, 0.50),
            ReferencePoint {
                weight: 3.0,
                ..point(24.5, 0.60)
            },
        ]);
        assert_eq!(curve.points().len(), 1);
        assert!((curve.points()[0].p_over - 0.575).abs() < 1e-12);
        assert_eq!(curve.points()[0].weight, 4.0);
    }

    #[test]
    fn test_missing_hold_falls_back_to_curve_median() {
        let curve = ReferenceCurve::build(vec![
            ReferencePoint {
                hold: None,
                ..point(24.5, 0.55)
            },
            point(26.5, 0.45),
            ReferencePoint {
                hold: Some(0.065),
                ..point(28.5, 0.35)
            },
        ]);
        let estimate = curve.estimate(25.5);
        assert!((estimate.hold.unwrap() - 0.055).abs() < 1e-12);
    }
}
