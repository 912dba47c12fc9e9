//! Line-group aggregation: best prices per side, per-book no-vig pairs, and
//! cross-book median/dispersion summaries.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::odds::{hold, implied_probability, no_vig_pair};
use crate::feed::types::{Quote, QuoteRow, Side};

/// Number of invalid rows echoed into the health report.
const INVALID_EXAMPLES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LineIdentity {
    pub event_id: String,
    pub market: String,
    pub player: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinePoint {
    pub identity: LineIdentity,
    pub point: OrderedFloat<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    A,
    B,
}

/// All quotes sharing one `LinePoint`. `rejected` counts rows that carried
/// this identity but failed side/price/book validation.
#[derive(Debug, Clone)]
pub struct LineGroup {
    pub key: LinePoint,
    pub quotes: Vec<Quote>,
    pub rejected: usize,
}

impl LineGroup {
    pub fn identity(&self) -> &LineIdentity {
        &self.key.identity
    }

    pub fn point(&self) -> f64 {
        self.key.point.into_inner()
    }

    pub fn books(&self) -> BTreeSet<&str> {
        self.quotes.iter().map(|q| q.book.as_str()).collect()
    }

    pub fn tier(&self) -> Tier {
        if self.books().len() >= 2 {
            Tier::A
        } else {
            Tier::B
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidRow {
    pub missing: Vec<&'static str>,
    pub event_id: String,
    pub market: String,
    pub player: String,
    pub book: String,
}

/// Input-row audit surfaced in the health report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowContract {
    pub row_count: usize,
    pub invalid_count: usize,
    pub invalid_examples: Vec<InvalidRow>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupedQuotes {
    pub groups: BTreeMap<LinePoint, LineGroup>,
    pub contract: RowContract,
    /// Rows that could not be assigned to any line group.
    pub ungrouped: usize,
}

/// Group raw rows into line groups, keeping input order inside each group.
pub fn group_quotes(rows: &[QuoteRow]) -> GroupedQuotes {
    let mut grouped = GroupedQuotes::default();
    grouped.contract.row_count = rows.len();

    for row in rows {
        let missing = row.invalid_fields();
        if !missing.is_empty() {
            grouped.contract.invalid_count += 1;
            if grouped.contract.invalid_examples.len() < INVALID_EXAMPLES {
                grouped.contract.invalid_examples.push(InvalidRow {
                    missing: missing.clone(),
                    event_id: row.event_id.clone(),
                    market: row.market.clone(),
                    player: row.player.clone(),
                    book: row.book.clone(),
                });
            }
        }

        let Some(key) = line_point(row) else {
            grouped.ungrouped += 1;
            continue;
        };
        let group = grouped
            .groups
            .entry(key.clone())
            .or_insert_with(|| LineGroup {
                key,
                quotes: Vec::new(),
                rejected: 0,
            });
        match row.to_quote() {
            Some(quote) => group.quotes.push(quote),
            None => group.rejected += 1,
        }
    }
    grouped
}

fn line_point(row: &QuoteRow) -> Option<LinePoint> {
    let point = row.point.filter(|p| p.is_finite())?;
    let field = |s: &str| Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string);
    Some(LinePoint {
        identity: LineIdentity {
            event_id: field(&row.event_id)?,
            market: field(&row.market)?.to_ascii_lowercase(),
            player: field(&row.player)?,
        },
        // -0.0 and 0.0 must land in the same group.
        point: OrderedFloat(point + 0.0),
    })
}

/// Best-priced quote for one side plus line-shopping spread.
#[derive(Debug, Clone, PartialEq)]
pub struct BestQuote {
    pub price: i32,
    pub book: String,
    pub link: String,
    pub last_update: Option<DateTime<Utc>>,
    /// Best minus worst price across books quoting this side.
    pub shop_delta: i32,
}

/// Highest American price for `side`; on ties the first-seen quote stays.
pub fn best_side(quotes: &[Quote], side: Side, excluded: &BTreeSet<String>) -> Option<BestQuote> {
    let mut best: Option<&Quote> = None;
    let mut worst = i32::MAX;
    for quote in quotes
        .iter()
        .filter(|q| q.side == side && !excluded.contains(&q.book))
    {
        worst = worst.min(quote.price);
        if best.map_or(true, |b| quote.price > b.price) {
            best = Some(quote);
        }
    }
    best.map(|q| BestQuote {
        price: q.price,
        book: q.book.clone(),
        link: q.link.clone(),
        last_update: q.last_update,
        shop_delta: q.price - worst,
    })
}

/// Best-sides no-vig pair and hold, when both sides resolve.
pub fn best_sides_pair(
    over: Option<&BestQuote>,
    under: Option<&BestQuote>,
) -> (Option<(f64, f64)>, Option<f64>) {
    let over_implied = over.and_then(|q| implied_probability(q.price));
    let under_implied = under.and_then(|q| implied_probability(q.price));
    (
        no_vig_pair(over_implied, under_implied),
        hold(over_implied, under_implied),
    )
}

/// One book quoting both sides at the same point.
#[derive(Debug, Clone, PartialEq)]
pub struct BookFairPair {
    pub book: String,
    pub over_price: i32,
    pub under_price: i32,
    pub p_over_fair: f64,
    pub p_under_fair: f64,
    pub hold: f64,
}

/// Per-book no-vig pairs, sorted by book. A book quoting a side more than
/// once contributes its best price for that side.
pub fn book_fair_pairs(quotes: &[Quote], excluded: &BTreeSet<String>) -> Vec<BookFairPair> {
    let mut by_book: BTreeMap<&str, (Option<i32>, Option<i32>)> = BTreeMap::new();
    for quote in quotes.iter().filter(|q| !excluded.contains(&q.book)) {
        let entry = by_book.entry(quote.book.as_str()).or_default();
        let slot = match quote.side {
            Side::Over => &mut entry.0,
            Side::Under => &mut entry.1,
        };
        *slot = Some(slot.map_or(quote.price, |p| p.max(quote.price)));
    }

    by_book
        .into_iter()
        .filter_map(|(book, prices)| {
            let (over_price, under_price) = (prices.0?, prices.1?);
            let over_implied = implied_probability(over_price);
            let under_implied = implied_probability(under_price);
            let (p_over_fair, p_under_fair) = no_vig_pair(over_implied, under_implied)?;
            Some(BookFairPair {
                book: book.to_string(),
                over_price,
                under_price,
                p_over_fair,
                p_under_fair,
                hold: hold(over_implied, under_implied)?,
            })
        })
        .collect()
}

/// Cross-book statistics over the per-book fair pairs at one point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairSummary {
    pub books_used: Vec<String>,
    pub book_pair_count: usize,
    pub p_over_median: Option<f64>,
    pub hold_median: Option<f64>,
    pub p_over_iqr: Option<f64>,
    pub p_over_range: Option<f64>,
}

impl PairSummary {
    pub fn from_pairs(pairs: &[BookFairPair]) -> Self {
        let p_over: Vec<f64> = pairs.iter().map(|p| p.p_over_fair).collect();
        let holds: Vec<f64> = pairs.iter().map(|p| p.hold).collect();
        let range = p_over
            .iter()
            .copied()
            .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
            .map(|(lo, hi)| hi - lo);
        Self {
            books_used: pairs.iter().map(|p| p.book.clone()).collect(),
            book_pair_count: pairs.len(),
            p_over_median: median(&p_over),
            hold_median: median(&holds),
            p_over_iqr: iqr(&p_over),
            p_over_range: range,
        }
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(&sorted(values), 0.5)
}

/// Interquartile range with linear interpolation between order statistics.
pub fn iqr(values: &[f64]) -> Option<f64> {
    let ordered = sorted(values);
    Some(quantile(&ordered, 0.75)? - quantile(&ordered, 0.25)?)
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut ordered = values.to_vec();
    ordered.sort_by(f64::total_cmp);
    ordered
}

fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q.clamp(0.0, 1.0) * last as f64;
    let lower = pos.floor() as usize;
    let upper = (lower + 1).min(last);
    let frac = pos - lower as f64;
    Some(sorted[lower] * (1.0 - frac) + sorted[upper] * frac)
}

/// Most recent `last_update` across every quote in the group.
pub fn freshest_update(quotes: &[Quote]) -> Option<DateTime<Utc>> {
    quotes.iter().filter_map(|q| q.last_update).max()
}

/// Minutes elapsed since `ts`, floored at zero.
pub fn age_minutes(now: DateTime<Utc>, ts: DateTime<Utc>) -> f64 {
    ((now - ts).num_milliseconds() as f64 / 60_000.0).max(0.0)
}
