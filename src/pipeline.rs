//! One snapshot in, one report out.
//!
//! Per line group: context lookup, adjustment, baseline scenarios (one per
//! side when the selected book is excluded), side selection, bounds, EV,
//! calibration, ranking score and the gate chain. Then the terminal passes
//! (event mapping, health gates), the final sort and portfolio selection.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{Config, ConfigError, ProbabilisticProfile};
use crate::engine::adjust::{adjust, Adjustment, AdjustmentContext, ProbSource};
use crate::engine::baseline::{build_scenario, BaselineScenario, ScenarioSettings};
use crate::engine::calibration::{ranking_score, RankingInputs};
use crate::engine::candidate::{rank_order, Candidate, SideQuote};
use crate::engine::gates::{self, HealthGate};
use crate::engine::odds::{decimal_to_american, ev_and_kelly, play_to};
use crate::engine::portfolio::{resolve_max_picks, ExecutionPlan, PortfolioConstraints};
use crate::engine::pricing::{group_quotes, LineGroup, Tier};
use crate::engine::quality::hit_bounds;
use crate::engine::reference::ReferenceIndex;
use crate::feed::types::{
    InjuryStatus, MinutesForecast, PlayerContext, RosterStatus, Side, Snapshot,
};
use crate::report::{
    ContractsReport, FeedsReport, HealthReport, OddsHealth, StrategyMode, StrategyReport,
};

pub const TIER_A_TARGET_ROI: f64 = 0.03;
pub const TIER_B_TARGET_ROI: f64 = 0.05;

fn player_key(event_id: &str, player: &str) -> (String, String) {
    (event_id.to_string(), player.trim().to_lowercase())
}

/// Lookups shared by every line group in one run.
struct RunContext<'a> {
    snapshot: &'a Snapshot,
    config: &'a Config,
    players: BTreeMap<(String, String), &'a PlayerContext>,
    minutes: BTreeMap<(String, String, String), &'a MinutesForecast>,
}

impl<'a> RunContext<'a> {
    fn new(snapshot: &'a Snapshot, config: &'a Config) -> Self {
        let players = snapshot
            .players
            .iter()
            .map(|p| (player_key(&p.event_id, &p.player), p))
            .collect();
        let minutes = snapshot
            .minutes
            .iter()
            .map(|f| {
                let (event_id, player) = player_key(&f.event_id, &f.player);
                ((event_id, player, f.market.trim().to_lowercase()), f)
            })
            .collect();
        Self {
            snapshot,
            config,
            players,
            minutes,
        }
    }

    fn adjustment_context(&self, group: &LineGroup) -> AdjustmentContext {
        let identity = group.identity();
        let key = player_key(&identity.event_id, &identity.player);
        let player = self.players.get(&key).copied();
        let event = self.snapshot.events.get(&identity.event_id);

        let roster_status = match (event, player) {
            (None, None) => RosterStatus::UnknownEvent,
            (_, Some(p)) => p.roster_status,
            (Some(_), None) => RosterStatus::UnknownRoster,
        };
        let injury_status = match player.and_then(|p| p.injury_status) {
            Some(status) => status,
            None if self.snapshot.health.official_injuries_ready && roster_status.is_clean() => {
                InjuryStatus::AvailableUnlisted
            }
            None => InjuryStatus::Unknown,
        };
        let forecast = self
            .minutes
            .get(&(key.0, key.1, identity.market.clone()))
            .map(|f| (*f).clone());

        AdjustmentContext {
            injury_status,
            roster_status,
            teammates: player.map(|p| p.teammates_unavailable).unwrap_or_default(),
            opponents: player.map(|p| p.opponents_unavailable).unwrap_or_default(),
            spread_abs: event.and_then(|e| e.spread_abs).map(f64::abs),
            forecast,
        }
    }

    fn pre_bet_readiness(&self, ctx: &AdjustmentContext) -> (bool, String) {
        if !ctx.roster_status.is_clean() {
            return (false, format!("roster_{}", ctx.roster_status.as_str()));
        }
        match ctx.injury_status {
            InjuryStatus::Available | InjuryStatus::AvailableUnlisted | InjuryStatus::Probable => {}
            other => return (false, format!("injury_{}", other.as_str())),
        }
        if self.config.strategy.require_official_injuries
            && !self.snapshot.health.official_injuries_ready
        {
            return (false, "official_injuries_missing".to_string());
        }
        (true, "ready".to_string())
    }
}

/// Model view of one side under one baseline scenario.
struct SideEval<'s> {
    scenario: &'s BaselineScenario,
    p_over_model: Option<f64>,
    p_hit: Option<f64>,
    price: Option<i32>,
    ev: Option<f64>,
}

fn evaluate_side<'s>(
    side: Side,
    scenario: &'s BaselineScenario,
    adjustment: &Adjustment,
    quote: Option<&SideQuote>,
) -> SideEval<'s> {
    let p_over_model = scenario.selection.p_over_fair.map(|p| adjustment.apply(p));
    let p_hit = match side {
        Side::Over => p_over_model,
        Side::Under => p_over_model.map(|p| 1.0 - p),
    };
    let price = quote.map(|q| q.price);
    let (ev, _) = ev_and_kelly(p_hit, price);
    SideEval {
        scenario,
        p_over_model,
        p_hit,
        price,
        ev,
    }
}

/// Higher EV wins, ties go to over, and a priced side beats an unpriced one.
fn pick_side(over: Option<f64>, under: Option<f64>) -> Side {
    match (over, under) {
        (Some(o), Some(u)) if u > o => Side::Under,
        (None, Some(_)) => Side::Under,
        _ => Side::Over,
    }
}

fn price_group(
    run: &RunContext<'_>,
    group: &LineGroup,
    index: &mut ReferenceIndex<'_>,
) -> Candidate {
    let config = run.config;
    let snapshot = run.snapshot;
    let identity = group.identity();
    let tier = group.tier();
    let settings = ScenarioSettings {
        method: config.baseline.method,
        fallback: config.baseline.fallback,
        now: snapshot.now_utc,
        stale_quote_minutes: config.strategy.stale_quote_minutes,
    };

    let ctx = run.adjustment_context(group);
    let mut adjustment = adjust(&identity.market, &ctx, config.strategy.probabilistic_profile);

    let full = build_scenario(group, index, &settings, BTreeSet::new());
    let over_quote = full.best_over.as_ref().map(SideQuote::from);
    let under_quote = full.best_under.as_ref().map(SideQuote::from);

    let exclude = config.baseline.exclude_selected_book;
    let over_scenario = over_quote
        .as_ref()
        .filter(|_| exclude)
        .map(|q| build_scenario(group, index, &settings, BTreeSet::from([q.book.clone()])));
    let under_scenario = under_quote
        .as_ref()
        .filter(|_| exclude)
        .map(|q| build_scenario(group, index, &settings, BTreeSet::from([q.book.clone()])));

    let over = evaluate_side(
        Side::Over,
        over_scenario.as_ref().unwrap_or(&full),
        &adjustment,
        over_quote.as_ref(),
    );
    let under = evaluate_side(
        Side::Under,
        under_scenario.as_ref().unwrap_or(&full),
        &adjustment,
        under_quote.as_ref(),
    );
    let side = pick_side(over.ev, under.ev);
    let (chosen, selected) = match side {
        Side::Over => (&over, over_quote.clone()),
        Side::Under => (&under, under_quote.clone()),
    };
    let scenario = chosen.scenario;

    if config.strategy.probabilistic_profile == ProbabilisticProfile::MinutesV1
        && adjustment.prob_source == ProbSource::MinutesV1Model
        && !scenario.selection.is_resolved()
    {
        adjustment.prob_source = ProbSource::MinutesV1BaselineMissing;
    }

    let p_over_model = chosen.p_over_model;
    let p_under_model = p_over_model.map(|p| 1.0 - p);
    let p_hit = chosen.p_hit;
    let price = chosen.price;
    let band = scenario.quality.uncertainty_band;
    let bounds = p_hit.map(|p| hit_bounds(p, band));
    let ev_at = |p: Option<f64>| ev_and_kelly(p, price).0;
    let (best_ev, best_kelly) = ev_and_kelly(p_hit, price);
    let p_hit_low = bounds.map(|b| b.0);

    let feedback = |p: Option<f64>| {
        p.and_then(|p| snapshot.calibration.feedback(&identity.market, side, p))
    };
    let calibration = feedback(p_hit);
    let p_hit_calibrated = calibration.as_ref().map(|c| c.p_calibrated);
    // The low bound reads its own bucket, falling back to the hit's.
    let p_hit_low_calibrated = feedback(p_hit_low)
        .map(|c| c.p_calibrated)
        .or(p_hit_calibrated);
    let prior = snapshot.priors.prior_for(&identity.market, side);
    let prior_delta = prior.map_or(0.0, |p| p.delta);

    let shop_value = over_quote.as_ref().map_or(0, |q| q.shop_delta)
        + under_quote.as_ref().map_or(0, |q| q.shop_delta);
    let book_count = group.books().len();
    let score = ranking_score(&RankingInputs {
        best_ev,
        book_count,
        shop_value,
        hold: scenario.selection.hold,
        prior_delta,
    });

    let target_roi = match tier {
        Tier::A => TIER_A_TARGET_ROI,
        Tier::B => TIER_B_TARGET_ROI,
    };
    let (play_to_decimal, play_to_american) = play_to(p_hit, target_roi);
    let fair_decimal = p_hit.filter(|p| *p > 0.0).map(|p| 1.0 / p);
    let (pre_bet_ready, pre_bet_reason) = run.pre_bet_readiness(&ctx);
    let event = snapshot.events.get(&identity.event_id);

    let mut candidate = Candidate {
        event_id: identity.event_id.clone(),
        market: identity.market.clone(),
        player: identity.player.clone(),
        point: group.point(),
        tier,
        book_count,
        home_team: event.map(|e| e.home_team.clone()).filter(|t| !t.is_empty()),
        away_team: event.map(|e| e.away_team.clone()).filter(|t| !t.is_empty()),
        side,
        selected,
        over: over_quote,
        under: under_quote,
        shop_value,
        baseline_used: scenario.selection.used,
        line_source: scenario.selection.used.line_source(),
        reference_method: scenario.reference.method,
        reference_points_used: scenario.reference.points_used,
        baseline_books_used: scenario.books_used.iter().cloned().collect(),
        baseline_excluded_books: scenario.excluded_books.iter().cloned().collect(),
        p_over_fair: scenario.selection.p_over_fair,
        p_under_fair: scenario.selection.p_under_fair,
        hold: scenario.selection.hold,
        hold_best: scenario.hold_best,
        quality: scenario.quality.clone(),
        injury_status: ctx.injury_status,
        roster_status: ctx.roster_status,
        context_delta: adjustment.context_delta,
        market_delta: adjustment.market_delta,
        base_delta: adjustment.base_delta,
        minutes_delta: adjustment.minutes_delta,
        projected_minutes: adjustment.projection.projected_minutes,
        usage_delta: adjustment.projection.usage_delta,
        prob_source: adjustment.prob_source,
        minutes_p50: adjustment.forecast.as_ref().and_then(|f| f.minutes_p50),
        minutes_band: adjustment.minutes_band(),
        p_active: adjustment.forecast.as_ref().and_then(|f| f.p_active),
        confidence_score: adjustment.confidence_score(),
        p_over_model,
        p_under_model,
        model_p_hit: p_hit,
        p_hit_low,
        p_hit_high: bounds.map(|b| b.1),
        ev_over: over.ev,
        ev_under: under.ev,
        best_ev,
        best_kelly,
        quarter_kelly: best_kelly.map(|k| k / 4.0),
        ev_low: ev_at(p_hit_low),
        ev_high: ev_at(bounds.map(|b| b.1)),
        ev_calibrated: ev_at(p_hit_calibrated),
        ev_low_calibrated: ev_at(p_hit_low_calibrated),
        calibration,
        p_hit_calibrated,
        p_hit_low_calibrated,
        historical_prior_delta: prior_delta,
        historical_prior_samples: prior.map_or(0, |p| p.sample_size),
        score,
        fair_decimal,
        fair_american: fair_decimal.and_then(decimal_to_american),
        target_roi,
        play_to_decimal,
        play_to_american,
        pre_bet_ready,
        pre_bet_reason,
        eligible: true,
        reason: None,
    };

    let verdict = gates::evaluate(&candidate, config);
    candidate.eligible = verdict.eligible;
    candidate.reason = verdict.reason;
    candidate
}

/// Run the engine over one snapshot.
pub fn build_report(snapshot: &Snapshot, config: &Config) -> Result<StrategyReport, ConfigError> {
    config.validate()?;

    let grouped = group_quotes(&snapshot.quotes);
    tracing::debug!(
        snapshot_id = %snapshot.snapshot_id,
        rows = grouped.contract.row_count,
        invalid = grouped.contract.invalid_count,
        groups = grouped.groups.len(),
        "grouped quotes"
    );

    let run = RunContext::new(snapshot, config);
    let mut index = ReferenceIndex::new(&grouped.groups);
    let candidates: Vec<Candidate> = grouped
        .groups
        .values()
        .map(|group| price_group(&run, group, &mut index))
        .collect();
    tracing::debug!(curves = index.cached_curves(), "reference curves built");

    let missing_event_ids: Vec<String> = candidates
        .iter()
        .map(|c| c.event_id.as_str())
        .filter(|id| !snapshot.events.get(*id).is_some_and(|e| e.has_teams()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect();
    let candidates = gates::apply_event_mapping(candidates, &snapshot.events);

    let odds_health = OddsHealth::from_candidates(
        &candidates,
        snapshot.now_utc,
        config.strategy.stale_quote_minutes,
    );
    let health_gates: Vec<HealthGate> =
        gates::collect_health_gates(config, &snapshot.health, odds_health.stale);
    if !health_gates.is_empty() {
        let names: Vec<&str> = health_gates.iter().map(|g| g.as_str()).collect();
        tracing::warn!(gates = %names.join(","), "health gates active, watchlist only");
    }
    let mut candidates = gates::apply_health_gates(candidates, &health_gates);
    candidates.sort_by(|a, b| b.eligible.cmp(&a.eligible).then_with(|| rank_order(a, b)));

    let strategy = &config.strategy;
    let constraints = PortfolioConstraints {
        max_picks: resolve_max_picks(strategy.max_picks, strategy.top_n),
        max_per_player: strategy.max_per_player,
        max_per_game: strategy.max_per_game,
    };
    let plan = ExecutionPlan::build(
        &snapshot.snapshot_id,
        snapshot.now_utc,
        constraints,
        &candidates,
    );
    let violations = plan.validate();
    if !violations.is_empty() {
        tracing::warn!(violations = ?violations, "execution plan failed contract checks");
    }

    let by_identity: BTreeMap<_, &Candidate> = candidates
        .iter()
        .map(|c| ((c.event_id.as_str(), c.market.as_str(), c.player.as_str(), c.tie_key().2), c))
        .collect();
    let ranked_plays: Vec<Candidate> = plan
        .selected
        .iter()
        .filter_map(|entry| {
            let key = (
                entry.event_id.as_str(),
                entry.market.as_str(),
                entry.player.as_str(),
                ordered_float::OrderedFloat(entry.point),
            );
            by_identity.get(&key).map(|c| (*c).clone())
        })
        .collect();
    let watchlist: Vec<Candidate> = candidates
        .iter()
        .filter(|c| !c.eligible)
        .take(strategy.top_n)
        .cloned()
        .collect();

    let strategy_mode = if health_gates.is_empty() {
        StrategyMode::FullBoard
    } else {
        StrategyMode::WatchlistOnly
    };
    let eligible = candidates.iter().filter(|c| c.eligible).count();
    tracing::info!(
        snapshot_id = %snapshot.snapshot_id,
        candidates = candidates.len(),
        eligible,
        selected = plan.selected.len(),
        mode = strategy_mode.as_str(),
        "strategy run complete"
    );

    let health_report = HealthReport {
        health_gates,
        odds: odds_health,
        contracts: ContractsReport {
            quotes: grouped.contract,
            ungrouped_rows: grouped.ungrouped,
            missing_event_ids,
            plan_violations: violations,
        },
        feeds: FeedsReport::from_snapshot(snapshot),
    };

    Ok(StrategyReport::new(
        snapshot,
        strategy_mode,
        health_report,
        candidates,
        ranked_plays,
        watchlist,
        plan,
    ))
}
