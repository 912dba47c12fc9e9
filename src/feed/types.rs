use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::calibration::{CalibrationLookup, RollingPriors};

/// Normalized internal types used by the engine (source-agnostic).

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Over,
    Under,
}

impl Side {
    /// Accepts `over`/`o`/`under`/`u`, any case, surrounding whitespace ignored.
    pub fn parse(raw: &str) -> Option<Side> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "over" | "o" => Some(Side::Over),
            "under" | "u" => Some(Side::Under),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Over => "over",
            Side::Under => "under",
        }
    }
}

/// One bookmaker's validated offer inside a line group.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub side: Side,
    pub price: i32,
    pub book: String,
    pub link: String,
    pub last_update: Option<DateTime<Utc>>,
}

/// Quote row as it appears in `quotes.jsonl`. Every field is optional on the
/// wire so one bad row never sinks the whole file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteRow {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub player: String,
    #[serde(default)]
    pub point: Option<f64>,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub price: Option<RawPrice>,
    #[serde(default)]
    pub book: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub last_update: Option<String>,
}

/// Prices show up as `-110`, `-110.0`, or `"+150"` depending on the source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPrice {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawPrice {
    /// Parse to an American price. Zero and out-of-range values are rejected.
    pub fn to_price(&self) -> Option<i32> {
        let value = match self {
            RawPrice::Int(v) => *v,
            RawPrice::Float(v) if v.is_finite() && v.fract() == 0.0 => *v as i64,
            RawPrice::Float(_) => return None,
            RawPrice::Text(raw) => {
                let raw = raw.trim();
                raw.strip_prefix('+').unwrap_or(raw).parse::<i64>().ok()?
            }
        };
        if value == 0 || value.unsigned_abs() > 100_000 {
            return None;
        }
        i32::try_from(value).ok()
    }
}

impl QuoteRow {
    /// Fields that would make this row unusable for pricing.
    pub fn invalid_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.event_id.trim().is_empty() {
            missing.push("event_id");
        }
        if self.market.trim().is_empty() {
            missing.push("market");
        }
        if self.player.trim().is_empty() {
            missing.push("player");
        }
        if Side::parse(&self.side).is_none() {
            missing.push("side");
        }
        if self.book.trim().is_empty() {
            missing.push("book");
        }
        if self.price.as_ref().and_then(RawPrice::to_price).is_none() {
            missing.push("price");
        }
        if !self.point.is_some_and(f64::is_finite) {
            missing.push("point");
        }
        missing
    }

    pub fn to_quote(&self) -> Option<Quote> {
        Some(Quote {
            side: Side::parse(&self.side)?,
            price: self.price.as_ref()?.to_price()?,
            book: Some(self.book.trim()).filter(|b| !b.is_empty())?.to_string(),
            link: self.link.clone(),
            last_update: self.last_update.as_deref().and_then(parse_utc),
        })
    }
}

/// Parse an RFC 3339 timestamp (`Z` or offset form) into UTC.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "snake_case")]
pub enum InjuryStatus {
    Available,
    AvailableUnlisted,
    Probable,
    Questionable,
    Doubtful,
    DayToDay,
    Out,
    OutForSeason,
    #[default]
    Unknown,
}

impl From<String> for InjuryStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "available" => InjuryStatus::Available,
            "available_unlisted" => InjuryStatus::AvailableUnlisted,
            "probable" => InjuryStatus::Probable,
            "questionable" => InjuryStatus::Questionable,
            "doubtful" => InjuryStatus::Doubtful,
            "day_to_day" => InjuryStatus::DayToDay,
            "out" => InjuryStatus::Out,
            "out_for_season" => InjuryStatus::OutForSeason,
            _ => InjuryStatus::Unknown,
        }
    }
}

impl InjuryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InjuryStatus::Available => "available",
            InjuryStatus::AvailableUnlisted => "available_unlisted",
            InjuryStatus::Probable => "probable",
            InjuryStatus::Questionable => "questionable",
            InjuryStatus::Doubtful => "doubtful",
            InjuryStatus::DayToDay => "day_to_day",
            InjuryStatus::Out => "out",
            InjuryStatus::OutForSeason => "out_for_season",
            InjuryStatus::Unknown => "unknown",
        }
    }

    pub fn is_ruled_out(self) -> bool {
        matches!(self, InjuryStatus::Out | InjuryStatus::OutForSeason)
    }

    pub fn is_clean(self) -> bool {
        matches!(self, InjuryStatus::Available | InjuryStatus::AvailableUnlisted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "snake_case")]
pub enum RosterStatus {
    Active,
    Rostered,
    Inactive,
    NotOnRoster,
    #[default]
    UnknownRoster,
    UnknownEvent,
}

impl From<String> for RosterStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => RosterStatus::Active,
            "rostered" => RosterStatus::Rostered,
            "inactive" => RosterStatus::Inactive,
            "not_on_roster" => RosterStatus::NotOnRoster,
            "unknown_event" => RosterStatus::UnknownEvent,
            _ => RosterStatus::UnknownRoster,
        }
    }
}

impl RosterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RosterStatus::Active => "active",
            RosterStatus::Rostered => "rostered",
            RosterStatus::Inactive => "inactive",
            RosterStatus::NotOnRoster => "not_on_roster",
            RosterStatus::UnknownRoster => "unknown_roster",
            RosterStatus::UnknownEvent => "unknown_event",
        }
    }

    pub fn is_clean(self) -> bool {
        matches!(self, RosterStatus::Active | RosterStatus::Rostered)
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, RosterStatus::UnknownRoster | RosterStatus::UnknownEvent)
    }

    pub fn is_excluded(self) -> bool {
        matches!(self, RosterStatus::Inactive | RosterStatus::NotOnRoster)
    }
}

/// Unavailable-player tallies for one side of a matchup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    #[serde(default)]
    pub out: u32,
    #[serde(default)]
    pub out_for_season: u32,
    #[serde(default)]
    pub doubtful: u32,
    #[serde(default)]
    pub questionable: u32,
}

impl StatusCounts {
    pub fn ruled_out(&self) -> u32 {
        self.out + self.out_for_season
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventContext {
    #[serde(default)]
    pub home_team: String,
    #[serde(default)]
    pub away_team: String,
    #[serde(default)]
    pub commence_time: Option<String>,
    #[serde(default)]
    pub spread_abs: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
}

impl EventContext {
    pub fn has_teams(&self) -> bool {
        !self.home_team.trim().is_empty() && !self.away_team.trim().is_empty()
    }
}

/// Per-player context for one event. `injury_status` is `None` when the
/// player does not appear on any injury report.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerContext {
    pub event_id: String,
    pub player: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub injury_status: Option<InjuryStatus>,
    #[serde(default)]
    pub roster_status: RosterStatus,
    #[serde(default)]
    pub teammates_unavailable: StatusCounts,
    #[serde(default)]
    pub opponents_unavailable: StatusCounts,
}

/// External minutes forecast for one (event, player, market).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MinutesForecast {
    pub event_id: String,
    pub player: String,
    pub market: String,
    #[serde(default)]
    pub minutes_p10: Option<f64>,
    #[serde(default)]
    pub minutes_p50: Option<f64>,
    #[serde(default)]
    pub minutes_p90: Option<f64>,
    #[serde(default)]
    pub p_active: Option<f64>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub data_quality_flags: String,
}

impl MinutesForecast {
    /// `p10 ≤ p50 ≤ p90` wherever the quantiles are present.
    pub fn is_consistent(&self) -> bool {
        let ordered = |lo: Option<f64>, hi: Option<f64>| match (lo, hi) {
            (Some(lo), Some(hi)) => lo <= hi,
            _ => true,
        };
        ordered(self.minutes_p10, self.minutes_p50)
            && ordered(self.minutes_p50, self.minutes_p90)
            && ordered(self.minutes_p10, self.minutes_p90)
    }

    pub fn minutes_band(&self) -> Option<f64> {
        match (self.minutes_p10, self.minutes_p90) {
            (Some(p10), Some(p90)) if p90 >= p10 => Some(p90 - p10),
            _ => None,
        }
    }
}

/// Snapshot-wide source freshness flags computed by the context cache.
/// Absent flags assume the worst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    #[serde(default)]
    pub official_injuries_ready: bool,
    #[serde(default = "default_true")]
    pub injuries_stale: bool,
    #[serde(default = "default_true")]
    pub roster_stale: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self {
            official_injuries_ready: false,
            injuries_stale: true,
            roster_stale: true,
        }
    }
}

/// `context.json`: everything about the slate except the quotes themselves.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotContext {
    pub snapshot_id: String,
    pub now_utc: DateTime<Utc>,
    #[serde(default)]
    pub events: BTreeMap<String, EventContext>,
    #[serde(default)]
    pub players: Vec<PlayerContext>,
    #[serde(default)]
    pub health: SourceHealth,
}

/// Immutable input to one engine run.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub now_utc: DateTime<Utc>,
    pub quotes: Vec<QuoteRow>,
    pub events: BTreeMap<String, EventContext>,
    pub players: Vec<PlayerContext>,
    pub health: SourceHealth,
    pub minutes: Vec<MinutesForecast>,
    pub priors: RollingPriors,
    pub calibration: CalibrationLookup,
    /// Lines of the quote file that were not valid JSON.
    pub malformed_quote_lines: usize,
}

impl Snapshot {
    pub fn new(context: SnapshotContext, quotes: Vec<QuoteRow>) -> Self {
        Self {
            snapshot_id: context.snapshot_id,
            now_utc: context.now_utc,
            quotes,
            events: context.events,
            players: context.players,
            health: context.health,
            minutes: Vec::new(),
            priors: RollingPriors::default(),
            calibration: CalibrationLookup::default(),
            malformed_quote_lines: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parse_aliases() {
        assert_eq!(Side::parse(" O "), Some(Side::Over));
        assert_eq!(Side::parse("UNDER"), Some(Side::Under));
        assert_eq!(Side::parse("u"), Some(Side::Under));
        assert_eq!(Side::parse("push"), None);
    }

    #[test]
    fn test_raw_price_forms() {
        assert_eq!(RawPrice::Int(-110).to_price(), Some(-110));
        assert_eq!(RawPrice::Float(120.0).to_price(), Some(120));
        assert_eq!(RawPrice::Float(120.5).to_price(), None);
        assert_eq!(RawPrice::Text("+150".into()).to_price(), Some(150));
        assert_eq!(RawPrice::Text("even".into()).to_price(), None);
        assert_eq!(RawPrice::Int(0).to_price(), None);
    }

    #[test]
    fn test_quote_row_from_json() {
        let row: QuoteRow = serde_json::from_str(
            r#"{"event_id":"e1","market":"player_points","player":"A","point":24.5,
                "side":"Over","price":"+105","book":"fd","last_update":"2026-01-10T18:00:00Z"}"#,
        )
        .unwrap();
        assert!(row.invalid_fields().is_empty());
        let quote = row.to_quote().unwrap();
        assert_eq!(quote.side, Side::Over);
        assert_eq!(quote.price, 105);
        assert!(quote.last_update.is_some());
    }

    #[test]
    fn test_quote_row_invalid_fields() {
        let row: QuoteRow =
            serde_json::from_str(r#"{"event_id":"e1","side":"sideways","price":0}"#).unwrap();
        assert_eq!(
            row.invalid_fields(),
            vec!["market", "player", "side", "book", "price", "point"]
        );
        assert!(row.to_quote().is_none());
    }

    #[test]
    fn test_status_parsing_is_lenient() {
        let status: InjuryStatus = serde_json::from_str(r#""Out For Season""#).unwrap();
        assert_eq!(status, InjuryStatus::OutForSeason);
        let status: InjuryStatus = serde_json::from_str(r#""suspended""#).unwrap();
        assert_eq!(status, InjuryStatus::Unknown);
        let roster: RosterStatus = serde_json::from_str(r#""rostered""#).unwrap();
        assert!(roster.is_clean());
    }

    #[test]
    fn test_minutes_forecast_consistency() {
        let mut forecast = MinutesForecast {
            minutes_p10: Some(28.0),
            minutes_p50: Some(32.0),
            minutes_p90: Some(36.0),
            ..Default::default()
        };
        assert!(forecast.is_consistent());
        assert_eq!(forecast.minutes_band(), Some(8.0));
        forecast.minutes_p50 = Some(37.0);
        assert!(!forecast.is_consistent());
    }

    #[test]
    fn test_source_health_defaults_to_stale() {
        let health: SourceHealth = serde_json::from_str("{}").unwrap();
        assert!(!health.official_injuries_ready);
        assert!(health.injuries_stale);
        assert!(health.roster_stale);
    }
}
