use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub gates: GateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// 0 means "follow `top_n`".
    #[serde(default)]
    pub max_picks: usize,
    #[serde(default = "default_max_per_player")]
    pub max_per_player: usize,
    #[serde(default = "default_max_per_game")]
    pub max_per_game: usize,
    #[serde(default)]
    pub min_ev: f64,
    #[serde(default)]
    pub allow_tier_b: bool,
    #[serde(default = "default_stale_quote_minutes")]
    pub stale_quote_minutes: u32,
    #[serde(default = "default_true")]
    pub require_official_injuries: bool,
    #[serde(default = "default_true")]
    pub require_fresh_context: bool,
    #[serde(default)]
    pub allow_unknown_roster: bool,
    #[serde(default)]
    pub probabilistic_profile: ProbabilisticProfile,
}

fn default_top_n() -> usize { 10 }
fn default_max_per_player() -> usize { 1 }
fn default_max_per_game() -> usize { 2 }
fn default_stale_quote_minutes() -> u32 { 20 }
fn default_true() -> bool { true }

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            max_picks: 0,
            max_per_player: default_max_per_player(),
            max_per_game: default_max_per_game(),
            min_ev: 0.0,
            allow_tier_b: false,
            stale_quote_minutes: default_stale_quote_minutes(),
            require_official_injuries: true,
            require_fresh_context: true,
            allow_unknown_roster: false,
            probabilistic_profile: ProbabilisticProfile::Off,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilisticProfile {
    #[default]
    Off,
    MinutesV1,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMethod {
    BestSides,
    #[default]
    MedianBook,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineFallback {
    #[default]
    BestSides,
    None,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BaselineConfig {
    #[serde(default)]
    pub method: BaselineMethod,
    #[serde(default)]
    pub fallback: BaselineFallback,
    #[serde(default)]
    pub exclude_selected_book: bool,
    /// Minimum independent baseline books a tier-B line needs.
    pub tier_b_min_other_books: Option<usize>,
}

/// Optional soft-gate thresholds. `None` disables the gate.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GateConfig {
    #[serde(default)]
    pub min_book_pairs: usize,
    pub hold_cap: Option<f64>,
    pub p_over_iqr_cap: Option<f64>,
    pub min_quality_score: Option<f64>,
    pub max_uncertainty_band: Option<f64>,
    pub min_ev_low: Option<f64>,
    pub min_prob_confidence: Option<f64>,
    pub max_minutes_band: Option<f64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("min_ev must be finite, got {0}")]
    MinEv(f64),
    #[error("stale_quote_minutes must be greater than 0")]
    StaleQuoteMinutes,
    #[error("tier_b_min_other_books must be greater than 0")]
    TierBMinOtherBooks,
    #[error("{name} must be >= 0, got {value}")]
    Negative { name: &'static str, value: f64 },
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f64 },
    #[error("min_ev_low must be finite, got {0}")]
    MinEvLow(f64),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| "Failed to parse config TOML")?;
        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings that would silently miscompute every candidate.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let s = &self.strategy;
        if !s.min_ev.is_finite() {
            return Err(ConfigError::MinEv(s.min_ev));
        }
        if s.stale_quote_minutes == 0 {
            return Err(ConfigError::StaleQuoteMinutes);
        }
        if self.baseline.tier_b_min_other_books == Some(0) {
            return Err(ConfigError::TierBMinOtherBooks);
        }

        let g = &self.gates;
        let non_negative = [
            ("hold_cap", g.hold_cap),
            ("p_over_iqr_cap", g.p_over_iqr_cap),
            ("max_uncertainty_band", g.max_uncertainty_band),
            ("max_minutes_band", g.max_minutes_band),
        ];
        for (name, value) in non_negative {
            if let Some(value) = value {
                if !(value >= 0.0 && value.is_finite()) {
                    return Err(ConfigError::Negative { name, value });
                }
            }
        }
        let unit = [
            ("min_quality_score", g.min_quality_score),
            ("min_prob_confidence", g.min_prob_confidence),
        ];
        for (name, value) in unit {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    return Err(ConfigError::OutOfUnitRange { name, value });
                }
            }
        }
        if let Some(value) = g.min_ev_low {
            if !value.is_finite() {
                return Err(ConfigError::MinEvLow(value));
            }
        }
        Ok(())
    }
}
