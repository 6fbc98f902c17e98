//! Per-symbol strategy configuration.
//!
//! Loaded once (TOML or built from defaults), validated, then read-only for
//! the whole session. Out-of-range parameters are rejected at load time;
//! nothing in the engine mutates configuration afterwards.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the initial stop is placed at entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopMode {
    /// Entry price minus `multiplier` x entry ATR (mirrored for shorts).
    AtrMultiple { multiplier: f64 },
    /// Fixed percentage below entry (e.g. 0.05 for 5%).
    Percent { percent: f64 },
    /// Absolute price level supplied by the caller's analysis.
    Fixed { price: f64 },
}

/// How the first profit target is derived at entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetMode {
    /// Entry price plus `multiplier` x entry ATR (mirrored for shorts).
    AtrMultiple { multiplier: f64 },
    /// Fixed percentage above entry.
    Percent { percent: f64 },
    /// A prior-high level supplied by the caller's analysis.
    PrevHigh { level: f64 },
}

/// Trailing-stop parameters for the hybrid daily/hourly chandelier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopConfig {
    pub mode: StopMode,
    /// Rolling window of daily extremes.
    pub daily_lookback: usize,
    /// Rolling window of hourly extremes.
    pub hourly_lookback: usize,
    pub daily_multiplier: f64,
    pub hourly_multiplier: f64,
    /// Gap clamp: the applied stop never sits further than this fraction
    /// away from the last close.
    pub gap_protection_pct: f64,
    /// Multiplier scale applied while the volatility-spike regime is active.
    pub tightened_factor: f64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            mode: StopMode::AtrMultiple { multiplier: 2.0 },
            daily_lookback: 22,
            hourly_lookback: 8,
            daily_multiplier: 3.0,
            hourly_multiplier: 2.0,
            gap_protection_pct: 0.02,
            tightened_factor: 0.5,
        }
    }
}

/// Thresholds for the risk matrix rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Liquidity row: depth below this fraction of average daily volume.
    pub liquidity_depth_ratio: f64,
    /// Volatility row: 15-minute ATR above this multiple of daily ATR.
    pub volatility_spike_mult: f64,
    /// Resistance row: prior-high level, when the caller's analysis has one.
    pub resistance_level: Option<f64>,
    /// Half-width of the resistance band as a fraction of the level.
    pub resistance_band_pct: f64,
    /// Overnight row: bar hour (UTC) at or after which the exposure check runs.
    pub overnight_hour: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            liquidity_depth_ratio: 0.05,
            volatility_spike_mult: 1.5,
            resistance_level: None,
            resistance_band_pct: 0.01,
            overnight_hour: 14,
        }
    }
}

/// Immutable per-symbol configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub symbol: String,
    /// Fraction of account value risked per trade.
    pub risk_per_trade: f64,
    /// Fraction of the position sold at the first profit target.
    pub first_exit_ratio: f64,
    /// Profit retrace from peak that triggers the follow-up reduction.
    pub retrace_threshold: f64,
    /// Fraction sold on a profit retrace.
    pub retrace_exit_ratio: f64,
    /// Add sizes as fractions of the initial lot, one entry per step.
    pub add_ladder: Vec<f64>,
    /// Blended-stop tightening per step, in ATR multiples.
    pub add_stop_tighten: Vec<f64>,
    pub max_add_times: u32,
    /// Adds are approved only once current risk has fallen below this
    /// fraction of initial risk.
    pub add_risk_ratio: f64,
    /// Adds are refused when current ATR exceeds this multiple of entry ATR.
    pub add_max_atr_ratio: f64,
    /// New pyramid lots carry a stop this many ATRs from their own entry.
    pub new_lot_stop_atr: f64,
    pub stop: StopConfig,
    pub target: TargetMode,
    pub risk: RiskThresholds,
}

impl StrategyConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            risk_per_trade: 0.01,
            first_exit_ratio: 0.5,
            retrace_threshold: 0.3,
            retrace_exit_ratio: 0.3,
            add_ladder: vec![0.30, 0.15],
            add_stop_tighten: vec![0.5, 1.0],
            max_add_times: 2,
            add_risk_ratio: 0.7,
            add_max_atr_ratio: 1.5,
            new_lot_stop_atr: 1.5,
            stop: StopConfig::default(),
            target: TargetMode::AtrMultiple { multiplier: 3.0 },
            risk: RiskThresholds::default(),
        }
    }

    /// Parse from TOML and validate.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: StrategyConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Content-addressable identity of this configuration.
    ///
    /// Deterministic across runs: two sessions with identical parameters
    /// produce the same id, so the dashboard can group their emissions.
    pub fn config_id(&self) -> String {
        let json = serde_json::to_string(self).expect("StrategyConfig must serialize");
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }

    /// Reject out-of-range parameters. Fatal at load: a symbol with an
    /// invalid configuration never reaches the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        Self::check_fraction("risk_per_trade", self.risk_per_trade)?;
        Self::check_fraction("first_exit_ratio", self.first_exit_ratio)?;
        Self::check_fraction("retrace_threshold", self.retrace_threshold)?;
        Self::check_fraction("retrace_exit_ratio", self.retrace_exit_ratio)?;
        Self::check_fraction("add_risk_ratio", self.add_risk_ratio)?;
        Self::check_fraction("gap_protection_pct", self.stop.gap_protection_pct)?;
        Self::check_positive("daily_multiplier", self.stop.daily_multiplier)?;
        Self::check_positive("hourly_multiplier", self.stop.hourly_multiplier)?;
        Self::check_positive("tightened_factor", self.stop.tightened_factor)?;
        Self::check_positive("add_max_atr_ratio", self.add_max_atr_ratio)?;
        Self::check_positive("new_lot_stop_atr", self.new_lot_stop_atr)?;
        Self::check_positive("volatility_spike_mult", self.risk.volatility_spike_mult)?;
        Self::check_fraction("liquidity_depth_ratio", self.risk.liquidity_depth_ratio)?;
        Self::check_fraction("resistance_band_pct", self.risk.resistance_band_pct)?;
        if self.stop.daily_lookback == 0 {
            return Err(ConfigError::ZeroLookback { field: "daily_lookback" });
        }
        if self.stop.hourly_lookback == 0 {
            return Err(ConfigError::ZeroLookback { field: "hourly_lookback" });
        }
        if self.risk.overnight_hour > 23 {
            return Err(ConfigError::OutOfRange {
                field: "overnight_hour",
                value: self.risk.overnight_hour as f64,
            });
        }
        if (self.add_ladder.len() as u32) < self.max_add_times
            || (self.add_stop_tighten.len() as u32) < self.max_add_times
        {
            return Err(ConfigError::LadderTooShort {
                max_add_times: self.max_add_times,
            });
        }
        for (i, step) in self.add_ladder.iter().enumerate() {
            if !(*step > 0.0 && *step < 1.0) {
                return Err(ConfigError::BadLadderStep { index: i, value: *step });
            }
        }
        match self.stop.mode {
            StopMode::AtrMultiple { multiplier } => {
                Self::check_positive("stop.multiplier", multiplier)?
            }
            StopMode::Percent { percent } => Self::check_fraction("stop.percent", percent)?,
            StopMode::Fixed { price } => Self::check_positive("stop.price", price)?,
        }
        match self.target {
            TargetMode::AtrMultiple { multiplier } => {
                Self::check_positive("target.multiplier", multiplier)?
            }
            TargetMode::Percent { percent } => Self::check_fraction("target.percent", percent)?,
            TargetMode::PrevHigh { level } => Self::check_positive("target.level", level)?,
        }
        Ok(())
    }

    fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
        if value > 0.0 && value.is_finite() {
            Ok(())
        } else {
            Err(ConfigError::OutOfRange { field, value })
        }
    }

    fn check_fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
        if value > 0.0 && value < 1.0 {
            Ok(())
        } else {
            Err(ConfigError::OutOfRange { field, value })
        }
    }
}

/// Configuration rejection reasons.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("{field} must be at least 1")]
    ZeroLookback { field: &'static str },

    #[error("add ladder shorter than max_add_times ({max_add_times})")]
    LadderTooShort { max_add_times: u32 },

    #[error("add ladder step {index} must be in (0, 1), got {value}")]
    BadLadderStep { index: usize, value: f64 },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
