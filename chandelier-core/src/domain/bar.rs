//! Bar update: the per-bar snapshot consumed from the indicator feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One bar-close event for a single symbol, with precomputed indicator values.
///
/// ATR and the order-book depth estimate are supplied by the feed, never
/// computed here. Indicator fields are optional: a `None` marks a data gap
/// for that timeframe and the stop calculator degrades to the timeframes
/// that remain valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarUpdate {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// ATR on the daily timeframe.
    pub atr_daily: Option<f64>,
    /// ATR on the hourly timeframe.
    pub atr_hourly: Option<f64>,
    /// ATR on the 15-minute timeframe, used by the volatility-spike check.
    pub atr_15m: Option<f64>,
    /// Average daily volume over the feed's reference window.
    pub avg_daily_volume: Option<f64>,
    /// Order-book depth estimate, in shares, used by the liquidity check.
    pub order_book_depth: Option<f64>,
}

impl BarUpdate {
    /// Basic OHLC sanity check: high >= low, extremes bracket open and close.
    pub fn is_sane(&self) -> bool {
        !(self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan())
            && self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }
}

/// Account state from the margin collaborator, passed in already resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_value: f64,
    pub overnight_margin_limit: f64,
    pub current_exposure: f64,
}
