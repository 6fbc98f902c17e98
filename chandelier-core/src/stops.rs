//! Hybrid daily/hourly chandelier stop.
//!
//! The stop trails the most favorable extreme on two timeframes at once:
//! a rolling window of daily extremes (plus the current session's intraday
//! extreme) offset by a daily ATR multiple, and a rolling window of hourly
//! extremes offset by an hourly ATR multiple. The stricter branch wins, a
//! gap clamp keeps the stop within a fixed fraction of the last close, and
//! a ratchet guarantees the stored stop never moves against the position.

use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::StopConfig;
use crate::domain::{BarUpdate, Direction};

/// Per-position trailing state: extreme windows and the derived stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopState {
    direction: Direction,
    daily_extremes: VecDeque<f64>,
    hourly_extremes: VecDeque<f64>,
    session_date: Option<NaiveDate>,
    intraday_extreme: Option<f64>,
    daily_stop: Option<f64>,
    hourly_stop: Option<f64>,
    final_stop: Option<f64>,
}

impl StopState {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            daily_extremes: VecDeque::new(),
            hourly_extremes: VecDeque::new(),
            session_date: None,
            intraday_extreme: None,
            daily_stop: None,
            hourly_stop: None,
            final_stop: None,
        }
    }

    /// Seed the daily window from prior-session data at session open.
    /// Only the last `lookback` extremes are kept.
    pub fn seed_daily(&mut self, extremes: &[f64], lookback: usize) {
        self.daily_extremes.clear();
        for &x in extremes.iter().rev().take(lookback).rev() {
            self.daily_extremes.push_back(x);
        }
    }

    /// Tighten the ratcheted stop to at least `level`. Used for the initial
    /// stop at entry, the breakeven move after a first partial exit, and the
    /// pyramid ladder's global tightening schedule. A level that would
    /// loosen the stop is ignored.
    pub fn raise_floor(&mut self, level: f64) {
        self.final_stop = Some(match self.final_stop {
            Some(current) => self.direction.stricter(current, level),
            None => level,
        });
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn final_stop(&self) -> Option<f64> {
        self.final_stop
    }

    pub fn daily_stop(&self) -> Option<f64> {
        self.daily_stop
    }

    pub fn hourly_stop(&self) -> Option<f64> {
        self.hourly_stop
    }

    fn roll_session(&mut self, day: NaiveDate, bar_extreme: f64) {
        match self.session_date {
            Some(current) if current == day => {
                let cur = self.intraday_extreme.unwrap_or(bar_extreme);
                self.intraday_extreme = Some(self.direction.favorable(cur, bar_extreme));
            }
            _ => {
                // New session: the finished session's extreme joins the
                // daily window.
                if let Some(prev) = self.intraday_extreme.take() {
                    self.daily_extremes.push_back(prev);
                }
                self.session_date = Some(day);
                self.intraday_extreme = Some(bar_extreme);
            }
        }
    }

    fn window_extreme(&self, window: &VecDeque<f64>) -> Option<f64> {
        window
            .iter()
            .copied()
            .reduce(|a, b| self.direction.favorable(a, b))
    }
}

/// Result of one stop recalculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopUpdate {
    pub daily_stop: Option<f64>,
    pub hourly_stop: Option<f64>,
    pub final_stop: Option<f64>,
    /// True when neither timeframe had valid data and the previous stop was
    /// kept unchanged.
    pub data_gap: bool,
}

/// Per-cycle stop emission for the observability collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub daily_stop: Option<f64>,
    pub hourly_stop: Option<f64>,
    pub final_stop: Option<f64>,
    pub tightened_regime: bool,
    pub config_id: String,
}

/// Computes the chandelier stop from a [`StopState`] and a bar update.
#[derive(Debug, Clone)]
pub struct StopCalculator {
    config: StopConfig,
}

impl StopCalculator {
    pub fn new(config: StopConfig) -> Self {
        Self { config }
    }

    /// Recalculate the stop for one bar.
    ///
    /// Caller cadence: once at session open (after [`StopState::seed_daily`]),
    /// on every hourly bar close, and immediately on a new extreme. With
    /// `tightened` set, both branch multipliers are scaled by the configured
    /// factor (volatility-spike regime).
    ///
    /// Data gaps degrade: a branch with missing ATR or an empty window is
    /// skipped; if both are invalid the previous stop is kept and the update
    /// is flagged.
    pub fn update(&self, state: &mut StopState, bar: &BarUpdate, tightened: bool) -> StopUpdate {
        let direction = state.direction;
        let sign = direction.sign();
        let bar_extreme = match direction {
            Direction::Long => bar.high,
            Direction::Short => bar.low,
        };

        state.roll_session(bar.timestamp.date_naive(), bar_extreme);
        state.hourly_extremes.push_back(bar_extreme);
        while state.hourly_extremes.len() > self.config.hourly_lookback {
            state.hourly_extremes.pop_front();
        }
        while state.daily_extremes.len() > self.config.daily_lookback {
            state.daily_extremes.pop_front();
        }

        let scale = if tightened { self.config.tightened_factor } else { 1.0 };
        let daily_mult = self.config.daily_multiplier * scale;
        let hourly_mult = self.config.hourly_multiplier * scale;

        // Daily branch: rolling window extremes joined with the current
        // session's intraday extreme.
        let daily_ref = match (state.window_extreme(&state.daily_extremes), state.intraday_extreme)
        {
            (Some(w), Some(i)) => Some(direction.favorable(w, i)),
            (Some(w), None) => Some(w),
            (None, i) => i,
        };
        state.daily_stop = match (daily_ref, bar.atr_daily) {
            (Some(reference), Some(atr)) => Some(reference - sign * daily_mult * atr),
            _ => None,
        };

        // Hourly branch: rolling window only.
        state.hourly_stop = match (state.window_extreme(&state.hourly_extremes), bar.atr_hourly) {
            (Some(reference), Some(atr)) => Some(reference - sign * hourly_mult * atr),
            _ => None,
        };

        let candidate = match (state.daily_stop, state.hourly_stop) {
            (Some(d), Some(h)) => Some(direction.stricter(d, h)),
            (Some(d), None) => Some(d),
            (None, Some(h)) => Some(h),
            (None, None) => None,
        };

        let data_gap = match candidate {
            Some(raw) => {
                // Gap clamp: never leave the stop further than the configured
                // fraction away from the last close.
                let clamp = bar.close * (1.0 - sign * self.config.gap_protection_pct);
                let clamped = direction.stricter(raw, clamp);
                state.raise_floor(clamped);
                debug!(
                    symbol = %bar.symbol,
                    daily = ?state.daily_stop,
                    hourly = ?state.hourly_stop,
                    final_stop = ?state.final_stop,
                    tightened,
                    "stop recalculated"
                );
                false
            }
            None => {
                warn!(symbol = %bar.symbol, "no valid stop input on either timeframe, keeping previous stop");
                true
            }
        };

        StopUpdate {
            daily_stop: state.daily_stop,
            hourly_stop: state.hourly_stop,
            final_stop: state.final_stop,
            data_gap,
        }
    }
}
