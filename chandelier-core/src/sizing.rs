//! Position sizing: initial size from the risk budget, pyramid add ladder,
//! and partial profit-taking decisions.
//!
//! Classic risk management: risk a fixed fraction of equity per trade with
//! the stop distance as the denominator. Pyramid adds follow a shrinking
//! ladder and are only approved once the ratcheted stop has absorbed enough
//! of the original risk.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{StopMode, StrategyConfig, TargetMode};
use crate::domain::{Direction, Position};

/// Sizing refusal: no order intent is produced.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SizingError {
    /// Stop distance is zero or the stop sits on the wrong side of entry.
    #[error("invalid stop distance: entry {entry}, stop {stop}")]
    InvalidStopDistance { entry: f64, stop: f64 },
}

/// An approved pyramid add.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AddDecision {
    /// 1-based index of this add.
    pub add_index: u32,
    pub size: f64,
    pub entry_price: f64,
    /// Independent stop carried by the new lot.
    pub lot_stop: f64,
    /// Blended-stop tightening for this step, in ATR multiples.
    pub stop_tighten_atr: f64,
}

/// Which profit-taking rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitTrigger {
    /// Price reached the configured first target.
    FirstTarget,
    /// Unrealized profit retraced from its peak after the first target.
    ProfitRetrace,
}

/// An approved partial exit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitDecision {
    /// Fraction of the current position size to sell.
    pub ratio: f64,
    pub trigger: ExitTrigger,
    /// First partial exits move the remaining lots' stop to cost basis.
    pub move_stop_to_breakeven: bool,
}

/// Sizing rules for one symbol.
#[derive(Debug, Clone)]
pub struct SizingEngine {
    config: StrategyConfig,
}

impl SizingEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Initial position size from the account risk budget and stop distance:
    /// `(account_value x risk_fraction) / |entry - stop|`.
    pub fn initial_size(
        account_value: f64,
        risk_fraction: f64,
        entry_price: f64,
        initial_stop: f64,
        direction: Direction,
    ) -> Result<f64, SizingError> {
        let distance = (entry_price - initial_stop) * direction.sign();
        if distance <= 0.0 {
            return Err(SizingError::InvalidStopDistance {
                entry: entry_price,
                stop: initial_stop,
            });
        }
        Ok(account_value * risk_fraction / distance)
    }

    /// Initial stop price per the configured stop mode. `None` when the mode
    /// needs an ATR the feed did not supply.
    pub fn initial_stop(
        &self,
        entry_price: f64,
        entry_atr: Option<f64>,
        direction: Direction,
    ) -> Option<f64> {
        let sign = direction.sign();
        match self.config.stop.mode {
            StopMode::AtrMultiple { multiplier } => {
                entry_atr.map(|atr| entry_price - sign * multiplier * atr)
            }
            StopMode::Percent { percent } => Some(entry_price * (1.0 - sign * percent)),
            StopMode::Fixed { price } => Some(price),
        }
    }

    /// First profit target per the configured target mode, fixed at entry.
    pub fn first_target(&self, entry_price: f64, entry_atr: f64, direction: Direction) -> f64 {
        let sign = direction.sign();
        match self.config.target {
            TargetMode::AtrMultiple { multiplier } => entry_price + sign * multiplier * entry_atr,
            TargetMode::Percent { percent } => entry_price * (1.0 + sign * percent),
            TargetMode::PrevHigh { level } => level,
        }
    }

    /// Evaluate pyramid-add eligibility. All gates must hold:
    /// a new favorable extreme, risk absorbed below the configured fraction
    /// of initial risk, ladder capacity left, and volatility not elevated.
    pub fn evaluate_add(
        &self,
        position: &Position,
        price: f64,
        atr_current: Option<f64>,
        current_risk: f64,
    ) -> Option<AddDecision> {
        if position.closed || position.add_count >= self.config.max_add_times {
            return None;
        }
        if !position.direction.exceeds(price, position.peak_price) {
            return None;
        }
        if current_risk >= position.initial_risk * self.config.add_risk_ratio {
            debug!(
                symbol = %position.symbol,
                current_risk,
                initial_risk = position.initial_risk,
                "add refused: stop has not tightened enough"
            );
            return None;
        }
        // The volatility gate needs a live ATR; without one the add is refused.
        let atr = atr_current?;
        if atr >= position.initial_atr * self.config.add_max_atr_ratio {
            debug!(symbol = %position.symbol, atr, "add refused: volatility elevated");
            return None;
        }

        let step = position.add_count as usize;
        let size = self.config.add_ladder[step] * position.initial_size;
        let lot_stop = price - position.direction.sign() * self.config.new_lot_stop_atr * atr;
        Some(AddDecision {
            add_index: position.add_count + 1,
            size,
            entry_price: price,
            lot_stop,
            stop_tighten_atr: self.config.add_stop_tighten[step],
        })
    }

    /// Evaluate partial profit-taking.
    ///
    /// The first exit fires once when price reaches the target; repeated
    /// bars at the same target do not fire again because the position's
    /// `partial_exited` flag is set on commit. After the first exit, a
    /// retrace of unrealized profit from its peak beyond the configured
    /// threshold triggers a follow-up reduction.
    pub fn evaluate_partial_exit(
        &self,
        position: &Position,
        price: f64,
        first_target: f64,
        peak_unrealized_pnl: f64,
        current_unrealized_pnl: f64,
    ) -> Option<ExitDecision> {
        if position.closed || position.total_size() <= 0.0 {
            return None;
        }

        if !position.partial_exited {
            let reached = match position.direction {
                Direction::Long => price >= first_target,
                Direction::Short => price <= first_target,
            };
            if reached {
                return Some(ExitDecision {
                    ratio: self.config.first_exit_ratio,
                    trigger: ExitTrigger::FirstTarget,
                    move_stop_to_breakeven: true,
                });
            }
            return None;
        }

        if peak_unrealized_pnl > 0.0 {
            let retrace = (peak_unrealized_pnl - current_unrealized_pnl) / peak_unrealized_pnl;
            if retrace >= self.config.retrace_threshold {
                return Some(ExitDecision {
                    ratio: self.config.retrace_exit_ratio,
                    trigger: ExitTrigger::ProfitRetrace,
                    move_stop_to_breakeven: false,
                });
            }
        }
        None
    }
}
