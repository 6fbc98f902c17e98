//! One state machine per open position.
//!
//! Each incoming bar runs a fixed four-step cycle: stop recalculation, risk
//! matrix, pyramid-add evaluation, partial-exit evaluation. Risk actions
//! outrank scale-in and profit-taking, so a position can never add risk in
//! the cycle that flags it for reduction. Decisions are computed against the
//! pre-cycle state and committed together at the end: a cycle either applies
//! fully or not at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::StrategyConfig;
use crate::domain::{
    AccountSnapshot, BarUpdate, Direction, IntentReason, OrderIntent, OrderSide, Position,
    RiskAction, RiskEvent, RiskKind,
};
use crate::error::{Diagnostic, EngineError};
use crate::risk::RiskMonitor;
use crate::sizing::{ExitTrigger, SizingEngine};
use crate::stops::{StopCalculator, StopSnapshot, StopState};

/// A validated entry decision from the caller's signal layer. The engine
/// never decides entries; it only sizes and manages them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EntrySignal {
    pub direction: Direction,
    pub entry_price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Everything one evaluation cycle produced. Intents and events are ordered;
/// both may be empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub intents: Vec<OrderIntent>,
    pub events: Vec<RiskEvent>,
    pub diagnostics: Vec<Diagnostic>,
    pub stop_snapshot: Option<StopSnapshot>,
    /// True when this cycle transitioned the position to CLOSED.
    pub closed: bool,
}

fn entry_side(direction: Direction) -> OrderSide {
    match direction {
        Direction::Long => OrderSide::Buy,
        Direction::Short => OrderSide::Sell,
    }
}

fn exit_side(direction: Direction) -> OrderSide {
    match direction {
        Direction::Long => OrderSide::Sell,
        Direction::Short => OrderSide::Buy,
    }
}

/// Orchestrator for a single open position.
pub struct PositionStateMachine {
    config: StrategyConfig,
    config_id: String,
    calculator: StopCalculator,
    sizing: SizingEngine,
    monitor: RiskMonitor,
    position: Position,
    stop_state: StopState,
    /// First profit target, fixed at entry.
    first_target: f64,
    /// Liquidity regime: pyramid adds blocked while active.
    adds_halted: bool,
    /// Volatility regime: stop multipliers tightened while active.
    vol_tightened: bool,
}

impl PositionStateMachine {
    /// Open a position: validate configuration, place the initial stop per
    /// the configured mode, size from the account risk budget, and emit the
    /// entry intent.
    pub fn open(
        config: StrategyConfig,
        signal: &EntrySignal,
        bar: &BarUpdate,
        account: &AccountSnapshot,
    ) -> Result<(Self, OrderIntent), EngineError> {
        config.validate()?;
        let entry_atr = bar
            .atr_daily
            .ok_or(EngineError::MissingIndicator("atr_daily"))?;

        let sizing = SizingEngine::new(config.clone());
        let initial_stop = sizing
            .initial_stop(signal.entry_price, Some(entry_atr), signal.direction)
            .ok_or(EngineError::MissingIndicator("atr_daily"))?;
        let size = SizingEngine::initial_size(
            account.account_value,
            config.risk_per_trade,
            signal.entry_price,
            initial_stop,
            signal.direction,
        )?;

        let position = Position::new(
            config.symbol.clone(),
            signal.direction,
            size,
            signal.entry_price,
            initial_stop,
            signal.timestamp,
            entry_atr,
        );
        let mut stop_state = StopState::new(signal.direction);
        stop_state.raise_floor(initial_stop);
        let first_target = sizing.first_target(signal.entry_price, entry_atr, signal.direction);

        let intent = OrderIntent::limit(
            &config.symbol,
            entry_side(signal.direction),
            size,
            signal.entry_price,
            IntentReason::InitialEntry,
        );
        info!(
            symbol = %config.symbol,
            direction = ?signal.direction,
            size,
            initial_stop,
            first_target,
            "position opened"
        );

        let config_id = config.config_id();
        Ok((
            Self {
                calculator: StopCalculator::new(config.stop.clone()),
                monitor: RiskMonitor::new(config.risk.clone()),
                sizing,
                config_id,
                config,
                position,
                stop_state,
                first_target,
                adds_halted: false,
                vol_tightened: false,
            },
            intent,
        ))
    }

    /// Seed the daily extreme window from prior-session data. Part of the
    /// session-open initialization, before the first bar of the day.
    pub fn seed_daily(&mut self, extremes: &[f64]) {
        self.stop_state.seed_daily(extremes, self.config.stop.daily_lookback);
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn final_stop(&self) -> Option<f64> {
        self.stop_state.final_stop()
    }

    /// Run one evaluation cycle for an incoming bar.
    pub fn on_bar(&mut self, bar: &BarUpdate, account: Option<&AccountSnapshot>) -> CycleOutcome {
        if self.position.closed {
            // Fatal for this position only; it is already terminal.
            warn!(symbol = %self.position.symbol, "bar received for closed position");
            return CycleOutcome {
                diagnostics: vec![Diagnostic::StateInconsistency {
                    symbol: self.position.symbol.clone(),
                    detail: "update on closed position".into(),
                }],
                ..CycleOutcome::default()
            };
        }

        let mut outcome = CycleOutcome::default();
        let direction = self.position.direction;

        // Step 1: stop recalculation, on a scratch copy so an aborted cycle
        // leaves no trace.
        let mut stop_state = self.stop_state.clone();
        let update = self.calculator.update(&mut stop_state, bar, self.vol_tightened);
        if update.data_gap {
            outcome.diagnostics.push(Diagnostic::DataGapWarning {
                symbol: self.position.symbol.clone(),
                detail: "ATR missing on both timeframes, previous stop kept".into(),
            });
        }

        // Step 2: risk matrix. The first qualifying row governs.
        let events = self.monitor.evaluate(&self.position, bar, account, update.final_stop);
        let governing = events.first().map(|e| e.action);
        let liquidity_hit = events.iter().any(|e| e.kind == RiskKind::Liquidity);
        let vol_hit = events.iter().any(|e| e.kind == RiskKind::VolatilitySpike);
        outcome.events = events;

        if let Some(RiskAction::Flatten) = governing {
            // Stop breach: close every lot at market and stop processing.
            let quantity = self.position.total_size();
            outcome.intents.push(OrderIntent::market(
                &self.position.symbol,
                exit_side(direction),
                quantity,
                IntentReason::StopExit,
            ));
            self.stop_state = stop_state;
            self.position.close();
            outcome.closed = true;
            outcome.stop_snapshot = Some(self.snapshot(bar.timestamp));
            info!(symbol = %self.position.symbol, quantity, "position flattened on stop breach");
            return outcome;
        }

        let pending_reduce = match governing {
            Some(RiskAction::Reduce { fraction }) => Some(fraction),
            _ => None,
        };

        // Step 3: pyramid add. Suppressed under a liquidity halt (current or
        // still-active regime) and whenever this cycle mandates a reduction.
        let suppress_adds = self.adds_halted || liquidity_hit || pending_reduce.is_some();
        let add_decision = if suppress_adds {
            None
        } else {
            let current_risk = self.position.current_risk(update.final_stop);
            self.sizing
                .evaluate_add(&self.position, bar.close, bar.atr_daily, current_risk)
        };

        // Step 4: partial profit-taking, evaluated against pre-cycle state.
        let pnl = self.position.unrealized_pnl(bar.close);
        let exit_decision = self.sizing.evaluate_partial_exit(
            &self.position,
            bar.close,
            self.first_target,
            self.position.peak_unrealized_pnl,
            pnl,
        );

        // Commit: all decisions apply together.
        self.stop_state = stop_state;

        if let Some(fraction) = pending_reduce {
            // A governing reduce implies the liquidity row did not fire (it
            // sits higher in the matrix), so the reduction goes out at market.
            let quantity = self.position.reduce(fraction);
            outcome.intents.push(OrderIntent::market(
                &self.position.symbol,
                exit_side(direction),
                quantity,
                IntentReason::RiskReduce,
            ));
        }

        if let Some(add) = add_decision {
            self.position
                .add_lot(add.size, add.entry_price, add.lot_stop, bar.timestamp);
            // Global ladder tightening of the blended stop.
            if let (Some(final_stop), Some(atr)) = (self.stop_state.final_stop(), bar.atr_daily) {
                self.stop_state
                    .raise_floor(final_stop + direction.sign() * add.stop_tighten_atr * atr);
            }
            outcome.intents.push(OrderIntent::limit(
                &self.position.symbol,
                entry_side(direction),
                add.size,
                add.entry_price,
                IntentReason::PyramidAdd,
            ));
            info!(
                symbol = %self.position.symbol,
                add_index = add.add_index,
                size = add.size,
                "pyramid add approved"
            );
        }

        if let Some(exit) = exit_decision {
            let quantity = self.position.apply_partial_exit(exit.ratio, bar.close, bar.timestamp);
            let mut intent = OrderIntent::limit(
                &self.position.symbol,
                exit_side(direction),
                quantity,
                bar.close,
                IntentReason::PartialExit,
            );
            if liquidity_hit || self.adds_halted {
                intent = intent.passive();
            }
            outcome.intents.push(intent);

            if exit.move_stop_to_breakeven {
                // Unconditional post-condition of the first partial exit.
                let basis = self.position.cost_basis();
                self.position.tighten_lot_stops(basis);
                self.stop_state.raise_floor(basis);
                info!(symbol = %self.position.symbol, basis, "stop moved to breakeven");
            }
            if exit.trigger == ExitTrigger::ProfitRetrace {
                // Re-arm: the next retrace exit needs a fresh profit peak.
                self.position.peak_unrealized_pnl =
                    self.position.unrealized_pnl(bar.close);
            }
        }

        self.adds_halted = liquidity_hit;
        self.vol_tightened = vol_hit;
        self.position.record_mark(bar.close);
        outcome.stop_snapshot = Some(self.snapshot(bar.timestamp));
        outcome
    }

    /// Full discretionary exit: close every lot at market.
    pub fn close_full(&mut self, timestamp: DateTime<Utc>) -> CycleOutcome {
        if self.position.closed {
            return CycleOutcome {
                diagnostics: vec![Diagnostic::StateInconsistency {
                    symbol: self.position.symbol.clone(),
                    detail: "close requested for closed position".into(),
                }],
                ..CycleOutcome::default()
            };
        }
        let quantity = self.position.total_size();
        let intent = OrderIntent::market(
            &self.position.symbol,
            exit_side(self.position.direction),
            quantity,
            IntentReason::StopExit,
        );
        self.position.close();
        CycleOutcome {
            intents: vec![intent],
            closed: true,
            stop_snapshot: Some(self.snapshot(timestamp)),
            ..CycleOutcome::default()
        }
    }

    fn snapshot(&self, timestamp: DateTime<Utc>) -> StopSnapshot {
        StopSnapshot {
            symbol: self.position.symbol.clone(),
            timestamp,
            daily_stop: self.stop_state.daily_stop(),
            hourly_stop: self.stop_state.hourly_stop(),
            final_stop: self.stop_state.final_stop(),
            tightened_regime: self.vol_tightened,
            config_id: self.config_id.clone(),
        }
    }
}
