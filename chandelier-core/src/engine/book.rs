//! Per-symbol position book.
//!
//! One state machine per open position, keyed by symbol. Updates for the
//! same symbol are serialized by ownership: each machine lives in exactly
//! one map entry and a cycle takes `&mut`. Different symbols share nothing
//! mutable, so batch processing may fan out across a thread pool.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::debug;

use crate::config::StrategyConfig;
use crate::domain::{AccountSnapshot, BarUpdate, Position, Symbol};
use crate::engine::machine::{CycleOutcome, EntrySignal, PositionStateMachine};
use crate::error::EngineError;

/// All open positions for one strategy instance. Callers running several
/// strategies on the same symbol keep one book per strategy instance.
#[derive(Default)]
pub struct PositionBook {
    machines: HashMap<Symbol, PositionStateMachine>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.machines.get(symbol).map(|m| m.position())
    }

    pub fn final_stop(&self, symbol: &str) -> Option<f64> {
        self.machines.get(symbol).and_then(|m| m.final_stop())
    }

    /// Open a position from a validated entry signal. The entry intent is
    /// the single element of the returned outcome.
    pub fn open_position(
        &mut self,
        config: StrategyConfig,
        signal: &EntrySignal,
        bar: &BarUpdate,
        account: &AccountSnapshot,
    ) -> Result<CycleOutcome, EngineError> {
        let symbol = config.symbol.clone();
        if self.machines.contains_key(&symbol) {
            return Err(EngineError::AlreadyOpen(symbol));
        }
        let (machine, intent) = PositionStateMachine::open(config, signal, bar, account)?;
        self.machines.insert(symbol, machine);
        Ok(CycleOutcome {
            intents: vec![intent],
            ..CycleOutcome::default()
        })
    }

    /// Seed a position's daily extreme window at session open.
    pub fn seed_daily(&mut self, symbol: &str, extremes: &[f64]) -> Result<(), EngineError> {
        let machine = self
            .machines
            .get_mut(symbol)
            .ok_or_else(|| EngineError::UnknownPosition(symbol.to_string()))?;
        machine.seed_daily(extremes);
        Ok(())
    }

    /// Run one evaluation cycle for the position keyed by the bar's symbol.
    /// A machine that closed during the cycle is dropped from the book.
    pub fn on_bar(
        &mut self,
        bar: &BarUpdate,
        account: Option<&AccountSnapshot>,
    ) -> Result<CycleOutcome, EngineError> {
        let machine = self
            .machines
            .get_mut(&bar.symbol)
            .ok_or_else(|| EngineError::UnknownPosition(bar.symbol.clone()))?;
        let outcome = machine.on_bar(bar, account);
        if outcome.closed {
            self.machines.remove(&bar.symbol);
            debug!(symbol = %bar.symbol, "position removed from book");
        }
        Ok(outcome)
    }

    /// Process one bar per symbol in parallel. Symbols without an open
    /// position are skipped; symbol order in the result is unspecified.
    pub fn on_bar_batch_par(
        &mut self,
        updates: &[(BarUpdate, Option<AccountSnapshot>)],
    ) -> Vec<(Symbol, CycleOutcome)> {
        let by_symbol: HashMap<&str, (&BarUpdate, Option<&AccountSnapshot>)> = updates
            .iter()
            .map(|(bar, account)| (bar.symbol.as_str(), (bar, account.as_ref())))
            .collect();

        let outcomes: Vec<(Symbol, CycleOutcome)> = self
            .machines
            .par_iter_mut()
            .filter_map(|(symbol, machine)| {
                by_symbol
                    .get(symbol.as_str())
                    .map(|(bar, account)| (symbol.clone(), machine.on_bar(bar, *account)))
            })
            .collect();

        for (symbol, outcome) in &outcomes {
            if outcome.closed {
                self.machines.remove(symbol);
            }
        }
        outcomes
    }

    /// Full discretionary exit for one symbol.
    pub fn close_position(
        &mut self,
        symbol: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<CycleOutcome, EngineError> {
        let machine = self
            .machines
            .get_mut(symbol)
            .ok_or_else(|| EngineError::UnknownPosition(symbol.to_string()))?;
        let outcome = machine.close_full(timestamp);
        if outcome.closed {
            self.machines.remove(symbol);
        }
        Ok(outcome)
    }
}
