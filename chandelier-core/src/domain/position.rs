//! Positions and lots.
//!
//! A position owns an ordered collection of value-type lots: the initial
//! entry plus one lot per pyramid add. Lots never merge; each keeps its own
//! entry price and stop so a scaled position can be stopped out piecewise.
//! `PARTIAL_EXITED` and `SCALED` are orthogonal flags rather than a single
//! state enum; `closed` is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// The stricter of two stop levels: the one nearer to price.
    /// Higher wins for longs, lower wins for shorts.
    pub fn stricter(self, a: f64, b: f64) -> f64 {
        match self {
            Direction::Long => a.max(b),
            Direction::Short => a.min(b),
        }
    }

    /// The more favorable of two price extremes (higher for longs).
    pub fn favorable(self, a: f64, b: f64) -> f64 {
        match self {
            Direction::Long => a.max(b),
            Direction::Short => a.min(b),
        }
    }

    /// True if `proposed` is a tightening of `current` for this direction.
    pub fn tightens(self, proposed: f64, current: f64) -> bool {
        match self {
            Direction::Long => proposed > current,
            Direction::Short => proposed < current,
        }
    }

    /// True if `price` is strictly beyond `reference` in the favorable
    /// direction (a new high for longs, a new low for shorts).
    pub fn exceeds(self, price: f64, reference: f64) -> bool {
        match self {
            Direction::Long => price > reference,
            Direction::Short => price < reference,
        }
    }
}

/// One size-and-stop unit inside a position: the initial entry (`add_index`
/// 0) or one pyramid add.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    pub size: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub add_index: u32,
    pub entry_time: DateTime<Utc>,
}

/// Record of one executed partial profit-taking exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialExit {
    pub ratio: f64,
    pub price: f64,
    pub time: DateTime<Utc>,
}

/// One open exposure in one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// ATR at entry, the reference for the pyramid volatility gate.
    pub initial_atr: f64,
    /// Monetary risk at entry: size x distance to the initial stop.
    pub initial_risk: f64,
    /// Size of the initial lot, the base for the add ladder.
    pub initial_size: f64,
    pub lots: Vec<Lot>,
    /// Number of pyramid adds executed so far.
    pub add_count: u32,
    pub realized_partial_exits: Vec<PartialExit>,
    /// Most favorable price seen since entry.
    pub peak_price: f64,
    /// Highest unrealized profit seen since entry.
    pub peak_unrealized_pnl: f64,
    pub partial_exited: bool,
    pub scaled: bool,
    pub closed: bool,
}

impl Position {
    /// Open a new position with its initial lot.
    pub fn new(
        symbol: String,
        direction: Direction,
        size: f64,
        entry_price: f64,
        stop_price: f64,
        entry_time: DateTime<Utc>,
        initial_atr: f64,
    ) -> Self {
        let initial_risk = size * (entry_price - stop_price) * direction.sign();
        Self {
            symbol,
            direction,
            entry_price,
            entry_time,
            initial_atr,
            initial_risk,
            initial_size: size,
            lots: vec![Lot {
                size,
                entry_price,
                stop_price,
                add_index: 0,
                entry_time,
            }],
            add_count: 0,
            realized_partial_exits: Vec::new(),
            peak_price: entry_price,
            peak_unrealized_pnl: 0.0,
            partial_exited: false,
            scaled: false,
            closed: false,
        }
    }

    /// Sum of active lot sizes.
    pub fn total_size(&self) -> f64 {
        self.lots.iter().map(|l| l.size).sum()
    }

    /// Size-weighted average entry price of the active lots.
    pub fn cost_basis(&self) -> f64 {
        let total = self.total_size();
        if total <= 0.0 {
            return self.entry_price;
        }
        self.lots
            .iter()
            .map(|l| l.size * l.entry_price)
            .sum::<f64>()
            / total
    }

    /// Unrealized profit at `price`, across all active lots.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.lots
            .iter()
            .map(|l| l.size * (price - l.entry_price) * self.direction.sign())
            .sum()
    }

    /// Monetary risk under the currently active stops: for each lot, the
    /// tighter of the lot's own stop and `final_stop` governs. Negative
    /// values mean the stop has locked in profit on that lot.
    pub fn current_risk(&self, final_stop: Option<f64>) -> f64 {
        self.lots
            .iter()
            .map(|l| {
                let stop = match final_stop {
                    Some(fs) => self.direction.stricter(l.stop_price, fs),
                    None => l.stop_price,
                };
                l.size * (l.entry_price - stop) * self.direction.sign()
            })
            .sum()
    }

    /// Append a pyramid lot. The caller has already validated eligibility.
    pub fn add_lot(&mut self, size: f64, entry_price: f64, stop_price: f64, time: DateTime<Utc>) {
        self.add_count += 1;
        self.lots.push(Lot {
            size,
            entry_price,
            stop_price,
            add_index: self.add_count,
            entry_time: time,
        });
        self.scaled = true;
    }

    /// Trim every lot proportionally by `ratio` of the current total size.
    /// Returns the quantity removed. Lots are never merged or reordered, so
    /// the sum-of-lot-sizes invariant survives arbitrary reductions.
    pub fn reduce(&mut self, ratio: f64) -> f64 {
        let removed = self.total_size() * ratio;
        for lot in &mut self.lots {
            lot.size *= 1.0 - ratio;
        }
        removed
    }

    /// Record a partial profit-taking exit and trim the lots.
    pub fn apply_partial_exit(&mut self, ratio: f64, price: f64, time: DateTime<Utc>) -> f64 {
        let removed = self.reduce(ratio);
        self.realized_partial_exits.push(PartialExit { ratio, price, time });
        self.partial_exited = true;
        removed
    }

    /// Tighten every lot's stop to at least `level` (ratchet direction only).
    pub fn tighten_lot_stops(&mut self, level: f64) {
        for lot in &mut self.lots {
            lot.stop_price = self.direction.stricter(lot.stop_price, level);
        }
    }

    /// Update peak tracking after a committed cycle.
    pub fn record_mark(&mut self, price: f64) {
        self.peak_price = self.direction.favorable(self.peak_price, price);
        let pnl = self.unrealized_pnl(price);
        if pnl > self.peak_unrealized_pnl {
            self.peak_unrealized_pnl = pnl;
        }
    }

    /// Terminal transition: drop all lots. A closed position is immutable.
    pub fn close(&mut self) {
        self.lots.clear();
        self.closed = true;
    }
}
