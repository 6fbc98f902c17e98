//! Chandelier Core: per-position risk management for a trend-following
//! strategy.
//!
//! This crate contains the risk engine only:
//! - Hybrid daily/hourly chandelier trailing stop with gap protection and
//!   a tighten-only ratchet
//! - Risk-budget position sizing, pyramid add ladder, partial profit-taking
//! - A fixed, prioritized risk matrix mapping monitored conditions to
//!   mandatory de-risking actions
//! - One state machine per open position, driven by externally scheduled
//!   bar updates, emitting order intents and risk events as values
//!
//! Market data, indicators, broker connectivity, persistence, and alert
//! delivery are external collaborators. The engine is synchronous and does
//! no I/O: every external datum arrives already resolved on the bar update.

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod risk;
pub mod sizing;
pub mod stops;
