//! Engine-level errors and non-fatal diagnostics.
//!
//! Fatal conditions are typed errors returned to the caller. Conditions the
//! engine can survive (a missing indicator timeframe, a forced close) are
//! reported as [`Diagnostic`] values inside the cycle outcome instead, so a
//! degraded cycle still completes and emits zero or more intents.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::sizing::SizingError;

/// Errors surfaced by the position engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration rejected at load time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Sizing refused; no order intent was produced.
    #[error(transparent)]
    Sizing(#[from] SizingError),

    /// An indicator value required for this operation was not supplied.
    #[error("missing indicator input: {0}")]
    MissingIndicator(&'static str),

    /// A position is already open for this symbol.
    #[error("position already open for {0}")]
    AlreadyOpen(String),

    /// No open position exists for this symbol.
    #[error("no open position for {0}")]
    UnknownPosition(String),
}

/// Non-fatal per-cycle diagnostics, emitted alongside intents and risk events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Diagnostic {
    /// Indicator data was missing for both timeframes; the previous stop was
    /// kept unchanged.
    DataGapWarning { symbol: String, detail: String },

    /// An operation reached a position in a state that cannot accept it.
    /// The position has been force-closed; other positions are unaffected.
    StateInconsistency { symbol: String, detail: String },
}
