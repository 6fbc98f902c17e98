//! Risk events: timestamped risk-matrix triggers for the observability stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which matrix row fired. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskKind {
    /// Price crossed the active stop against the position.
    TrendReversal,
    /// Order-book depth collapsed relative to average daily volume.
    Liquidity,
    /// Short-horizon ATR spiked relative to the daily ATR.
    VolatilitySpike,
    /// Price entered the prior-high resistance band.
    Resistance,
    /// Overnight exposure above the margin limit in the last trading hour.
    Overnight,
}

/// Mandatory de-risking action attached to a matrix row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RiskAction {
    /// Close the entire position, all lots, at market.
    Flatten,
    /// Block further pyramid adds; work reductions passively.
    HaltAdds,
    /// Reduce the position by the given fraction of current size.
    Reduce { fraction: f64 },
}

/// One risk-matrix trigger. Every qualifying row is recorded even when a
/// higher-priority row governs the cycle's action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub kind: RiskKind,
    /// The measured value that crossed the threshold (ratio or level,
    /// depending on the row).
    pub metric_value: f64,
    pub action: RiskAction,
    pub timestamp: DateTime<Utc>,
}
