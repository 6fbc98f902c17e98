//! Order intents: the engine's only output toward the order gateway.
//!
//! The engine never places or fills orders. Each evaluation cycle produces an
//! ordered, possibly empty sequence of intents; translation into broker
//! orders is the gateway's concern.

use serde::{Deserialize, Serialize};

/// Buy or sell, from the gateway's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// How the intent should be worked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Execute at market.
    Market,
    /// Work at the given limit price.
    Limit { limit_price: f64 },
}

/// Why the intent was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentReason {
    InitialEntry,
    PyramidAdd,
    PartialExit,
    StopExit,
    RiskReduce,
}

/// One output unit toward the gateway: symbol, side, quantity, order style,
/// and the reason the engine produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub kind: OrderKind,
    pub reason: IntentReason,
    /// Under a liquidity halt, reductions should be worked passively.
    /// The gateway decides what "passive" means; the engine only marks it.
    pub passive_preferred: bool,
}

impl OrderIntent {
    pub fn market(symbol: &str, side: OrderSide, quantity: f64, reason: IntentReason) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            kind: OrderKind::Market,
            reason,
            passive_preferred: false,
        }
    }

    pub fn limit(
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        limit_price: f64,
        reason: IntentReason,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            kind: OrderKind::Limit { limit_price },
            reason,
            passive_preferred: false,
        }
    }

    pub fn passive(mut self) -> Self {
        self.passive_preferred = true;
        self
    }
}
