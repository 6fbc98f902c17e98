//! Domain types for the risk engine.

pub mod bar;
pub mod intent;
pub mod position;
pub mod risk_event;

pub use bar::{AccountSnapshot, BarUpdate};
pub use intent::{IntentReason, OrderIntent, OrderKind, OrderSide};
pub use position::{Direction, Lot, PartialExit, Position};
pub use risk_event::{RiskAction, RiskEvent, RiskKind};

/// Symbol type alias
pub type Symbol = String;
