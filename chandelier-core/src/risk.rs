//! The risk matrix: fixed, prioritized conditions mapped to mandatory
//! de-risking actions.
//!
//! Evaluation is stateless: every qualifying row is recorded as an event, in
//! priority order, and the first row governs the cycle's mandatory action.
//! Threshold comparisons are strict; exact equality does not trigger.

use chrono::Timelike;
use tracing::info;

use crate::config::RiskThresholds;
use crate::domain::{AccountSnapshot, BarUpdate, Direction, Position, RiskAction, RiskEvent, RiskKind};

/// Reduction fractions mandated by the matrix rows.
const VOLATILITY_REDUCE: f64 = 0.5;
const RESISTANCE_REDUCE: f64 = 0.2;
const OVERNIGHT_REDUCE: f64 = 0.3;

/// Evaluates the risk matrix for one position against one bar.
#[derive(Debug, Clone)]
pub struct RiskMonitor {
    thresholds: RiskThresholds,
}

impl RiskMonitor {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    /// Run the matrix. Returns all qualifying rows in priority order; the
    /// caller acts on the first and records the rest.
    pub fn evaluate(
        &self,
        position: &Position,
        bar: &BarUpdate,
        account: Option<&AccountSnapshot>,
        final_stop: Option<f64>,
    ) -> Vec<RiskEvent> {
        let mut events = Vec::new();
        let ts = bar.timestamp;

        // 1. Trend reversal: price crossed the active stop against direction.
        if let Some(stop) = final_stop {
            let breached = match position.direction {
                Direction::Long => bar.close < stop,
                Direction::Short => bar.close > stop,
            };
            if breached {
                events.push(RiskEvent {
                    kind: RiskKind::TrendReversal,
                    metric_value: bar.close,
                    action: RiskAction::Flatten,
                    timestamp: ts,
                });
            }
        }

        // 2. Liquidity: order-book depth collapsed relative to average volume.
        if let (Some(depth), Some(adv)) = (bar.order_book_depth, bar.avg_daily_volume) {
            if adv > 0.0 {
                let ratio = depth / adv;
                if ratio < self.thresholds.liquidity_depth_ratio {
                    events.push(RiskEvent {
                        kind: RiskKind::Liquidity,
                        metric_value: ratio,
                        action: RiskAction::HaltAdds,
                        timestamp: ts,
                    });
                }
            }
        }

        // 3. Volatility spike: 15-minute ATR against daily ATR.
        if let (Some(atr_15m), Some(atr_daily)) = (bar.atr_15m, bar.atr_daily) {
            if atr_daily > 0.0 {
                let ratio = atr_15m / atr_daily;
                if ratio > self.thresholds.volatility_spike_mult {
                    events.push(RiskEvent {
                        kind: RiskKind::VolatilitySpike,
                        metric_value: ratio,
                        action: RiskAction::Reduce { fraction: VOLATILITY_REDUCE },
                        timestamp: ts,
                    });
                }
            }
        }

        // 4. Proximity to prior resistance.
        if let Some(level) = self.thresholds.resistance_level {
            if (bar.close - level).abs() <= level * self.thresholds.resistance_band_pct {
                events.push(RiskEvent {
                    kind: RiskKind::Resistance,
                    metric_value: bar.close / level,
                    action: RiskAction::Reduce { fraction: RESISTANCE_REDUCE },
                    timestamp: ts,
                });
            }
        }

        // 5. Overnight window: exposure check in the last trading hour.
        if ts.hour() >= self.thresholds.overnight_hour {
            if let Some(account) = account {
                if account.current_exposure > account.overnight_margin_limit {
                    events.push(RiskEvent {
                        kind: RiskKind::Overnight,
                        metric_value: account.current_exposure,
                        action: RiskAction::Reduce { fraction: OVERNIGHT_REDUCE },
                        timestamp: ts,
                    });
                }
            }
        }

        if let Some(first) = events.first() {
            info!(
                symbol = %position.symbol,
                governing = ?first.kind,
                recorded = events.len(),
                "risk matrix triggered"
            );
        }
        events
    }
}
