//! End-to-end cycles through the position engine: entry sizing, hybrid stop
//! behavior, pyramiding, partial exits with the breakeven move, risk-matrix
//! actions, and the terminal transitions.

use chandelier_core::config::{StopConfig, StrategyConfig, TargetMode};
use chandelier_core::domain::{
    AccountSnapshot, BarUpdate, Direction, IntentReason, OrderKind, OrderSide, RiskAction,
    RiskKind,
};
use chandelier_core::engine::{EntrySignal, PositionBook, PositionStateMachine};
use chandelier_core::error::{Diagnostic, EngineError};
use chandelier_core::stops::{StopCalculator, StopState};
use chrono::{DateTime, TimeZone, Utc};

fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

fn account() -> AccountSnapshot {
    AccountSnapshot {
        account_value: 1_000_000.0,
        overnight_margin_limit: 0.8,
        current_exposure: 0.5,
    }
}

fn long_entry() -> EntrySignal {
    EntrySignal {
        direction: Direction::Long,
        entry_price: 100.0,
        timestamp: ts(4, 1),
    }
}

fn bar(day: u32, hour: u32, close: f64) -> BarUpdate {
    BarUpdate {
        symbol: "300076.SZ".into(),
        timestamp: ts(day, hour),
        open: close,
        high: close,
        low: close - 1.0,
        close,
        volume: 50_000.0,
        atr_daily: Some(2.5),
        atr_hourly: Some(1.0),
        atr_15m: None,
        avg_daily_volume: None,
        order_book_depth: None,
    }
}

/// Default config, with the profit target pushed out of the way so tests can
/// exercise stops and pyramiding without triggering partial exits.
fn config_no_target() -> StrategyConfig {
    let mut config = StrategyConfig::new("300076.SZ");
    config.target = TargetMode::PrevHigh { level: 10_000.0 };
    config
}

#[test]
fn initial_entry_sizing_scenario() {
    // 1,000,000 * 1% risk, entry 100, ATR 2.5, 2x ATR stop -> stop 95,
    // size 10,000 / 5 = 2000.
    let mut book = PositionBook::new();
    let outcome = book
        .open_position(StrategyConfig::new("300076.SZ"), &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();

    assert_eq!(outcome.intents.len(), 1);
    let intent = &outcome.intents[0];
    assert_eq!(intent.reason, IntentReason::InitialEntry);
    assert_eq!(intent.side, OrderSide::Buy);
    assert_eq!(intent.quantity, 2000.0);
    assert_eq!(intent.kind, OrderKind::Limit { limit_price: 100.0 });

    let position = book.position("300076.SZ").unwrap();
    assert_eq!(position.initial_risk, 10_000.0);
    assert_eq!(position.lots[0].stop_price, 95.0);
}

#[test]
fn wrong_side_stop_is_rejected_at_entry() {
    let mut config = StrategyConfig::new("300076.SZ");
    config.stop.mode = chandelier_core::config::StopMode::Fixed { price: 105.0 };
    let mut book = PositionBook::new();
    let err = book
        .open_position(config, &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap_err();
    assert!(matches!(err, EngineError::Sizing(_)));
    assert!(book.is_empty());
}

#[test]
fn missing_entry_atr_is_rejected() {
    let mut entry_bar = bar(4, 1, 100.0);
    entry_bar.atr_daily = None;
    let mut book = PositionBook::new();
    let err = book
        .open_position(StrategyConfig::new("300076.SZ"), &long_entry(), &entry_bar, &account())
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingIndicator("atr_daily")));
}

#[test]
fn hybrid_stop_takes_stricter_branch() {
    // daily_stop 118, hourly_stop 121: the nearer value governs.
    let calc = StopCalculator::new(StopConfig::default());
    let mut state = StopState::new(Direction::Long);
    state.seed_daily(&[124.0], 22);

    let mut b = bar(4, 5, 122.0);
    b.high = 123.0;
    b.atr_daily = Some(2.0);
    b.atr_hourly = Some(1.0);
    let update = calc.update(&mut state, &b, false);

    assert_eq!(update.daily_stop, Some(118.0));
    assert_eq!(update.hourly_stop, Some(121.0));
    assert_eq!(update.final_stop, Some(121.0));
}

#[test]
fn pyramid_add_creates_independent_lot() {
    let mut book = PositionBook::new();
    book.open_position(config_no_target(), &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();

    // New high at 130 with volatility in bounds: the first ladder step adds
    // 30% of the initial size with its own stop.
    let mut b = bar(4, 5, 130.0);
    b.atr_daily = Some(2.8);
    let outcome = book.on_bar(&b, None).unwrap();

    let adds: Vec<_> = outcome
        .intents
        .iter()
        .filter(|i| i.reason == IntentReason::PyramidAdd)
        .collect();
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].quantity, 600.0);
    assert_eq!(adds[0].kind, OrderKind::Limit { limit_price: 130.0 });

    let position = book.position("300076.SZ").unwrap();
    assert!(position.scaled);
    assert_eq!(position.add_count, 1);
    assert_eq!(position.total_size(), 2600.0);
    // Lot stop: 130 - 1.5 * 2.8.
    assert!((position.lots[1].stop_price - 125.8).abs() < 1e-9);

    // The blended stop tightened by the ladder schedule (0.5 ATR).
    let final_stop = book.final_stop("300076.SZ").unwrap();
    assert!((final_stop - 129.4).abs() < 1e-9);
}

#[test]
fn first_partial_exit_moves_stop_to_breakeven() {
    let mut config = StrategyConfig::new("300076.SZ");
    config.max_add_times = 0; // isolate profit-taking from pyramiding
    let mut book = PositionBook::new();
    book.open_position(config, &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();

    // Target is 100 + 3 * 2.5 = 107.5; close at 108 reaches it.
    let outcome = book.on_bar(&bar(4, 5, 108.0), None).unwrap();
    assert_eq!(outcome.intents.len(), 1);
    let exit = &outcome.intents[0];
    assert_eq!(exit.reason, IntentReason::PartialExit);
    assert_eq!(exit.side, OrderSide::Sell);
    assert_eq!(exit.quantity, 1000.0);

    let position = book.position("300076.SZ").unwrap();
    assert!(position.partial_exited);
    assert!(!position.scaled);
    assert_eq!(position.total_size(), 1000.0);
    assert_eq!(position.realized_partial_exits.len(), 1);
    // Remaining lot stop sits at cost basis.
    assert_eq!(position.lots[0].stop_price, 100.0);
}

#[test]
fn first_exit_does_not_refire_on_same_target() {
    let mut config = StrategyConfig::new("300076.SZ");
    config.max_add_times = 0;
    let mut book = PositionBook::new();
    book.open_position(config, &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();
    book.on_bar(&bar(4, 5, 108.0), None).unwrap();

    // Price holds at the target: no second exit, no other intents.
    let outcome = book.on_bar(&bar(4, 6, 108.0), None).unwrap();
    assert!(outcome.intents.is_empty());
    assert_eq!(
        book.position("300076.SZ").unwrap().realized_partial_exits.len(),
        1
    );
}

#[test]
fn profit_retrace_triggers_follow_up_reduction() {
    let mut config = StrategyConfig::new("300076.SZ");
    config.max_add_times = 0;
    let mut book = PositionBook::new();
    book.open_position(config, &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();
    book.on_bar(&bar(4, 5, 108.0), None).unwrap();

    // Profit peaks at 114 while the indicator feed is gapped, so the stop
    // stays where it was instead of trailing the move.
    let mut peak_bar = bar(4, 6, 114.0);
    peak_bar.atr_daily = None;
    peak_bar.atr_hourly = None;
    let outcome = book.on_bar(&peak_bar, None).unwrap();
    assert!(outcome
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::DataGapWarning { .. })));
    assert!(outcome.intents.is_empty());

    // Retrace to 109: (14 - 9) / 14 = 35.7% of peak profit given back.
    let mut retrace_bar = bar(4, 7, 109.0);
    retrace_bar.atr_daily = None;
    retrace_bar.atr_hourly = None;
    let outcome = book.on_bar(&retrace_bar, None).unwrap();
    assert_eq!(outcome.intents.len(), 1);
    assert_eq!(outcome.intents[0].reason, IntentReason::PartialExit);
    assert!((outcome.intents[0].quantity - 300.0).abs() < 1e-9);
    assert_eq!(
        book.position("300076.SZ").unwrap().realized_partial_exits.len(),
        2
    );
}

#[test]
fn stop_breach_flattens_with_stop_exit_reason() {
    let mut config = StrategyConfig::new("300076.SZ");
    config.max_add_times = 0;
    let mut book = PositionBook::new();
    book.open_position(config, &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();
    book.on_bar(&bar(4, 5, 108.0), None).unwrap(); // partial exit, breakeven

    // Price collapses through the stop: one market exit for the remainder,
    // and the position is terminal.
    let outcome = book.on_bar(&bar(4, 6, 99.0), None).unwrap();
    assert!(outcome.closed);
    assert_eq!(outcome.intents.len(), 1);
    let exit = &outcome.intents[0];
    assert_eq!(exit.reason, IntentReason::StopExit);
    assert_eq!(exit.kind, OrderKind::Market);
    assert_eq!(exit.quantity, 1000.0);
    assert_eq!(outcome.events[0].kind, RiskKind::TrendReversal);

    // Removed from the book: further bars are an error for this symbol.
    assert!(book.position("300076.SZ").is_none());
    assert!(matches!(
        book.on_bar(&bar(4, 7, 98.0), None),
        Err(EngineError::UnknownPosition(_))
    ));
}

#[test]
fn liquidity_halt_blocks_adds_and_prefers_passive_exits() {
    let mut book = PositionBook::new();
    book.open_position(StrategyConfig::new("300076.SZ"), &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();

    // Otherwise add-eligible bar, but depth is 4% of average daily volume.
    let mut b = bar(4, 5, 130.0);
    b.atr_daily = Some(2.8);
    b.avg_daily_volume = Some(1_000_000.0);
    b.order_book_depth = Some(40_000.0);
    let outcome = book.on_bar(&b, None).unwrap();

    assert_eq!(outcome.events[0].kind, RiskKind::Liquidity);
    assert_eq!(outcome.events[0].action, RiskAction::HaltAdds);
    assert!(outcome
        .intents
        .iter()
        .all(|i| i.reason != IntentReason::PyramidAdd));
    // The partial exit (130 is past the 107.5 target) is worked passively.
    let exit = outcome
        .intents
        .iter()
        .find(|i| i.reason == IntentReason::PartialExit)
        .unwrap();
    assert!(exit.passive_preferred);
}

#[test]
fn volatility_spike_reduces_half_and_tightens_regime() {
    let mut book = PositionBook::new();
    book.open_position(config_no_target(), &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();

    let mut b = bar(4, 5, 130.0);
    b.atr_daily = Some(2.0);
    b.atr_15m = Some(3.2); // 1.6x daily ATR
    let outcome = book.on_bar(&b, None).unwrap();

    assert_eq!(outcome.events[0].kind, RiskKind::VolatilitySpike);
    assert_eq!(outcome.intents.len(), 1);
    let reduce = &outcome.intents[0];
    assert_eq!(reduce.reason, IntentReason::RiskReduce);
    assert_eq!(reduce.quantity, 1000.0);
    assert!(outcome.stop_snapshot.unwrap().tightened_regime);
    assert_eq!(book.position("300076.SZ").unwrap().total_size(), 1000.0);

    // Volatility normalizes: the regime clears on the next cycle.
    let calm = bar(4, 6, 130.0);
    let outcome = book.on_bar(&calm, None).unwrap();
    assert!(!outcome.stop_snapshot.unwrap().tightened_regime);
}

#[test]
fn overnight_exposure_reduces_thirty_percent() {
    let mut book = PositionBook::new();
    book.open_position(config_no_target(), &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();

    let over = AccountSnapshot {
        account_value: 1_000_000.0,
        overnight_margin_limit: 0.8,
        current_exposure: 0.9,
    };
    let mut b = bar(4, 14, 101.0);
    b.atr_daily = Some(2.5);
    let outcome = book.on_bar(&b, Some(&over)).unwrap();

    assert_eq!(outcome.events[0].kind, RiskKind::Overnight);
    assert_eq!(outcome.intents.len(), 1);
    assert_eq!(outcome.intents[0].reason, IntentReason::RiskReduce);
    assert!((outcome.intents[0].quantity - 600.0).abs() < 1e-9);
}

#[test]
fn flatten_outranks_simultaneous_volatility_spike() {
    let mut book = PositionBook::new();
    book.open_position(config_no_target(), &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();

    let mut b = bar(4, 5, 94.0); // below the 95 initial stop
    b.atr_daily = Some(2.0);
    b.atr_15m = Some(3.75); // would be reduce-50 on its own
    let outcome = book.on_bar(&b, None).unwrap();

    assert!(outcome.closed);
    assert_eq!(outcome.events.len(), 2);
    assert_eq!(outcome.events[0].action, RiskAction::Flatten);
    assert_eq!(outcome.events[1].kind, RiskKind::VolatilitySpike);
    // Exactly one intent: the full flatten. No reduce-50 alongside.
    assert_eq!(outcome.intents.len(), 1);
    assert_eq!(outcome.intents[0].reason, IntentReason::StopExit);
    assert_eq!(outcome.intents[0].quantity, 2000.0);
}

#[test]
fn data_gap_keeps_previous_stop() {
    let mut book = PositionBook::new();
    book.open_position(config_no_target(), &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();
    let before = book.final_stop("300076.SZ");

    let mut b = bar(4, 5, 103.0);
    b.atr_daily = None;
    b.atr_hourly = None;
    let outcome = book.on_bar(&b, None).unwrap();

    assert!(matches!(
        outcome.diagnostics[0],
        Diagnostic::DataGapWarning { .. }
    ));
    assert!(outcome.intents.is_empty());
    assert_eq!(book.final_stop("300076.SZ"), before);
}

#[test]
fn update_on_closed_machine_is_state_inconsistency() {
    let (mut machine, _intent) = PositionStateMachine::open(
        config_no_target(),
        &long_entry(),
        &bar(4, 1, 100.0),
        &account(),
    )
    .unwrap();
    let outcome = machine.close_full(ts(4, 2));
    assert!(outcome.closed);
    assert_eq!(outcome.intents[0].reason, IntentReason::StopExit);

    let outcome = machine.on_bar(&bar(4, 5, 101.0), None);
    assert!(outcome.intents.is_empty());
    assert!(matches!(
        outcome.diagnostics[0],
        Diagnostic::StateInconsistency { .. }
    ));
}

#[test]
fn duplicate_open_is_rejected() {
    let mut book = PositionBook::new();
    book.open_position(config_no_target(), &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();
    let err = book
        .open_position(config_no_target(), &long_entry(), &bar(4, 2, 100.0), &account())
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyOpen(_)));
}

#[test]
fn batch_processes_symbols_independently() {
    let mut book = PositionBook::new();
    for symbol in ["AAPL", "MSFT"] {
        let mut config = config_no_target();
        config.symbol = symbol.to_string();
        let mut entry_bar = bar(4, 1, 100.0);
        entry_bar.symbol = symbol.to_string();
        book.open_position(config, &long_entry(), &entry_bar, &account())
            .unwrap();
    }
    assert_eq!(book.len(), 2);

    // AAPL breaches its stop; MSFT trends on. One closes, one survives.
    let mut aapl = bar(4, 5, 94.0);
    aapl.symbol = "AAPL".into();
    let mut msft = bar(4, 5, 110.0);
    msft.symbol = "MSFT".into();
    let outcomes = book.on_bar_batch_par(&[(aapl, None), (msft, None)]);

    assert_eq!(outcomes.len(), 2);
    let aapl_outcome = outcomes.iter().find(|(s, _)| s == "AAPL").unwrap();
    assert!(aapl_outcome.1.closed);
    let msft_outcome = outcomes.iter().find(|(s, _)| s == "MSFT").unwrap();
    assert!(!msft_outcome.1.closed);

    assert_eq!(book.len(), 1);
    assert!(book.position("MSFT").is_some());
}

#[test]
fn stop_snapshot_carries_config_identity() {
    let mut book = PositionBook::new();
    book.open_position(config_no_target(), &long_entry(), &bar(4, 1, 100.0), &account())
        .unwrap();
    let outcome = book.on_bar(&bar(4, 5, 103.0), None).unwrap();
    let snapshot = outcome.stop_snapshot.unwrap();
    assert_eq!(snapshot.symbol, "300076.SZ");
    assert_eq!(snapshot.config_id, config_no_target().config_id());
    assert!(snapshot.final_stop.is_some());
}
