//! Property-based tests for the core invariants.
//!
//! 1. Sizing never exceeds the budget and always lands on the quantity grid
//! 2. Confluence is unanimous and fails closed on missing values
//! 3. Trailing stops never loosen
//! 4. Bracket prices straddle the entry on the tick grid

use chrono::{TimeZone, Utc};
use perpbot_core::bracket::{bracket_prices, BracketConfig, TrailingSettings, TrailingState};
use perpbot_core::domain::{Direction, Instrument};
use perpbot_core::indicators::{FvgValue, IndicatorSnapshot, TvaValue};
use perpbot_core::signals::{confluence, ConfluenceFilters, NoSignal};
use perpbot_core::sizing::{PositionSizer, SizingMethod};
use proptest::prelude::*;

fn btc() -> Instrument {
    Instrument::new("BTCUSDT", 0.1, 0.001, 0.001).with_min_notional(5.0)
}

fn on_grid(value: f64, step: f64) -> bool {
    let steps = value / step;
    (steps - steps.round()).abs() < 1e-6
}

fn arb_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Long), Just(Direction::Short)]
}

fn arb_filters() -> impl Strategy<Value = ConfluenceFilters> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(cvd, vfi, tva, fvg)| {
        ConfluenceFilters { cvd, vfi, tva, fvg }
    })
}

prop_compose! {
    fn arb_snapshot()(
        cvd in -10.0..10.0f64,
        vfi in -10.0..10.0f64,
        rb in 0.0..5.0f64,
        rr in 0.0..5.0f64,
        fvg_signal in -1i8..=1,
    ) -> IndicatorSnapshot {
        IndicatorSnapshot {
            bar_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            close: 100_000.0,
            atr: Some(50.0),
            cvd: Some(cvd),
            vfi: Some(vfi),
            tva: Some(TvaValue { rb, rr, db: 0.0, dr: 0.0 }),
            fvg: Some(FvgValue {
                signal: fvg_signal,
                midpoint: None,
                streak: fvg_signal as i32,
            }),
        }
    }
}

// ── 1. Sizing ────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn sized_quantity_fits_budget_and_grid(
        usdt in 5.0..100_000.0f64,
        price in 1_000.0..200_000.0f64,
    ) {
        let sizer = PositionSizer::new(SizingMethod::FixedNotional { usdt });
        if let Ok(qty) = sizer.size(price, &btc()) {
            prop_assert!(qty * price <= usdt * (1.0 + 1e-6));
            prop_assert!(qty >= 0.001 - 1e-12);
            prop_assert!(on_grid(qty, 0.001));
            prop_assert!(qty * price >= 5.0 * (1.0 - 1e-9));
        }
    }

    #[test]
    fn sizing_is_monotone_in_budget(
        usdt in 10.0..50_000.0f64,
        extra in 0.0..50_000.0f64,
        price in 1_000.0..200_000.0f64,
    ) {
        let small = PositionSizer::new(SizingMethod::FixedNotional { usdt }).size(price, &btc());
        let large = PositionSizer::new(SizingMethod::FixedNotional { usdt: usdt + extra })
            .size(price, &btc());
        if let (Ok(a), Ok(b)) = (small, large) {
            prop_assert!(b >= a);
        }
    }
}

// ── 2. Confluence ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn signal_direction_agrees_with_every_enabled_indicator(
        filters in arb_filters(),
        snapshot in arb_snapshot(),
    ) {
        match confluence(filters, &snapshot) {
            Ok(direction) => {
                let sign = direction.sign();
                if filters.cvd {
                    prop_assert!(snapshot.cvd.unwrap() * sign > 0.0);
                }
                if filters.vfi {
                    prop_assert!(snapshot.vfi.unwrap() * sign > 0.0);
                }
                if filters.fvg {
                    prop_assert_eq!(snapshot.fvg.unwrap().signal as f64, sign);
                }
                if filters.tva {
                    let tva = snapshot.tva.unwrap();
                    match direction {
                        Direction::Long => prop_assert!(tva.rb > 0.0),
                        Direction::Short => prop_assert!(tva.rr > 0.0),
                    }
                }
            }
            Err(NoSignal::NoIndicatorsEnabled) => prop_assert!(filters.none_enabled()),
            Err(_) => {}
        }
    }

    #[test]
    fn missing_enabled_value_never_signals(
        snapshot in arb_snapshot(),
        which in 0usize..4,
    ) {
        let filters = ConfluenceFilters { cvd: true, vfi: true, tva: true, fvg: true };
        let mut snapshot = snapshot;
        match which {
            0 => snapshot.cvd = None,
            1 => snapshot.vfi = None,
            2 => snapshot.tva = None,
            _ => snapshot.fvg = None,
        }
        prop_assert!(matches!(confluence(filters, &snapshot), Err(NoSignal::Missing(_))));
    }
}

// ── 3. Trailing ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn trailing_stop_never_loosens(
        direction in arb_direction(),
        atr in 1.0..200.0f64,
        moves in prop::collection::vec(-300.0..300.0f64, 1..60),
    ) {
        let entry = 100_000.0;
        let sign = direction.sign();
        let tp = entry + sign * 4.0 * atr;
        let sl = entry - sign * 2.0 * atr;
        let settings = TrailingSettings { enabled: true, activation_fraction: 0.5, atr_mult: 1.0 };
        let mut trail = TrailingState::new(&settings, direction, entry, tp, sl, atr);

        let mut price = entry;
        let mut previous = trail.current_stop();
        for m in moves {
            price += m;
            if let Some(candidate) = trail.observe(price).candidate {
                trail.commit(candidate);
            }
            let stop = trail.current_stop();
            match direction {
                Direction::Long => prop_assert!(stop >= previous),
                Direction::Short => prop_assert!(stop <= previous),
            }
            previous = stop;
        }
    }
}

// ── 4. Bracket prices ────────────────────────────────────────────────

proptest! {
    #[test]
    fn bracket_prices_straddle_entry_on_tick_grid(
        direction in arb_direction(),
        entry_ticks in 100_000u64..2_000_000,
        atr in 1.0..500.0f64,
    ) {
        let entry = entry_ticks as f64 / 10.0;
        let (tp, sl) = bracket_prices(direction, entry, atr, &BracketConfig::default(), &btc());

        prop_assert!(on_grid(tp, 0.1));
        prop_assert!(on_grid(sl, 0.1));
        match direction {
            Direction::Long => prop_assert!(sl < entry && entry < tp),
            Direction::Short => prop_assert!(tp < entry && entry < sl),
        }
    }
}
