//! Look-ahead contamination tests for every indicator and the indicator set.
//!
//! No indicator value at bar t may depend on candle data from bar t+1 or later.
//!
//! Method: compute on a truncated series (candles 0..150) and the full series
//! (candles 0..300). Bars 0..150 must be identical between both runs.

use chrono::{Duration, TimeZone, Utc};
use perpbot_core::domain::Candle;
use perpbot_core::indicators::*;
use std::fmt::Debug;

/// Deterministic pseudo-random walk with varying volume and occasional gaps.
fn make_test_candles(n: usize) -> Vec<Candle> {
    let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    let mut candles = Vec::with_capacity(n);
    let mut price = 100_000.0;

    for i in 0..n {
        let seed = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let change = ((seed >> 33) % 400) as f64 - 200.0;
        // every 17th bar jumps to open fair value gaps
        let jump = if i % 17 == 0 { 600.0 } else { 0.0 };
        let open = price;
        price = (price + change + jump).max(1_000.0);
        let close = price;
        let wick = ((seed >> 17) % 50) as f64;

        candles.push(Candle {
            start_time: base + Duration::minutes(i as i64),
            open,
            high: open.max(close) + wick,
            low: open.min(close) - wick,
            close,
            volume: 50.0 + ((seed >> 40) % 500) as f64,
            is_closed: true,
        });
    }
    candles
}

fn assert_no_lookahead<I>(indicator: &I, full: &[Candle], truncated_len: usize)
where
    I: Indicator,
    I::Output: PartialEq + Debug,
{
    let truncated = &full[..truncated_len];
    let full_result = indicator.compute(full);
    let truncated_result = indicator.compute(truncated);

    assert_eq!(
        truncated_result.len(),
        truncated_len,
        "{}: truncated result length mismatch",
        indicator.name()
    );
    assert_eq!(
        full_result.len(),
        full.len(),
        "{}: full result length mismatch",
        indicator.name()
    );

    for i in 0..truncated_len {
        assert_eq!(
            truncated_result[i],
            full_result[i],
            "{}: look-ahead at bar {i}",
            indicator.name()
        );
    }

    // something was actually computed
    assert!(
        truncated_result.iter().any(Option::is_some),
        "{}: no values in the truncated run",
        indicator.name()
    );
}

#[test]
fn atr_has_no_lookahead() {
    let candles = make_test_candles(300);
    assert_no_lookahead(&Atr::new(14), &candles, 150);
}

#[test]
fn cvd_has_no_lookahead() {
    let candles = make_test_candles(300);
    assert_no_lookahead(&Cvd::new(25), &candles, 150);
}

#[test]
fn vfi_has_no_lookahead() {
    let candles = make_test_candles(300);
    assert_no_lookahead(&Vfi::new(50), &candles, 150);
}

#[test]
fn tva_has_no_lookahead() {
    let candles = make_test_candles(300);
    assert_no_lookahead(&Tva::new(15, 3), &candles, 150);
}

#[test]
fn fvg_has_no_lookahead() {
    let candles = make_test_candles(300);
    assert_no_lookahead(&Fvg::new(0.0), &candles, 150);
}

#[test]
fn indicator_set_snapshots_have_no_lookahead() {
    let candles = make_test_candles(300);
    let set = IndicatorSet::new(&IndicatorSettings::default()).unwrap();

    let full = set.compute(&candles);
    let truncated = set.compute(&candles[..150]);
    assert_eq!(truncated.len(), 150);
    assert_eq!(&full[..150], truncated.as_slice());
}

#[test]
fn forming_candle_is_ignored() {
    let mut candles = make_test_candles(120);
    let set = IndicatorSet::new(&IndicatorSettings::default()).unwrap();
    let closed = set.compute(&candles);

    let mut forming = candles[119].clone();
    forming.start_time += Duration::minutes(1);
    forming.close += 5_000.0;
    forming.is_closed = false;
    candles.push(forming);

    assert_eq!(set.compute(&candles), closed);
}
