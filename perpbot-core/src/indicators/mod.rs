//! Indicator implementations and the per-bar snapshot series.
//!
//! Indicators are pure functions: closed-candle history in, one value per
//! candle out. The first `lookback()` values are `None` (warm-up).
//!
//! # Look-ahead contamination guard
//! No indicator value at bar t may depend on data from bar t+1 or later.
//! Every indicator must pass the truncated-vs-full series test.

pub mod atr;
pub mod cvd;
pub mod fvg;
pub mod ma;
pub mod set;
pub mod snapshot;
pub mod tva;
pub mod vfi;

pub use atr::Atr;
pub use cvd::Cvd;
pub use fvg::{Fvg, FvgValue};
pub use set::{
    AtrSettings, CvdSettings, FvgSettings, IndicatorConfigError, IndicatorSet, IndicatorSettings,
    TvaSettings, VfiSettings,
};
pub use snapshot::{IndicatorSnapshot, SnapshotSeries};
pub use tva::{Tva, TvaValue};
pub use vfi::Vfi;

use crate::domain::Candle;

/// Trait for indicators.
///
/// `compute` returns a series of the same length as `candles`; entries that
/// are still warming up (or whose inputs were void) are `None`.
pub trait Indicator: Send + Sync {
    type Output: Copy;

    /// Human-readable name (e.g., "atr_14", "vfi_50").
    fn name(&self) -> &str;

    /// Number of leading candles that produce no value.
    fn lookback(&self) -> usize;

    /// Compute the indicator for the entire candle series.
    fn compute(&self, candles: &[Candle]) -> Vec<Option<Self::Output>>;
}

/// Convert a NaN-padded series into an `Option` series.
pub(crate) fn nan_to_none(values: Vec<f64>) -> Vec<Option<f64>> {
    values
        .into_iter()
        .map(|v| if v.is_nan() { None } else { Some(v) })
        .collect()
}

/// Create synthetic candles from close prices for testing.
///
/// Generates plausible OHLCV: open = prev_close (or close for first candle),
/// high = max(open,close) + 1.0, low = min(open,close) - 1.0, volume = 1000.
#[cfg(test)]
pub fn make_candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            candle_at(i, open, open.max(close) + 1.0, open.min(close) - 1.0, close, 1000.0)
        })
        .collect()
}

/// Build one closed candle at minute offset `i`.
#[cfg(test)]
pub fn candle_at(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
    use chrono::TimeZone;
    let base = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    Candle {
        start_time: base + chrono::Duration::minutes(i as i64),
        open,
        high,
        low,
        close,
        volume,
        is_closed: true,
    }
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
