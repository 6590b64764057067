//! Volume Flow Imbalance (VFI).
//!
//! Each candle's volume is split into buy and sell parts: 75/25 for a bullish
//! candle, 25/75 for a bearish one. A doji falls back to close vs previous
//! close (60/40, 40/60, or an even split). The value is
//! `(Σbuy - Σsell) / (Σbuy + Σsell)` over the last `lookback` candles, in
//! [-1, 1], and 0 when the window has no volume.
//! Lookback: lookback - 1.

use super::Indicator;
use crate::domain::Candle;

#[derive(Debug, Clone)]
pub struct Vfi {
    lookback: usize,
    name: String,
}

impl Vfi {
    pub fn new(lookback: usize) -> Self {
        assert!(lookback >= 1, "VFI lookback must be >= 1");
        Self {
            lookback,
            name: format!("vfi_{lookback}"),
        }
    }
}

/// Split a candle's volume into (buy, sell).
/// `prev_close` is the previous candle's close, or this candle's open for the first one.
pub fn split_volume(candle: &Candle, prev_close: f64) -> (f64, f64) {
    let v = candle.volume;
    let buy_share = if candle.is_bullish() {
        0.75
    } else if candle.is_bearish() {
        0.25
    } else if candle.close > prev_close {
        0.6
    } else if candle.close < prev_close {
        0.4
    } else {
        0.5
    };
    (v * buy_share, v * (1.0 - buy_share))
}

impl Indicator for Vfi {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.lookback - 1
    }

    fn compute(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        let n = candles.len();
        let mut result = vec![None; n];

        let splits: Vec<(f64, f64)> = candles
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let prev_close = if i == 0 { c.open } else { candles[i - 1].close };
                split_volume(c, prev_close)
            })
            .collect();

        for i in self.lookback()..n {
            let window = &splits[(i + 1 - self.lookback)..=i];
            let (buy, sell) = window
                .iter()
                .fold((0.0, 0.0), |(b, s), (wb, ws)| (b + wb, s + ws));
            if buy.is_nan() || sell.is_nan() {
                continue;
            }
            let total = buy + sell;
            result[i] = Some(if total > 0.0 { (buy - sell) / total } else { 0.0 });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, candle_at, DEFAULT_EPSILON};

    #[test]
    fn split_by_candle_color() {
        let bull = candle_at(0, 100.0, 102.0, 99.0, 101.0, 100.0);
        let bear = candle_at(0, 101.0, 102.0, 99.0, 100.0, 100.0);
        assert_eq!(split_volume(&bull, 100.0), (75.0, 25.0));
        assert_eq!(split_volume(&bear, 100.0), (25.0, 75.0));
    }

    #[test]
    fn split_doji_uses_previous_close() {
        let doji = candle_at(0, 100.0, 101.0, 99.0, 100.0, 100.0);
        assert_eq!(split_volume(&doji, 99.0), (60.0, 40.0));
        assert_eq!(split_volume(&doji, 101.0), (40.0, 60.0));
        assert_eq!(split_volume(&doji, 100.0), (50.0, 50.0));
    }

    #[test]
    fn vfi_window_of_two() {
        // bull (75/25) then bear (25/75), volumes 100 and 300
        // buy = 75 + 75 = 150, sell = 25 + 225 = 250 → (150-250)/400 = -0.25
        let candles = vec![
            candle_at(0, 100.0, 102.0, 99.0, 101.0, 100.0),
            candle_at(1, 101.0, 102.0, 99.0, 100.0, 300.0),
        ];
        let result = Vfi::new(2).compute(&candles);
        assert!(result[0].is_none());
        assert_approx(result[1].unwrap(), -0.25, DEFAULT_EPSILON);
    }

    #[test]
    fn vfi_zero_volume_is_zero() {
        let candles = vec![
            candle_at(0, 100.0, 102.0, 99.0, 101.0, 0.0),
            candle_at(1, 101.0, 102.0, 99.0, 100.0, 0.0),
        ];
        assert_eq!(Vfi::new(2).compute(&candles)[1], Some(0.0));
    }

    #[test]
    fn vfi_bounded() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| candle_at(i, 100.0, 102.0, 99.0, 101.0, 10.0 + i as f64))
            .collect();
        for v in Vfi::new(10).compute(&candles).into_iter().flatten() {
            assert!((-1.0..=1.0).contains(&v));
        }
    }
}
