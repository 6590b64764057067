//! Fair Value Gap trend (FVG).
//!
//! Scans each window of three candles (t-2, t-1, t):
//! - bullish gap: `low[t] > high[t-2]` and `close[t-1] > high[t-2]`
//! - bearish gap: `high[t] < low[t-2]` and `close[t-1] < low[t-2]`
//!
//! The gap must be wider than `step_size`, and neither candle t nor t-1 may
//! be a plain opening gap (`low > previous high` for bulls, mirrored for
//! bears). Each candle reports the signal (+1/-1/0), the gap midpoint when a
//! gap formed, and a streak counter that grows with consecutive same-direction
//! gaps and is carried across candles without one.
//! Lookback: 2.

use super::Indicator;
use crate::domain::Candle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FvgValue {
    /// +1 bullish gap, -1 bearish gap, 0 none.
    pub signal: i8,
    /// Midpoint of the gap; present only when `signal != 0`.
    pub midpoint: Option<f64>,
    /// Positive for a bullish streak, negative for a bearish one.
    pub streak: i32,
}

#[derive(Debug, Clone)]
pub struct Fvg {
    step_size: f64,
    name: String,
}

impl Fvg {
    pub fn new(step_size: f64) -> Self {
        assert!(step_size >= 0.0, "FVG step size must be >= 0");
        Self {
            step_size,
            name: "fvg".to_string(),
        }
    }

    /// Gap at candle `t` (requires t >= 2): (signal, midpoint).
    fn detect(&self, candles: &[Candle], t: usize) -> (i8, Option<f64>) {
        let (c0, c1, c2) = (&candles[t - 2], &candles[t - 1], &candles[t]);

        let bull_og = c2.low > c1.high;
        let bull_og_prev = c1.low > c0.high;
        let bull = c2.low > c0.high
            && c1.close > c0.high
            && !bull_og
            && !bull_og_prev
            && c2.low - c0.high > self.step_size;
        if bull {
            return (1, Some((c2.low + c0.high) / 2.0));
        }

        let bear_og = c2.high < c1.low;
        let bear_og_prev = c1.high < c0.low;
        let bear = c2.high < c0.low
            && c1.close < c0.low
            && !bear_og
            && !bear_og_prev
            && c0.low - c2.high > self.step_size;
        if bear {
            return (-1, Some((c0.low + c2.high) / 2.0));
        }

        (0, None)
    }
}

impl Indicator for Fvg {
    type Output = FvgValue;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        2
    }

    fn compute(&self, candles: &[Candle]) -> Vec<Option<FvgValue>> {
        let n = candles.len();
        let mut result = vec![None; n];
        let mut streak: i32 = 0;

        for t in self.lookback()..n {
            if candles[t - 2..=t].iter().any(Candle::is_void) {
                continue;
            }
            let (signal, midpoint) = self.detect(candles, t);
            streak = match signal {
                1 if streak < 0 => 1,
                1 => streak + 1,
                -1 if streak > 0 => -1,
                -1 => streak - 1,
                _ => streak,
            };
            result[t] = Some(FvgValue {
                signal,
                midpoint,
                streak,
            });
        }

        result
    }
}
