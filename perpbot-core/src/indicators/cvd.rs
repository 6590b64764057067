//! Cumulative Volume Delta (CVD).
//!
//! Signed volume per candle (+volume for a bullish candle, -volume for a
//! bearish one, 0 for a doji), exponentially smoothed with span
//! `cumulation_length`. Positive values mean buy pressure dominates.
//! Lookback: span - 1.

use super::ma::ema_by_span;
use super::Indicator;
use crate::domain::Candle;

#[derive(Debug, Clone)]
pub struct Cvd {
    span: usize,
    name: String,
}

impl Cvd {
    pub fn new(cumulation_length: usize) -> Self {
        assert!(cumulation_length >= 1, "CVD cumulation length must be >= 1");
        Self {
            span: cumulation_length,
            name: format!("cvd_{cumulation_length}"),
        }
    }
}

/// Volume signed by candle direction.
pub fn signed_volume(candle: &Candle) -> f64 {
    if candle.is_void() {
        f64::NAN
    } else if candle.is_bullish() {
        candle.volume
    } else if candle.is_bearish() {
        -candle.volume
    } else {
        0.0
    }
}

impl Indicator for Cvd {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.span - 1
    }

    fn compute(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        let deltas: Vec<f64> = candles.iter().map(signed_volume).collect();
        ema_by_span(&deltas, self.span)
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                if i < self.lookback() || v.is_nan() {
                    None
                } else {
                    Some(v)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, candle_at, DEFAULT_EPSILON};

    #[test]
    fn signed_volume_by_direction() {
        assert_eq!(signed_volume(&candle_at(0, 100.0, 102.0, 99.0, 101.0, 50.0)), 50.0);
        assert_eq!(signed_volume(&candle_at(0, 101.0, 102.0, 99.0, 100.0, 50.0)), -50.0);
        assert_eq!(signed_volume(&candle_at(0, 100.0, 102.0, 99.0, 100.0, 50.0)), 0.0);
    }

    #[test]
    fn cvd_span_3() {
        // deltas: +100, -50, +30, 0
        // alpha = 0.5
        // e0 = 100, e1 = 25, e2 = 27.5, e3 = 13.75
        let candles = vec![
            candle_at(0, 100.0, 102.0, 99.0, 101.0, 100.0),
            candle_at(1, 101.0, 102.0, 99.0, 100.0, 50.0),
            candle_at(2, 100.0, 102.0, 99.0, 101.0, 30.0),
            candle_at(3, 101.0, 102.0, 99.0, 101.0, 80.0),
        ];
        let result = Cvd::new(3).compute(&candles);
        assert!(result[0].is_none());
        assert!(result[1].is_none());
        assert_approx(result[2].unwrap(), 27.5, DEFAULT_EPSILON);
        assert_approx(result[3].unwrap(), 13.75, DEFAULT_EPSILON);
    }

    #[test]
    fn cvd_turns_negative_under_selling() {
        let mut candles = Vec::new();
        for i in 0..10 {
            candles.push(candle_at(i, 101.0, 102.0, 98.0, 99.0, 500.0));
        }
        let result = Cvd::new(5).compute(&candles);
        assert!(result[9].unwrap() < 0.0);
    }

    #[test]
    fn cvd_lookback() {
        assert_eq!(Cvd::new(25).lookback(), 24);
    }
}
