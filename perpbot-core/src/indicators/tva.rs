//! Trend Volume Acceleration (TVA).
//!
//! Oscillator: WMA(close, length) - SMA(close, length).
//! Rising volume is the candle's volume when it exceeds the previous candle's,
//! declining volume when it is below; each is averaged over `smoothing` candles.
//!
//! Four streak accumulators:
//! - `rb` adds rising volume while the oscillator is positive
//! - `rr` adds rising volume while the oscillator is negative
//! - `db` subtracts declining volume while the oscillator is positive
//! - `dr` subtracts declining volume while the oscillator is negative
//!
//! An accumulator is zero whenever its condition is false, and restarts from
//! the current contribution on the first candle after the oscillator sign
//! flips. The last non-zero sign is remembered across zero readings.
//! Lookback: length + smoothing.

use super::ma::{sma_of_series, wma_of_series};
use super::Indicator;
use crate::domain::Candle;
use serde::{Deserialize, Serialize};

/// One candle's accumulator readings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TvaValue {
    pub rb: f64,
    pub rr: f64,
    pub db: f64,
    pub dr: f64,
}

#[derive(Debug, Clone)]
pub struct Tva {
    length: usize,
    smoothing: usize,
    name: String,
}

impl Tva {
    pub fn new(length: usize, smoothing: usize) -> Self {
        assert!(length >= 1, "TVA length must be >= 1");
        assert!(smoothing >= 1, "TVA smoothing must be >= 1");
        Self {
            length,
            smoothing,
            name: format!("tva_{length}_{smoothing}"),
        }
    }
}

/// Split volume changes into (rising, declining) magnitude series.
fn volume_masks(candles: &[Candle]) -> (Vec<f64>, Vec<f64>) {
    let n = candles.len();
    let mut rising = vec![0.0; n];
    let mut declining = vec![0.0; n];
    for i in 1..n {
        let (cur, prev) = (candles[i].volume, candles[i - 1].volume);
        if cur.is_nan() || prev.is_nan() {
            rising[i] = f64::NAN;
            declining[i] = f64::NAN;
        } else if cur > prev {
            rising[i] = cur;
        } else if cur < prev {
            declining[i] = cur;
        }
    }
    (rising, declining)
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

impl Indicator for Tva {
    type Output = TvaValue;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.length + self.smoothing
    }

    fn compute(&self, candles: &[Candle]) -> Vec<Option<TvaValue>> {
        let n = candles.len();
        let mut result = vec![None; n];

        if n <= self.lookback() {
            return result;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let wma = wma_of_series(&closes, self.length);
        let sma = sma_of_series(&closes, self.length);

        let (rising_raw, declining_raw) = volume_masks(candles);
        let rising = sma_of_series(&rising_raw, self.smoothing);
        let declining = sma_of_series(&declining_raw, self.smoothing);

        let mut acc = TvaValue::default();
        let mut prev_sign: i8 = 0;

        for i in self.lookback()..n {
            let osc = wma[i] - sma[i];
            if osc.is_nan() || rising[i].is_nan() || declining[i].is_nan() {
                acc = TvaValue::default();
                continue;
            }

            let flipped_up = prev_sign < 0;
            let flipped_down = prev_sign > 0;

            if osc > 0.0 {
                acc.rb = if flipped_up { rising[i] } else { acc.rb + rising[i] };
                acc.db = if flipped_up { -declining[i] } else { acc.db - declining[i] };
            } else {
                acc.rb = 0.0;
                acc.db = 0.0;
            }

            if osc < 0.0 {
                acc.rr = if flipped_down { rising[i] } else { acc.rr + rising[i] };
                acc.dr = if flipped_down { -declining[i] } else { acc.dr - declining[i] };
            } else {
                acc.rr = 0.0;
                acc.dr = 0.0;
            }

            let s = sign(osc);
            if s != 0 {
                prev_sign = s;
            }

            result[i] = Some(acc);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::candle_at;

    /// Closes rising 1.0 per candle, volume alternating up and down.
    fn uptrend(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64;
                let volume = if i % 2 == 0 { 1000.0 } else { 1200.0 };
                candle_at(i, close - 0.5, close + 1.0, close - 1.0, close, volume)
            })
            .collect()
    }

    #[test]
    fn warmup_is_length_plus_smoothing() {
        let tva = Tva::new(5, 3);
        let result = tva.compute(&uptrend(12));
        assert!(result[..8].iter().all(Option::is_none));
        assert!(result[8].is_some());
    }

    #[test]
    fn uptrend_accumulates_rising_bull() {
        let result = Tva::new(5, 3).compute(&uptrend(20));
        let first = result[8].unwrap();
        let last = result[19].unwrap();
        assert!(first.rb > 0.0);
        assert!(last.rb > first.rb, "rb should grow while the oscillator stays positive");
        assert_eq!(last.rr, 0.0);
        assert_eq!(last.dr, 0.0);
        assert!(last.db < 0.0);
    }

    #[test]
    fn sign_flip_resets_accumulators() {
        // 20 candles up, then 20 candles down
        let mut candles = uptrend(20);
        for i in 20..40 {
            let close = 119.0 - (i - 19) as f64 * 2.0;
            let volume = if i % 2 == 0 { 1000.0 } else { 1200.0 };
            candles.push(candle_at(i, close + 0.5, close + 1.0, close - 1.0, close, volume));
        }
        let result = Tva::new(5, 3).compute(&candles);
        let last = result[39].unwrap();
        assert_eq!(last.rb, 0.0);
        assert_eq!(last.db, 0.0);
        assert!(last.rr > 0.0);
        assert!(last.dr < 0.0);
    }

    #[test]
    fn too_few_candles() {
        assert!(Tva::new(15, 3).compute(&uptrend(18)).iter().all(Option::is_none));
    }
}
