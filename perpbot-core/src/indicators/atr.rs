//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|)
//! ATR uses Wilder smoothing (RMA, alpha = 1/length).
//! The first candle has no previous close, so its TR is excluded and the
//! first value lands at index `length`.

use super::{nan_to_none, Indicator};
use crate::domain::Candle;

#[derive(Debug, Clone)]
pub struct Atr {
    length: usize,
    name: String,
}

impl Atr {
    pub fn new(length: usize) -> Self {
        assert!(length >= 1, "ATR length must be >= 1");
        Self {
            length,
            name: format!("atr_{length}"),
        }
    }
}

/// Compute the True Range series from candles.
/// TR[0] = high[0] - low[0] (no previous close).
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let n = candles.len();
    let mut tr = vec![f64::NAN; n];

    if n == 0 {
        return tr;
    }

    tr[0] = candles[0].high - candles[0].low;

    for i in 1..n {
        let h = candles[i].high;
        let l = candles[i].low;
        let pc = candles[i - 1].close;
        // f64::max ignores NaN operands, so void inputs must be caught first
        if h.is_nan() || l.is_nan() || pc.is_nan() {
            continue;
        }
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }

    tr
}

/// Apply Wilder smoothing to a series. Alpha = 1/length.
/// Seed: mean of the first `length` consecutive valid values.
pub fn wilder_smooth(values: &[f64], length: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    if n < length || length == 0 {
        return result;
    }

    // First index that starts a run of `length` non-NaN values
    let mut run = 0;
    let mut seed_end = None;
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            run = 0;
            continue;
        }
        run += 1;
        if run == length {
            seed_end = Some(i + 1);
            break;
        }
    }

    let Some(seed_end) = seed_end else {
        return result;
    };

    let seed: f64 = values[(seed_end - length)..seed_end].iter().sum::<f64>() / length as f64;
    result[seed_end - 1] = seed;

    let alpha = 1.0 / length as f64;
    let mut prev = seed;

    for i in seed_end..n {
        if values[i].is_nan() {
            return result;
        }
        let smoothed = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = smoothed;
        prev = smoothed;
    }

    result
}

impl Indicator for Atr {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.length
    }

    fn compute(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        let mut tr = true_range(candles);
        if !tr.is_empty() {
            tr[0] = f64::NAN;
        }
        nan_to_none(wilder_smooth(&tr, self.length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, candle_at, DEFAULT_EPSILON};

    fn make_ohlc(data: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        data.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| candle_at(i, o, h, l, c, 1000.0))
            .collect()
    }

    #[test]
    fn true_range_basic() {
        let candles = make_ohlc(&[
            (100.0, 105.0, 95.0, 102.0),  // TR = 105-95 = 10
            (102.0, 108.0, 100.0, 106.0), // TR = max(8, |108-102|, |100-102|) = 8
            (106.0, 107.0, 98.0, 99.0),   // TR = max(9, |107-106|, |98-106|) = 9
        ]);
        let tr = true_range(&candles);
        assert_approx(tr[0], 10.0, DEFAULT_EPSILON);
        assert_approx(tr[1], 8.0, DEFAULT_EPSILON);
        assert_approx(tr[2], 9.0, DEFAULT_EPSILON);
    }

    #[test]
    fn true_range_gap_up() {
        let candles = make_ohlc(&[
            (98.0, 102.0, 97.0, 100.0),
            (110.0, 115.0, 108.0, 112.0), // TR = max(7, |115-100|, |108-100|) = 15
        ]);
        assert_approx(true_range(&candles)[1], 15.0, DEFAULT_EPSILON);
    }

    #[test]
    fn atr_length_3() {
        let candles = make_ohlc(&[
            (100.0, 105.0, 95.0, 102.0),  // TR = 10 (excluded)
            (102.0, 108.0, 100.0, 106.0), // TR = 8
            (106.0, 107.0, 98.0, 99.0),   // TR = 9
            (99.0, 103.0, 97.0, 101.0),   // TR = 6
            (101.0, 106.0, 100.0, 105.0), // TR = 6
        ]);
        let result = Atr::new(3).compute(&candles);

        assert!(result[..3].iter().all(Option::is_none));
        // Seed: mean(8, 9, 6) = 23/3
        // ATR[4] = (1/3)*6 + (2/3)*(23/3) = 64/9
        assert_approx(result[3].unwrap(), 23.0 / 3.0, DEFAULT_EPSILON);
        assert_approx(result[4].unwrap(), 64.0 / 9.0, DEFAULT_EPSILON);
    }

    #[test]
    fn atr_void_candle_restarts_seed() {
        let mut candles = make_ohlc(&[
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 108.0, 100.0, 106.0),
            (106.0, 107.0, 98.0, 99.0),
            (99.0, 103.0, 97.0, 101.0),
            (101.0, 106.0, 100.0, 105.0),
        ]);
        candles[1].high = f64::NAN;
        let result = Atr::new(2).compute(&candles);
        assert!(result[1].is_none());
        assert!(result[2].is_none());
        // Seed window TR[2..=3] = [9, 6]
        assert_approx(result[3].unwrap(), 7.5, DEFAULT_EPSILON);
    }

    #[test]
    fn atr_lookback() {
        assert_eq!(Atr::new(14).lookback(), 14);
        assert_eq!(Atr::new(14).name(), "atr_14");
    }
}
