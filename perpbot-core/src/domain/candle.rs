//! Candle — the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candle for a single symbol on a single timeframe interval.
///
/// A candle is immutable once `is_closed` is true. The exchange keeps
/// revising the forming candle, so only closed candles feed indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub start_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Returns true if any OHLCV field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan()
            || self.high.is_nan()
            || self.low.is_nan()
            || self.close.is_nan()
            || self.volume.is_nan()
    }

    /// Basic OHLCV sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
            && self.volume >= 0.0
    }
}

/// Keep only closed candles, in ascending start-time order, without duplicates.
///
/// Exchanges return the forming candle as the last element; a repeated
/// start time keeps the last copy seen.
pub fn closed_only(candles: &[Candle]) -> Vec<Candle> {
    let mut closed: Vec<Candle> = candles.iter().filter(|c| c.is_closed).cloned().collect();
    closed.sort_by_key(|c| c.start_time);
    closed.dedup_by(|later, earlier| {
        if later.start_time == earlier.start_time {
            *earlier = later.clone();
            true
        } else {
            false
        }
    });
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_candle() -> Candle {
        Candle {
            start_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            volume: 50_000.0,
            is_closed: true,
        }
    }

    #[test]
    fn candle_is_sane() {
        assert!(sample_candle().is_sane());
        assert!(sample_candle().is_bullish());
    }

    #[test]
    fn candle_detects_void() {
        let mut candle = sample_candle();
        candle.volume = f64::NAN;
        assert!(candle.is_void());
        assert!(!candle.is_sane());
    }

    #[test]
    fn candle_detects_insane_high_low() {
        let mut candle = sample_candle();
        candle.high = 97.0;
        assert!(!candle.is_sane());
    }

    #[test]
    fn closed_only_drops_forming_candle_and_sorts() {
        let a = sample_candle();
        let mut b = sample_candle();
        b.start_time = a.start_time + chrono::Duration::minutes(5);
        let mut forming = sample_candle();
        forming.start_time = b.start_time + chrono::Duration::minutes(5);
        forming.is_closed = false;

        let result = closed_only(&[b.clone(), a.clone(), forming]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].start_time, a.start_time);
        assert_eq!(result[1].start_time, b.start_time);
    }

    #[test]
    fn closed_only_keeps_last_duplicate() {
        let a = sample_candle();
        let mut revised = sample_candle();
        revised.close = 104.0;
        let result = closed_only(&[a, revised]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].close, 104.0);
    }
}
