//! SignalEngine — unanimous confluence over the last closed bar.
//!
//! Each enabled indicator contributes a directional predicate:
//!
//! | indicator | long          | short         |
//! |-----------|---------------|---------------|
//! | CVD       | `cvd > 0`     | `cvd < 0`     |
//! | VFI       | `vfi > 0`     | `vfi < 0`     |
//! | FVG       | `signal == 1` | `signal == -1`|
//! | TVA       | `rb > 0`      | `rr > 0`      |
//!
//! A signal fires only when every enabled predicate agrees. ATR never votes
//! but must be present. Missing values and an empty indicator set suppress
//! the signal.

use crate::domain::{Direction, EntryMode, Signal, Symbol};
use crate::indicators::{IndicatorSettings, IndicatorSnapshot, SnapshotSeries};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;

/// Which indicators take part in the confluence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfluenceFilters {
    pub cvd: bool,
    pub vfi: bool,
    pub tva: bool,
    pub fvg: bool,
}

impl ConfluenceFilters {
    pub fn from_settings(settings: &IndicatorSettings) -> Self {
        Self {
            cvd: settings.cvd.enabled,
            vfi: settings.vfi.enabled,
            tva: settings.tva.enabled,
            fvg: settings.fvg.enabled,
        }
    }

    pub fn none_enabled(&self) -> bool {
        !(self.cvd || self.vfi || self.tva || self.fvg)
    }
}

/// Outcome of one indicator's predicate on a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vote {
    Long,
    Short,
    Neutral,
    /// Enabled but no value on this bar.
    Missing,
}

fn vote_sign(value: f64) -> Vote {
    if value > 0.0 {
        Vote::Long
    } else if value < 0.0 {
        Vote::Short
    } else {
        Vote::Neutral
    }
}

/// Why a snapshot produced no signal. Logged at debug level.
#[derive(Debug, Clone, PartialEq)]
pub enum NoSignal {
    NoIndicatorsEnabled,
    NoSnapshot,
    AlreadyEmitted(DateTime<Utc>),
    MissingAtr,
    Missing(&'static str),
    Disagreement,
    MissingMidpoint,
}

/// Turns closed-bar snapshots into at most one signal per bar per symbol.
#[derive(Debug, Clone)]
pub struct SignalEngine {
    filters: ConfluenceFilters,
    entry_mode: EntryMode,
    last_emitted: HashMap<Symbol, DateTime<Utc>>,
}

impl SignalEngine {
    pub fn new(filters: ConfluenceFilters, entry_mode: EntryMode) -> Self {
        Self {
            filters,
            entry_mode,
            last_emitted: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &IndicatorSettings, entry_mode: EntryMode) -> Self {
        Self::new(ConfluenceFilters::from_settings(settings), entry_mode)
    }

    pub fn filters(&self) -> ConfluenceFilters {
        self.filters
    }

    /// Evaluate the most recent closed bar in `series`.
    pub fn evaluate(&mut self, symbol: &str, series: &SnapshotSeries) -> Option<Signal> {
        match series.latest() {
            Some(snapshot) => self.evaluate_snapshot(symbol, snapshot),
            None => {
                debug!("{symbol}: no signal ({:?})", NoSignal::NoSnapshot);
                None
            }
        }
    }

    /// Evaluate one closed bar's snapshot, recording the bar if a signal fires.
    pub fn evaluate_snapshot(
        &mut self,
        symbol: &str,
        snapshot: &IndicatorSnapshot,
    ) -> Option<Signal> {
        match self.try_signal(symbol, snapshot) {
            Ok(signal) => {
                self.last_emitted.insert(symbol.to_string(), snapshot.bar_time);
                Some(signal)
            }
            Err(reason) => {
                debug!("{symbol} @ {}: no signal ({reason:?})", snapshot.bar_time);
                None
            }
        }
    }

    fn try_signal(&self, symbol: &str, snapshot: &IndicatorSnapshot) -> Result<Signal, NoSignal> {
        if let Some(&last) = self.last_emitted.get(symbol) {
            if snapshot.bar_time <= last {
                return Err(NoSignal::AlreadyEmitted(last));
            }
        }

        let direction = confluence(self.filters, snapshot)?;

        let atr = match snapshot.atr {
            Some(atr) if atr.is_finite() && atr > 0.0 => atr,
            _ => return Err(NoSignal::MissingAtr),
        };

        let basis_price = match self.entry_mode {
            EntryMode::Market => snapshot.close,
            EntryMode::Limit => {
                let midpoint = snapshot
                    .fvg
                    .and_then(|f| f.midpoint)
                    .ok_or(NoSignal::MissingMidpoint)?;
                midpoint + direction.sign() * atr
            }
        };

        Ok(Signal {
            symbol: symbol.to_string(),
            direction,
            basis_price,
            atr_at_signal: atr,
            bar_time: snapshot.bar_time,
            entry_mode: self.entry_mode,
        })
    }
}

/// Unanimous AND over the enabled predicates.
pub fn confluence(
    filters: ConfluenceFilters,
    snapshot: &IndicatorSnapshot,
) -> Result<Direction, NoSignal> {
    if filters.none_enabled() {
        return Err(NoSignal::NoIndicatorsEnabled);
    }

    let mut votes: Vec<(&'static str, Vote)> = Vec::with_capacity(4);

    if filters.cvd {
        votes.push(("cvd", snapshot.cvd.map_or(Vote::Missing, vote_sign)));
    }
    if filters.vfi {
        votes.push(("vfi", snapshot.vfi.map_or(Vote::Missing, vote_sign)));
    }
    if filters.fvg {
        let vote = match snapshot.fvg {
            None => Vote::Missing,
            Some(f) if f.signal > 0 => Vote::Long,
            Some(f) if f.signal < 0 => Vote::Short,
            Some(_) => Vote::Neutral,
        };
        votes.push(("fvg", vote));
    }
    if filters.tva {
        let vote = match snapshot.tva {
            None => Vote::Missing,
            Some(t) if t.rb > 0.0 && !(t.rr > 0.0) => Vote::Long,
            Some(t) if t.rr > 0.0 && !(t.rb > 0.0) => Vote::Short,
            Some(_) => Vote::Neutral,
        };
        votes.push(("tva", vote));
    }

    if let Some((name, _)) = votes.iter().find(|(_, v)| *v == Vote::Missing) {
        return Err(NoSignal::Missing(*name));
    }

    if votes.iter().all(|(_, v)| *v == Vote::Long) {
        Ok(Direction::Long)
    } else if votes.iter().all(|(_, v)| *v == Vote::Short) {
        Ok(Direction::Short)
    } else {
        Err(NoSignal::Disagreement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{FvgValue, TvaValue};
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute)
    }

    fn all_on() -> ConfluenceFilters {
        ConfluenceFilters {
            cvd: true,
            vfi: true,
            tva: true,
            fvg: true,
        }
    }

    fn bullish(minute: i64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            bar_time: at(minute),
            close: 100_000.0,
            atr: Some(50.0),
            cvd: Some(120.0),
            vfi: Some(0.3),
            tva: Some(TvaValue {
                rb: 500.0,
                rr: 0.0,
                db: -200.0,
                dr: 0.0,
            }),
            fvg: Some(FvgValue {
                signal: 1,
                midpoint: Some(99_800.0),
                streak: 2,
            }),
        }
    }

    fn bearish(minute: i64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            cvd: Some(-120.0),
            vfi: Some(-0.3),
            tva: Some(TvaValue {
                rb: 0.0,
                rr: 500.0,
                db: 0.0,
                dr: -200.0,
            }),
            fvg: Some(FvgValue {
                signal: -1,
                midpoint: Some(100_200.0),
                streak: -1,
            }),
            ..bullish(minute)
        }
    }

    // ── Confluence ──

    #[test]
    fn test_all_agree_long() {
        assert_eq!(confluence(all_on(), &bullish(0)), Ok(Direction::Long));
    }

    #[test]
    fn test_all_agree_short() {
        assert_eq!(confluence(all_on(), &bearish(0)), Ok(Direction::Short));
    }

    #[test]
    fn test_one_dissent_blocks() {
        let mut snap = bullish(0);
        snap.vfi = Some(-0.1);
        assert_eq!(confluence(all_on(), &snap), Err(NoSignal::Disagreement));
    }

    #[test]
    fn test_neutral_value_blocks() {
        let mut snap = bullish(0);
        snap.cvd = Some(0.0);
        assert_eq!(confluence(all_on(), &snap), Err(NoSignal::Disagreement));
    }

    #[test]
    fn test_disabled_indicator_is_ignored() {
        let mut snap = bullish(0);
        snap.vfi = Some(-0.9);
        let filters = ConfluenceFilters {
            vfi: false,
            ..all_on()
        };
        assert_eq!(confluence(filters, &snap), Ok(Direction::Long));
    }

    #[test]
    fn test_missing_enabled_value_fails_closed() {
        let mut snap = bullish(0);
        snap.tva = None;
        assert_eq!(confluence(all_on(), &snap), Err(NoSignal::Missing("tva")));
    }

    #[test]
    fn test_nothing_enabled_never_signals() {
        let filters = ConfluenceFilters {
            cvd: false,
            vfi: false,
            tva: false,
            fvg: false,
        };
        assert_eq!(
            confluence(filters, &bullish(0)),
            Err(NoSignal::NoIndicatorsEnabled)
        );
    }

    // ── Engine ──

    #[test]
    fn test_market_entry_uses_close() {
        let mut engine = SignalEngine::new(all_on(), EntryMode::Market);
        let signal = engine.evaluate_snapshot("BTCUSDT", &bullish(0)).unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.basis_price, 100_000.0);
        assert_eq!(signal.atr_at_signal, 50.0);
        assert_eq!(signal.bar_time, at(0));
    }

    #[test]
    fn test_limit_entry_offsets_midpoint_by_atr() {
        let mut engine = SignalEngine::new(all_on(), EntryMode::Limit);
        let long = engine.evaluate_snapshot("BTCUSDT", &bullish(0)).unwrap();
        assert_eq!(long.basis_price, 99_850.0);
        let short = engine.evaluate_snapshot("ETHUSDT", &bearish(0)).unwrap();
        assert_eq!(short.basis_price, 100_150.0);
    }

    #[test]
    fn test_limit_entry_without_midpoint_is_suppressed() {
        let filters = ConfluenceFilters {
            fvg: false,
            ..all_on()
        };
        let mut snap = bullish(0);
        snap.fvg = None;
        let mut engine = SignalEngine::new(filters, EntryMode::Limit);
        assert!(engine.evaluate_snapshot("BTCUSDT", &snap).is_none());
    }

    #[test]
    fn test_missing_atr_is_suppressed() {
        let mut snap = bullish(0);
        snap.atr = None;
        let mut engine = SignalEngine::new(all_on(), EntryMode::Market);
        assert!(engine.evaluate_snapshot("BTCUSDT", &snap).is_none());
    }

    #[test]
    fn test_at_most_one_signal_per_bar() {
        let mut engine = SignalEngine::new(all_on(), EntryMode::Market);
        assert!(engine.evaluate_snapshot("BTCUSDT", &bullish(0)).is_some());
        assert!(engine.evaluate_snapshot("BTCUSDT", &bullish(0)).is_none());
        assert!(engine.evaluate_snapshot("BTCUSDT", &bearish(0)).is_none());
        // other symbols are tracked separately
        assert!(engine.evaluate_snapshot("ETHUSDT", &bullish(0)).is_some());
        // next bar is fresh
        assert!(engine.evaluate_snapshot("BTCUSDT", &bullish(1)).is_some());
    }

    #[test]
    fn test_evaluate_reads_latest_closed_bar() {
        let mut series = SnapshotSeries::new(10);
        series.append(bullish(0));
        series.append(bearish(1));
        let mut engine = SignalEngine::new(all_on(), EntryMode::Market);
        let signal = engine.evaluate("BTCUSDT", &series).unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.bar_time, at(1));
    }
}
