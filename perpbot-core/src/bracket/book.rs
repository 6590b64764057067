//! BracketBook — per-symbol table of active brackets and recently finished ones.

use super::state::Bracket;
use crate::domain::{Direction, TradeId, TradeRecord};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Finished trade ids remembered for duplicate detection. Signals only ever
/// arrive for the newest bar, so the oldest ids can be forgotten.
pub const RECENT_TRADE_IDS: usize = 1024;

/// Active brackets for one symbol, keyed by trade id.
///
/// Brackets that reach a terminal phase wait in `finished` until the owner
/// collects them with [`drain_finished`]; their ids stay known for duplicate
/// detection until [`RECENT_TRADE_IDS`] newer ones have finished.
///
/// [`drain_finished`]: BracketBook::drain_finished
#[derive(Debug, Clone, Default)]
pub struct BracketBook {
    symbol: String,
    active: BTreeMap<TradeId, Bracket>,
    finished: Vec<Bracket>,
    recent: BTreeMap<TradeId, DateTime<Utc>>,
    recent_by_bar: BTreeSet<(DateTime<Utc>, TradeId)>,
}

impl BracketBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn get(&self, trade_id: &TradeId) -> Option<&Bracket> {
        self.active.get(trade_id)
    }

    /// Whether `trade_id` is active or recently finished.
    pub fn contains(&self, trade_id: &TradeId) -> bool {
        self.active.contains_key(trade_id) || self.recent.contains_key(trade_id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Bracket> {
        self.active.values()
    }

    pub fn active_ids(&self) -> Vec<TradeId> {
        self.active.keys().cloned().collect()
    }

    pub fn active_count(&self, direction: Direction) -> usize {
        self.active
            .values()
            .filter(|b| b.direction == direction)
            .count()
    }

    /// Active brackets of `direction` that already hold a position.
    pub fn has_position(&self, direction: Direction) -> bool {
        self.active
            .values()
            .any(|b| b.direction == direction && b.has_position())
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Terminal brackets not yet collected.
    pub fn history(&self) -> &[Bracket] {
        &self.finished
    }

    pub fn closed_trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.finished.iter().filter_map(Bracket::record)
    }

    /// Hand over every terminal bracket. Their ids are still remembered.
    pub fn drain_finished(&mut self) -> Vec<Bracket> {
        std::mem::take(&mut self.finished)
    }

    /// Take a bracket out for processing. Must be given back with [`restore`].
    ///
    /// [`restore`]: BracketBook::restore
    pub(crate) fn take(&mut self, trade_id: &TradeId) -> Option<Bracket> {
        self.active.remove(trade_id)
    }

    /// Put a bracket back: active if still live, finished if terminal.
    pub(crate) fn restore(&mut self, bracket: Bracket) {
        if bracket.is_terminal() {
            self.remember(&bracket);
            self.finished.push(bracket);
        } else {
            self.active.insert(bracket.trade_id.clone(), bracket);
        }
    }

    fn remember(&mut self, bracket: &Bracket) {
        let bar = bracket.signal.bar_time;
        if let Some(previous) = self.recent.insert(bracket.trade_id.clone(), bar) {
            self.recent_by_bar.remove(&(previous, bracket.trade_id.clone()));
        }
        self.recent_by_bar.insert((bar, bracket.trade_id.clone()));

        while self.recent_by_bar.len() > RECENT_TRADE_IDS {
            let Some((_, oldest)) = self.recent_by_bar.pop_first() else {
                break;
            };
            self.recent.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::state::{BracketPhase, CancelReason};
    use crate::domain::{EntryMode, LinkId, LinkPurpose, Signal};
    use chrono::{TimeZone, Utc};

    fn bracket(direction: Direction, minute: u32, phase: BracketPhase) -> Bracket {
        let bar = Utc.with_ymd_and_hms(2024, 1, 2, 0, minute, 0).unwrap();
        let trade_id = TradeId::derive("BTCUSDT", direction, bar);
        Bracket {
            trade_id,
            symbol: "BTCUSDT".into(),
            direction,
            qty: 0.01,
            signal: Signal {
                symbol: "BTCUSDT".into(),
                direction,
                basis_price: 100.0,
                atr_at_signal: 1.0,
                bar_time: bar,
                entry_mode: EntryMode::Market,
            },
            phase,
        }
    }

    fn pending(minute: u32) -> BracketPhase {
        let bar = Utc.with_ymd_and_hms(2024, 1, 2, 0, minute, 0).unwrap();
        BracketPhase::PendingEntry {
            entry: None,
            link_id: LinkId::for_trade(
                &TradeId::derive("BTCUSDT", Direction::Long, bar),
                LinkPurpose::Entry,
            ),
            submitted_at: bar,
        }
    }

    fn cancelled(minute: u32) -> BracketPhase {
        BracketPhase::Cancelled {
            reason: CancelReason::Timeout,
            at: Utc.with_ymd_and_hms(2024, 1, 2, 0, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_restore_routes_terminal_to_finished() {
        let mut book = BracketBook::new("BTCUSDT");
        let live = bracket(Direction::Long, 1, pending(1));
        let id = live.trade_id.clone();
        book.restore(live);
        assert_eq!(book.active_count(Direction::Long), 1);

        let mut taken = book.take(&id).unwrap();
        taken.phase = cancelled(5);
        book.restore(taken);

        assert!(book.is_empty());
        assert_eq!(book.history().len(), 1);
        assert!(book.contains(&id));
    }

    #[test]
    fn test_drained_brackets_stay_known() {
        let mut book = BracketBook::new("BTCUSDT");
        let done = bracket(Direction::Long, 1, cancelled(3));
        let id = done.trade_id.clone();
        book.restore(done);

        let drained = book.drain_finished();
        assert_eq!(drained.len(), 1);
        assert!(book.history().is_empty());
        assert!(book.contains(&id));
    }

    #[test]
    fn test_oldest_finished_ids_are_forgotten() {
        let mut book = BracketBook::new("BTCUSDT");
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut first = None;
        for i in 0..=RECENT_TRADE_IDS {
            let mut done = bracket(Direction::Long, 0, cancelled(0));
            done.signal.bar_time = start + chrono::Duration::minutes(i as i64);
            done.trade_id = TradeId::derive("BTCUSDT", Direction::Long, done.signal.bar_time);
            first.get_or_insert_with(|| done.trade_id.clone());
            book.restore(done);
            book.drain_finished();
        }

        let first = first.unwrap();
        assert!(!book.contains(&first));
        let newest = TradeId::derive(
            "BTCUSDT",
            Direction::Long,
            start + chrono::Duration::minutes(RECENT_TRADE_IDS as i64),
        );
        assert!(book.contains(&newest));
        assert_eq!(book.recent.len(), RECENT_TRADE_IDS);
    }

    #[test]
    fn test_counts_are_per_direction() {
        let mut book = BracketBook::new("BTCUSDT");
        book.restore(bracket(Direction::Long, 1, pending(1)));
        book.restore(bracket(Direction::Short, 2, pending(2)));
        assert_eq!(book.active_count(Direction::Long), 1);
        assert_eq!(book.active_count(Direction::Short), 1);
        assert!(!book.has_position(Direction::Long));
    }
}
