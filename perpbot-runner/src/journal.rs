//! Durable record of what the bot did: closed trades and emitted signals,
//! appended to CSV files as they happen.
//!
//! Files are opened in append mode; the header row is written only when a
//! file is created empty, so restarts keep extending the same journal.

use anyhow::{Context, Result};
use perpbot_core::domain::{Signal, TradeRecord};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct TradeRow<'a> {
    trade_id: &'a str,
    symbol: &'a str,
    direction: String,
    signal_bar: String,
    opened_at: String,
    closed_at: String,
    entry_price: f64,
    exit_price: f64,
    quantity: f64,
    exit_reason: String,
    gross_pnl: f64,
    fees: f64,
    net_pnl: f64,
    return_pct: f64,
}

impl<'a> From<&'a TradeRecord> for TradeRow<'a> {
    fn from(t: &'a TradeRecord) -> Self {
        Self {
            trade_id: &t.trade_id.0,
            symbol: &t.symbol,
            direction: t.direction.to_string(),
            signal_bar: t.signal_bar.to_rfc3339(),
            opened_at: t.opened_at.to_rfc3339(),
            closed_at: t.closed_at.to_rfc3339(),
            entry_price: t.entry_price,
            exit_price: t.exit_price,
            quantity: t.quantity,
            exit_reason: t.exit_reason.to_string(),
            gross_pnl: t.gross_pnl,
            fees: t.fees,
            net_pnl: t.net_pnl,
            return_pct: t.return_pct(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SignalRow<'a> {
    bar_time: String,
    symbol: &'a str,
    direction: String,
    entry_mode: &'static str,
    basis_price: f64,
    atr: f64,
}

impl<'a> From<&'a Signal> for SignalRow<'a> {
    fn from(s: &'a Signal) -> Self {
        Self {
            bar_time: s.bar_time.to_rfc3339(),
            symbol: &s.symbol,
            direction: s.direction.to_string(),
            entry_mode: match s.entry_mode {
                perpbot_core::domain::EntryMode::Market => "market",
                perpbot_core::domain::EntryMode::Limit => "limit",
            },
            basis_price: s.basis_price,
            atr: s.atr_at_signal,
        }
    }
}

/// One append-only CSV file.
struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvSink {
    fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create journal dir {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open journal {}", path.display()))?;
        let is_new = file
            .metadata()
            .with_context(|| format!("Failed to stat journal {}", path.display()))?
            .len()
            == 0;
        let writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    fn append<R: Serialize>(&mut self, row: R) -> Result<()> {
        self.writer
            .serialize(row)
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))
    }
}

/// Trade journal and signal log. Either may be absent.
#[derive(Default)]
pub struct Journal {
    trades: Option<CsvSink>,
    signals: Option<CsvSink>,
    trades_written: usize,
    signals_written: usize,
}

impl Journal {
    /// A journal that records nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn open(trades_path: &Path, signals_path: &Path) -> Result<Self> {
        Ok(Self {
            trades: Some(CsvSink::open(trades_path)?),
            signals: Some(CsvSink::open(signals_path)?),
            ..Self::default()
        })
    }

    pub fn record_trade(&mut self, trade: &TradeRecord) -> Result<()> {
        if let Some(sink) = self.trades.as_mut() {
            sink.append(TradeRow::from(trade))?;
            self.trades_written += 1;
        }
        Ok(())
    }

    pub fn record_signal(&mut self, signal: &Signal) -> Result<()> {
        if let Some(sink) = self.signals.as_mut() {
            sink.append(SignalRow::from(signal))?;
            self.signals_written += 1;
        }
        Ok(())
    }

    pub fn trades_written(&self) -> usize {
        self.trades_written
    }

    pub fn signals_written(&self) -> usize {
        self.signals_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use perpbot_core::domain::{Direction, EntryMode, ExitReason, TradeId};

    fn trade() -> TradeRecord {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        TradeRecord {
            trade_id: TradeId::derive("BTCUSDT", Direction::Long, t0),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            signal_bar: t0,
            opened_at: t0 + chrono::Duration::minutes(1),
            entry_price: 100_000.0,
            closed_at: t0 + chrono::Duration::minutes(5),
            exit_price: 99_900.0,
            exit_reason: ExitReason::StopLoss,
            quantity: 0.01,
            gross_pnl: -1.0,
            fees: 0.0,
            net_pnl: -1.0,
        }
    }

    fn signal() -> Signal {
        Signal {
            symbol: "BTCUSDT".into(),
            direction: Direction::Short,
            basis_price: 100_000.0,
            atr_at_signal: 50.0,
            bar_time: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            entry_mode: EntryMode::Market,
        }
    }

    #[test]
    fn writes_header_once_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let trades = dir.path().join("out/trades.csv");
        let signals = dir.path().join("out/signals.csv");

        let mut journal = Journal::open(&trades, &signals).unwrap();
        journal.record_trade(&trade()).unwrap();
        journal.record_signal(&signal()).unwrap();
        drop(journal);

        let mut journal = Journal::open(&trades, &signals).unwrap();
        journal.record_trade(&trade()).unwrap();
        assert_eq!(journal.trades_written(), 1);
        drop(journal);

        let text = std::fs::read_to_string(&trades).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("trade_id,symbol,direction"));
        assert!(lines[1].contains("stop_loss"));
        assert_eq!(text.matches("trade_id").count(), 1);

        let signals_text = std::fs::read_to_string(&signals).unwrap();
        assert_eq!(signals_text.lines().count(), 2);
        assert!(signals_text.contains("market"));
    }

    #[test]
    fn disabled_journal_writes_nothing() {
        let mut journal = Journal::disabled();
        journal.record_trade(&trade()).unwrap();
        journal.record_signal(&signal()).unwrap();
        assert_eq!(journal.trades_written(), 0);
        assert_eq!(journal.signals_written(), 0);
    }
}
