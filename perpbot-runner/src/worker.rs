//! SymbolWorker — everything one symbol needs, owned by one thread at a time.
//!
//! # Responsibilities
//! - Fetch closed candles and extend the snapshot series
//! - Evaluate the signal engine on the newest closed bar
//! - Hand signals to the bracket manager, then advance and reconcile brackets
//!
//! # Non-Responsibilities
//! - Does NOT write journals or summaries (scheduler)
//! - Does NOT retry exchange calls (executor)

use crate::config::BotConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use perpbot_core::bracket::{BracketBook, BracketEvent, BracketManager};
use perpbot_core::domain::{ExitReason, Signal};
use perpbot_core::indicators::{IndicatorSet, SnapshotSeries};
use perpbot_core::orders::OrderExecutor;
use perpbot_core::signals::SignalEngine;

/// What one tick of one worker produced.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub symbol: String,
    /// Closed bars added to the snapshot series this tick.
    pub new_bars: usize,
    pub signal: Option<Signal>,
    pub events: Vec<BracketEvent>,
    /// Failures that did not stop the tick.
    pub errors: Vec<String>,
}

pub struct SymbolWorker {
    symbol: String,
    timeframe: String,
    candle_window: usize,
    indicators: IndicatorSet,
    series: SnapshotSeries,
    engine: SignalEngine,
    manager: BracketManager,
    book: BracketBook,
}

impl SymbolWorker {
    /// Build a worker. Instrument rules come from the config when present,
    /// otherwise from the exchange.
    pub fn new(symbol: &str, config: &BotConfig, executor: OrderExecutor) -> Result<Self> {
        let instrument = match config.instrument(symbol) {
            Some(instrument) => instrument,
            None => executor
                .instrument(symbol)
                .with_context(|| format!("Failed to fetch instrument rules for {symbol}"))?,
        };
        let indicators = IndicatorSet::new(&config.indicators)
            .with_context(|| format!("Invalid indicator settings for {symbol}"))?;
        let manager = BracketManager::new(
            executor,
            instrument,
            config.sizer(),
            config.bracket_config(),
        )
        .with_context(|| format!("Invalid bracket settings for {symbol}"))?;

        Ok(Self {
            symbol: symbol.to_string(),
            timeframe: config.session.timeframe.clone(),
            candle_window: config.session.candle_window,
            indicators,
            series: SnapshotSeries::new(config.session.candle_window * 2),
            engine: SignalEngine::from_settings(&config.indicators, config.strategy.entry_mode),
            manager,
            book: BracketBook::new(symbol),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn book(&self) -> &BracketBook {
        &self.book
    }

    pub fn series(&self) -> &SnapshotSeries {
        &self.series
    }

    /// candles → indicators → signal → advance → reconcile.
    ///
    /// A candle fetch failure skips signal evaluation but still supervises
    /// open brackets.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            symbol: self.symbol.clone(),
            ..TickReport::default()
        };

        match self
            .manager
            .executor()
            .closed_candles(&self.symbol, &self.timeframe, self.candle_window)
        {
            Ok(candles) => {
                report.new_bars = self.indicators.update(&mut self.series, &candles);
            }
            Err(e) => {
                warn!("{}: candle fetch failed: {e}", self.symbol);
                report.errors.push(format!("candles: {e}"));
            }
        }

        if report.new_bars > 0 {
            report.signal = self.engine.evaluate(&self.symbol, &self.series);
        }

        if let Some(signal) = &report.signal {
            debug!(
                "{}: {} signal on bar {} (basis {}, atr {})",
                self.symbol, signal.direction, signal.bar_time, signal.basis_price, signal.atr_at_signal
            );
            match self.manager.on_signal(&mut self.book, signal, now) {
                Ok(events) => report.events.extend(events),
                Err(e) => {
                    warn!("{}: signal not acted on: {e}", self.symbol);
                    report.errors.push(format!("signal: {e}"));
                }
            }
        }

        report.events.extend(self.manager.advance(&mut self.book, now));
        report.events.extend(self.manager.reconcile(&mut self.book, now));
        self.release_finished();
        report
    }

    /// Close everything this worker holds.
    pub fn force_close(&mut self, reason: ExitReason, now: DateTime<Utc>) -> Vec<BracketEvent> {
        let events = self.manager.force_close_all(&mut self.book, reason, now);
        self.release_finished();
        events
    }

    /// Finished brackets have already been reported as events; the book only
    /// keeps their ids.
    fn release_finished(&mut self) {
        let finished = self.book.drain_finished();
        if !finished.is_empty() {
            debug!("{}: released {} finished bracket(s)", self.symbol, finished.len());
        }
    }
}
