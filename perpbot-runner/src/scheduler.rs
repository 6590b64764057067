//! Scheduler — drives every symbol worker once per tick.
//!
//! Workers run in parallel on the rayon pool; each owns its symbol's brackets
//! outright. Reports are gathered back on the scheduler thread, which is the
//! only writer of the journal and the run counters.

use crate::journal::Journal;
use crate::summary::{RunCounters, RunSummary};
use crate::worker::{SymbolWorker, TickReport};
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use perpbot_core::bracket::BracketEvent;
use perpbot_core::domain::{ExitReason, TradeRecord};
use perpbot_core::exchange::Exchange;
use perpbot_core::orders::AbortToken;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest sleep between abort checks while waiting for the next tick.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

pub struct Scheduler {
    workers: Vec<SymbolWorker>,
    exchange: Arc<dyn Exchange>,
    journal: Journal,
    abort: AbortToken,
    counters: RunCounters,
    trades: Vec<TradeRecord>,
    /// Keep only this many of the latest trades in memory.
    trade_window: Option<usize>,
}

impl Scheduler {
    pub fn new(
        workers: Vec<SymbolWorker>,
        exchange: Arc<dyn Exchange>,
        journal: Journal,
        abort: AbortToken,
    ) -> Self {
        Self {
            workers,
            exchange,
            journal,
            abort,
            counters: RunCounters::default(),
            trades: Vec::new(),
            trade_window: None,
        }
    }

    /// Bound the in-memory trade list for long-running sessions. The journal
    /// still receives every trade; the summary covers the latest `window`.
    pub fn with_trade_window(mut self, window: usize) -> Self {
        self.trade_window = Some(window);
        self
    }

    pub fn workers(&self) -> &[SymbolWorker] {
        &self.workers
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    /// Trades closed so far (the latest ones under a trade window), in the
    /// order they were reported.
    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn abort_token(&self) -> &AbortToken {
        &self.abort
    }

    fn now(&self) -> DateTime<Utc> {
        match self.exchange.server_time() {
            Ok(t) => t,
            Err(e) => {
                warn!("server time unavailable, using local clock: {e}");
                Utc::now()
            }
        }
    }

    /// One pass over every worker.
    pub fn tick(&mut self) -> Result<()> {
        let now = self.now();
        let reports: Vec<TickReport> = self
            .workers
            .par_iter_mut()
            .map(|worker| worker.tick(now))
            .collect();
        self.counters.ticks += 1;
        for report in reports {
            self.absorb(report)?;
        }
        Ok(())
    }

    /// Tick every `poll_interval` until the abort token trips, or `max_ticks`
    /// ticks have run.
    pub fn run(&mut self, poll_interval: Duration, max_ticks: Option<usize>) -> Result<()> {
        info!(
            "scheduler started: {} symbol(s), polling every {:?}",
            self.workers.len(),
            poll_interval
        );
        let mut ticks = 0;
        while !self.abort.is_tripped() {
            let started = Instant::now();
            self.tick()?;
            ticks += 1;
            if max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }
            let deadline = started + poll_interval;
            while !self.abort.is_tripped() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                std::thread::sleep((deadline - now).min(SLEEP_SLICE));
            }
        }
        info!("scheduler stopped after {ticks} tick(s)");
        Ok(())
    }

    /// Force-close every open bracket on every symbol.
    pub fn close_all(&mut self, reason: ExitReason) -> Result<()> {
        let now = self.now();
        let mut reports = Vec::new();
        for worker in &mut self.workers {
            let events = worker.force_close(reason, now);
            if !events.is_empty() {
                reports.push(TickReport {
                    symbol: worker.symbol().to_string(),
                    events,
                    ..TickReport::default()
                });
            }
        }
        for report in reports {
            self.absorb(report)?;
        }
        Ok(())
    }

    pub fn summary(&self, config_fingerprint: &str, dataset_hash: Option<String>) -> RunSummary {
        RunSummary::compute(
            config_fingerprint,
            dataset_hash,
            self.counters.clone(),
            &self.trades,
        )
    }

    fn absorb(&mut self, report: TickReport) -> Result<()> {
        self.counters.tick_errors += report.errors.len();
        if let Some(signal) = &report.signal {
            self.counters.signals += 1;
            self.journal.record_signal(signal)?;
        }

        for event in report.events {
            match event {
                BracketEvent::TradeClosed(record) => {
                    self.journal.record_trade(&record)?;
                    self.counters.trades_closed += 1;
                    self.trades.push(record);
                    if let Some(window) = self.trade_window {
                        let excess = self.trades.len().saturating_sub(window);
                        self.trades.drain(..excess);
                    }
                }
                BracketEvent::SignalSkipped { .. } => self.counters.skipped_signals += 1,
                BracketEvent::EntryCancelled { .. } => self.counters.entries_cancelled += 1,
                BracketEvent::Critical { trade_id, message } => {
                    self.counters.critical_events += 1;
                    error!("{}: CRITICAL {trade_id}: {message}", report.symbol);
                }
                BracketEvent::Inconsistent { trade_id, message } => {
                    warn!("{}: state mismatch on {trade_id}: {message}", report.symbol);
                }
                _ => {}
            }
        }
        Ok(())
    }
}
