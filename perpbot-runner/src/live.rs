//! Live polling against any `Exchange` implementation.
//!
//! Unlike replay, calls are paced by the shared rate limiter and retried with
//! the configured backoff, and open brackets are left in place on shutdown:
//! their TP and SL legs rest on the exchange.

use crate::config::BotConfig;
use crate::journal::Journal;
use crate::scheduler::Scheduler;
use crate::summary::RunSummary;
use crate::worker::SymbolWorker;
use anyhow::Result;
use log::info;
use perpbot_core::exchange::Exchange;
use perpbot_core::orders::{AbortToken, OrderExecutor};
use std::sync::Arc;

/// Closed trades kept in memory for the live summary.
pub const LIVE_TRADE_WINDOW: usize = 10_000;

/// One worker per configured symbol, all sharing one executor and limiter.
pub fn build_live(
    config: &BotConfig,
    exchange: Arc<dyn Exchange>,
    journal: Journal,
    abort: AbortToken,
) -> Result<Scheduler> {
    config.validate()?;

    let executor = OrderExecutor::new(exchange.clone())
        .with_policy(config.retry_policy())
        .with_limiter(Arc::new(config.rate_limiter()))
        .with_abort(abort.clone());

    let workers = config
        .session
        .symbols
        .iter()
        .map(|symbol| SymbolWorker::new(symbol, config, executor.clone()))
        .collect::<Result<Vec<_>>>()?;

    Ok(Scheduler::new(workers, exchange, journal, abort).with_trade_window(LIVE_TRADE_WINDOW))
}

/// Poll until the abort token trips (or `max_ticks` ticks have run).
pub fn run_live(
    config: &BotConfig,
    exchange: Arc<dyn Exchange>,
    journal: Journal,
    abort: AbortToken,
    max_ticks: Option<usize>,
) -> Result<RunSummary> {
    let mut scheduler = build_live(config, exchange, journal, abort)?;
    let fingerprint = config.fingerprint();
    info!("live session starting, config {fingerprint}");

    scheduler.run(config.poll_interval(), max_ticks)?;

    let open: usize = scheduler.workers().iter().map(|w| w.book().active().count()).sum();
    if open > 0 {
        info!("{open} bracket(s) left open on the exchange");
    }
    Ok(scheduler.summary(&fingerprint, None))
}
