//! Replay — run the full pipeline over historical candles on the paper
//! exchange, one candle per tick, and close whatever is open at the end.

use crate::config::BotConfig;
use crate::data::dataset_hash;
use crate::journal::Journal;
use crate::scheduler::Scheduler;
use crate::summary::RunSummary;
use crate::worker::SymbolWorker;
use anyhow::{bail, Context, Result};
use log::info;
use perpbot_core::domain::{Candle, ExitReason, Signal};
use perpbot_core::exchange::PaperExchange;
use perpbot_core::indicators::IndicatorSet;
use perpbot_core::orders::{AbortToken, OrderExecutor, RetryPolicy};
use perpbot_core::signals::SignalEngine;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of a replay: the summary plus every closed trade.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub summary: RunSummary,
    pub trades: Vec<perpbot_core::domain::TradeRecord>,
}

/// Build the paper exchange and one worker per configured symbol.
pub fn build_replay(
    config: &BotConfig,
    data: &BTreeMap<String, Vec<Candle>>,
    journal: Journal,
    abort: AbortToken,
) -> Result<(Arc<PaperExchange>, Scheduler)> {
    config.validate()?;

    let paper = Arc::new(PaperExchange::new());
    for symbol in &config.session.symbols {
        let candles = data
            .get(symbol)
            .with_context(|| format!("No candles loaded for {symbol}"))?;
        let instrument = config
            .instrument(symbol)
            .with_context(|| format!("No instrument rules for {symbol}"))?;
        paper.add_market(instrument, candles.clone());
    }

    // simulated exchange: no pacing, no sleeping between retries
    let executor = OrderExecutor::new(paper.clone())
        .with_policy(RetryPolicy::immediate(config.execution.max_attempts))
        .with_abort(abort.clone());

    let workers = config
        .session
        .symbols
        .iter()
        .map(|symbol| SymbolWorker::new(symbol, config, executor.clone()))
        .collect::<Result<Vec<_>>>()?;

    let scheduler = Scheduler::new(workers, paper.clone(), journal, abort);
    Ok((paper, scheduler))
}

/// Replay every candle, then force-close open brackets as end of data.
pub fn run_replay(
    config: &BotConfig,
    data: &BTreeMap<String, Vec<Candle>>,
    journal: Journal,
    abort: AbortToken,
) -> Result<ReplayOutcome> {
    let (paper, mut scheduler) = build_replay(config, data, journal, abort.clone())?;
    let fingerprint = config.fingerprint();
    let dataset = dataset_hash(data);
    info!(
        "replay: {} symbol(s), config {fingerprint}, dataset {dataset}",
        config.session.symbols.len()
    );

    while paper.advance_all() {
        scheduler.tick()?;
        if abort.is_tripped() {
            info!("replay interrupted");
            break;
        }
    }
    scheduler.close_all(ExitReason::EndOfData)?;

    let summary = scheduler.summary(&fingerprint, Some(dataset));
    info!(
        "replay done: {} ticks, {} signals, {} trades, net {:.4} USDT",
        summary.counters.ticks, summary.counters.signals, summary.trade_count, summary.net_pnl
    );
    Ok(ReplayOutcome {
        summary,
        trades: scheduler.trades().to_vec(),
    })
}

/// Every signal the engine would emit over `candles`, without trading.
pub fn scan_signals(config: &BotConfig, symbol: &str, candles: &[Candle]) -> Result<Vec<Signal>> {
    if candles.is_empty() {
        bail!("no candles for {symbol}");
    }
    let indicators = IndicatorSet::new(&config.indicators).context("Invalid indicator settings")?;
    let mut engine = SignalEngine::from_settings(&config.indicators, config.strategy.entry_mode);

    Ok(indicators
        .compute(candles)
        .iter()
        .filter_map(|snapshot| engine.evaluate_snapshot(symbol, snapshot))
        .collect())
}
