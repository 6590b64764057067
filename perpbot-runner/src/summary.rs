//! Run summary — trade statistics written as JSON at the end of a replay.
//!
//! Every statistic is a pure function of the closed-trade list.

use anyhow::{Context, Result};
use perpbot_core::domain::TradeRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Per-symbol slice of the summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolSummary {
    pub trades: usize,
    pub wins: usize,
    pub net_pnl: f64,
}

/// Counters gathered by the scheduler while it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCounters {
    pub ticks: usize,
    pub signals: usize,
    pub skipped_signals: usize,
    pub entries_cancelled: usize,
    pub critical_events: usize,
    pub tick_errors: usize,
    /// Every trade closed, including those no longer kept in memory.
    pub trades_closed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub config_fingerprint: String,
    pub dataset_hash: Option<String>,
    pub counters: RunCounters,

    pub trade_count: usize,
    pub win_rate: f64,
    pub gross_pnl: f64,
    pub fees: f64,
    pub net_pnl: f64,
    pub profit_factor: f64,
    /// Largest peak-to-trough fall of cumulative net P&L, in USDT.
    pub max_drawdown: f64,
    pub max_consecutive_losses: usize,

    pub exit_reasons: BTreeMap<String, usize>,
    pub per_symbol: BTreeMap<String, SymbolSummary>,
}

impl RunSummary {
    pub fn compute(
        config_fingerprint: &str,
        dataset_hash: Option<String>,
        counters: RunCounters,
        trades: &[TradeRecord],
    ) -> Self {
        let mut exit_reasons = BTreeMap::new();
        let mut per_symbol: BTreeMap<String, SymbolSummary> = BTreeMap::new();
        for t in trades {
            *exit_reasons.entry(t.exit_reason.to_string()).or_insert(0) += 1;
            let entry = per_symbol.entry(t.symbol.clone()).or_default();
            entry.trades += 1;
            entry.net_pnl += t.net_pnl;
            if t.is_winner() {
                entry.wins += 1;
            }
        }

        Self {
            config_fingerprint: config_fingerprint.to_string(),
            dataset_hash,
            counters,
            trade_count: trades.len(),
            win_rate: win_rate(trades),
            gross_pnl: trades.iter().map(|t| t.gross_pnl).sum(),
            fees: trades.iter().map(|t| t.fees).sum(),
            net_pnl: trades.iter().map(|t| t.net_pnl).sum(),
            profit_factor: profit_factor(trades),
            max_drawdown: max_drawdown(trades),
            max_consecutive_losses: max_consecutive_losses(trades),
            exit_reasons,
            per_symbol,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run summary")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run summary {}", path.display()))?;
        Ok(())
    }
}

// ─── Individual statistics ──────────────────────────────────────────

/// Fraction of trades with positive net P&L.
pub fn win_rate(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross winnings / gross losses on net P&L. Infinite with no losers,
/// zero with no trades.
pub fn profit_factor(trades: &[TradeRecord]) -> f64 {
    let won: f64 = trades.iter().filter(|t| t.net_pnl > 0.0).map(|t| t.net_pnl).sum();
    let lost: f64 = trades.iter().filter(|t| t.net_pnl < 0.0).map(|t| -t.net_pnl).sum();
    if lost == 0.0 {
        if won > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        won / lost
    }
}

/// Deepest fall of cumulative net P&L, trades in close order.
pub fn max_drawdown(trades: &[TradeRecord]) -> f64 {
    let mut ordered: Vec<&TradeRecord> = trades.iter().collect();
    ordered.sort_by_key(|t| t.closed_at);

    let (mut equity, mut peak, mut worst) = (0.0_f64, 0.0_f64, 0.0_f64);
    for t in ordered {
        equity += t.net_pnl;
        peak = peak.max(equity);
        worst = worst.max(peak - equity);
    }
    worst
}

pub fn max_consecutive_losses(trades: &[TradeRecord]) -> usize {
    let mut ordered: Vec<&TradeRecord> = trades.iter().collect();
    ordered.sort_by_key(|t| t.closed_at);

    let (mut run, mut best) = (0, 0);
    for t in ordered {
        if t.net_pnl < 0.0 {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}
