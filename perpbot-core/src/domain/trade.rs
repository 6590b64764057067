//! TradeRecord — a completed round-trip trade with full traceability.

use super::ids::TradeId;
use super::signal::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a trade was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    /// Stop-loss hit after the trailing stop had moved it.
    TrailingStop,
    /// Held longer than the configured maximum.
    Timeout,
    /// Replay ran out of candles with the position open.
    EndOfData,
    /// The exchange no longer reported the position.
    Reconciled,
    /// Protection could not be placed; the position was flattened.
    Unprotected,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Timeout => "timeout",
            ExitReason::EndOfData => "end_of_data",
            ExitReason::Reconciled => "reconciled",
            ExitReason::Unprotected => "unprotected",
        };
        write!(f, "{s}")
    }
}

/// A complete round-trip trade record: entry → exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    // ── Identification ──
    pub trade_id: TradeId,
    pub symbol: String,
    pub direction: Direction,
    pub signal_bar: DateTime<Utc>,

    // ── Entry ──
    pub opened_at: DateTime<Utc>,
    pub entry_price: f64,

    // ── Exit ──
    pub closed_at: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    // ── Size ──
    pub quantity: f64,

    // ── PnL ──
    pub gross_pnl: f64,
    pub fees: f64,
    pub net_pnl: f64,
}

impl TradeRecord {
    /// Gross PnL of a round trip: `(exit - entry) * signed quantity`.
    pub fn gross(direction: Direction, entry_price: f64, exit_price: f64, quantity: f64) -> f64 {
        (exit_price - entry_price) * direction.sign() * quantity
    }

    /// Return on the trade as a fraction of entry notional.
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 || self.quantity == 0.0 {
            return 0.0;
        }
        self.net_pnl / (self.entry_price * self.quantity)
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl > 0.0
    }
}
