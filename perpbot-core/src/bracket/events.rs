use super::state::CancelReason;
use crate::domain::{Direction, OrderId, TradeId, TradeRecord};
use serde::{Deserialize, Serialize};

/// Why a signal did not produce an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The per-direction trade limit is already used.
    LimitReached,
    /// Hedge mode is off and the opposite direction holds a position.
    OppositePosition,
    /// A bracket for this signal already exists.
    Duplicate,
    /// The sizer refused the order.
    Sizing(String),
}

/// Transition reported by the bracket manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BracketEvent {
    SignalSkipped {
        symbol: String,
        direction: Direction,
        reason: SkipReason,
    },
    EntrySubmitted {
        trade_id: TradeId,
        direction: Direction,
        qty: f64,
        order_id: Option<OrderId>,
        limit_price: Option<f64>,
    },
    EntryFilled {
        trade_id: TradeId,
        price: f64,
        qty: f64,
    },
    EntryCancelled {
        trade_id: TradeId,
        reason: CancelReason,
    },
    BracketPlaced {
        trade_id: TradeId,
        take_profit: f64,
        stop_loss: f64,
    },
    TrailingArmed {
        trade_id: TradeId,
        price: f64,
    },
    StopTrailed {
        trade_id: TradeId,
        from: f64,
        to: f64,
    },
    TradeClosed(TradeRecord),
    /// Protection could not be placed; the position is being flattened.
    Unprotected {
        trade_id: TradeId,
        attempts: u32,
        error: String,
    },
    /// Needs operator attention.
    Critical {
        trade_id: TradeId,
        message: String,
    },
    /// Local state disagreed with the exchange; exchange state was applied.
    Inconsistent {
        trade_id: TradeId,
        message: String,
    },
}

impl BracketEvent {
    pub fn trade_id(&self) -> Option<&TradeId> {
        match self {
            BracketEvent::SignalSkipped { .. } => None,
            BracketEvent::EntrySubmitted { trade_id, .. }
            | BracketEvent::EntryFilled { trade_id, .. }
            | BracketEvent::EntryCancelled { trade_id, .. }
            | BracketEvent::BracketPlaced { trade_id, .. }
            | BracketEvent::TrailingArmed { trade_id, .. }
            | BracketEvent::StopTrailed { trade_id, .. }
            | BracketEvent::Unprotected { trade_id, .. }
            | BracketEvent::Critical { trade_id, .. }
            | BracketEvent::Inconsistent { trade_id, .. } => Some(trade_id),
            BracketEvent::TradeClosed(record) => Some(&record.trade_id),
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            BracketEvent::Critical { .. } | BracketEvent::Unprotected { .. }
        )
    }
}
