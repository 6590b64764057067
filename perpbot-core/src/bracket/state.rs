//! Bracket lifecycle states.
//!
//! ```text
//! PendingEntry ──fill──▶ Filled ──legs placed──▶ BracketPlaced ──leg fill──▶ Closed
//!      │                   │                                                  ▲
//!      └─timeout/reversal─▶ Cancelled          └──protection failed (flatten)─┘
//! ```
//!
//! A flatten that does not go through leaves the bracket `Filled` with the
//! exit still owed; it is retried on the next advance.
//!
//! Each phase owns exactly the data that exists in it: a pending entry owns no
//! exit legs, a placed bracket owns both.

use super::trailing::TrailingState;
use crate::domain::{Direction, ExitReason, LinkId, OrderId, Signal, TradeId, TradeRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One resting exit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub order_id: OrderId,
    pub link_id: LinkId,
    pub price: f64,
}

/// A market exit that has been decided on but has not gone through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingExit {
    pub reason: ExitReason,
    /// Flatten orders tried so far.
    pub tries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Entry not filled within the order timeout.
    Timeout,
    /// An opposite-direction signal arrived before the entry filled.
    Reversal,
    /// The exchange rejected the entry.
    Rejected,
    /// Submission failed and the exchange has no record of the order.
    SubmitFailed,
    /// The entry was cancelled outside the bot.
    External,
    /// Shutdown or end of data before the entry filled.
    ForceClosed,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::Timeout => "timeout",
            CancelReason::Reversal => "reversal",
            CancelReason::Rejected => "rejected",
            CancelReason::SubmitFailed => "submit_failed",
            CancelReason::External => "external",
            CancelReason::ForceClosed => "force_closed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BracketPhase {
    /// Entry submitted, not (fully) filled. `entry` is `None` while the
    /// exchange has not confirmed the order (lookup by link id pending).
    PendingEntry {
        entry: Option<OrderId>,
        link_id: LinkId,
        submitted_at: DateTime<Utc>,
    },
    /// Entry filled, exit legs not yet resting.
    Filled {
        entry_price: f64,
        filled_at: DateTime<Utc>,
        /// Failed protection attempts so far.
        attempts: u32,
        /// Protection link ids already spent by earlier legs of this trade.
        link_base: u32,
        /// Set once the position is to be closed instead of protected.
        exit: Option<PendingExit>,
    },
    /// Position protected by a take-profit and a stop-loss.
    BracketPlaced {
        entry_price: f64,
        filled_at: DateTime<Utc>,
        take_profit: Leg,
        stop_loss: Leg,
        trailing: TrailingState,
        /// Protection link number the legs were placed under.
        link_round: u32,
    },
    Closed { record: TradeRecord },
    Cancelled {
        reason: CancelReason,
        at: DateTime<Utc>,
    },
}

impl BracketPhase {
    pub fn name(&self) -> &'static str {
        match self {
            BracketPhase::PendingEntry { .. } => "PendingEntry",
            BracketPhase::Filled { .. } => "Filled",
            BracketPhase::BracketPlaced { .. } => "BracketPlaced",
            BracketPhase::Closed { .. } => "Closed",
            BracketPhase::Cancelled { .. } => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BracketPhase::Closed { .. } | BracketPhase::Cancelled { .. }
        )
    }
}

/// One trade from entry submission to closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub trade_id: TradeId,
    pub symbol: String,
    pub direction: Direction,
    /// Entry quantity; after a partial fill, the filled quantity.
    pub qty: f64,
    pub signal: Signal,
    pub phase: BracketPhase,
}

impl Bracket {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.phase, BracketPhase::PendingEntry { .. })
    }

    /// The position is waiting on a market exit that has not gone through.
    pub fn exit_owed(&self) -> Option<PendingExit> {
        match self.phase {
            BracketPhase::Filled { exit, .. } => exit,
            _ => None,
        }
    }

    /// A position exists (protected or not).
    pub fn has_position(&self) -> bool {
        matches!(
            self.phase,
            BracketPhase::Filled { .. } | BracketPhase::BracketPlaced { .. }
        )
    }

    /// Take-profit and stop-loss legs, present together or not at all.
    pub fn legs(&self) -> Option<(&Leg, &Leg)> {
        match &self.phase {
            BracketPhase::BracketPlaced {
                take_profit,
                stop_loss,
                ..
            } => Some((take_profit, stop_loss)),
            _ => None,
        }
    }

    pub fn record(&self) -> Option<&TradeRecord> {
        match &self.phase {
            BracketPhase::Closed { record } => Some(record),
            _ => None,
        }
    }
}
