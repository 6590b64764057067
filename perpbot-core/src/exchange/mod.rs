//! Exchange seam.
//!
//! The core talks to an exchange only through the `Exchange` trait. Transport
//! details (request signing, sessions, rate-limit headers) live behind it.
//! `PaperExchange` is the in-process implementation used for replay and tests.

pub mod paper;
pub mod rate_limit;

pub use paper::{Fault, FaultOp, PaperExchange};
pub use rate_limit::RateLimiter;

use crate::domain::{Candle, Direction, Instrument, LinkId, Order, OrderId, OrderRequest, Position};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors an exchange call can produce.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("insufficient margin")]
    InsufficientMargin,

    #[error("unknown symbol {0}")]
    InvalidSymbol(String),

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("order {0} is no longer active")]
    OrderNotActive(String),
}

/// How the executor should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, connection resets, 5xx: retry with backoff.
    TransientNetwork,
    /// Retry after the server hint (or backoff) and slow every caller down.
    RateLimited,
    /// The request itself is wrong for the exchange; retrying cannot help.
    Rejected,
}

impl ExchangeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ExchangeError::Network(_) | ExchangeError::Timeout | ExchangeError::Server { .. } => {
                ErrorClass::TransientNetwork
            }
            ExchangeError::RateLimited { .. } => ErrorClass::RateLimited,
            ExchangeError::Rejected(_)
            | ExchangeError::InsufficientMargin
            | ExchangeError::InvalidSymbol(_)
            | ExchangeError::OrderNotFound(_)
            | ExchangeError::OrderNotActive(_) => ErrorClass::Rejected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Rejected
    }

    /// The order is already filled, cancelled, or unknown to the exchange.
    pub fn is_inactive_order(&self) -> bool {
        matches!(
            self,
            ExchangeError::OrderNotActive(_) | ExchangeError::OrderNotFound(_)
        )
    }
}

/// Perpetual-futures exchange operations used by the core.
///
/// Implementations must bound every call with a timeout and report it as
/// `ExchangeError::Timeout`. Positions are tracked per direction (hedge mode).
pub trait Exchange: Send + Sync {
    /// Exchange clock. Replay runs on simulated time.
    fn server_time(&self) -> Result<DateTime<Utc>, ExchangeError>;

    /// Most recent `limit` candles, oldest first. May include the forming candle.
    fn closed_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    fn instrument(&self, symbol: &str) -> Result<Instrument, ExchangeError>;

    fn mark_price(&self, symbol: &str) -> Result<f64, ExchangeError>;

    fn place_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError>;

    fn cancel_order(&self, symbol: &str, order_id: &OrderId) -> Result<(), ExchangeError>;

    /// Move a resting limit price or stop trigger.
    fn amend_order(
        &self,
        symbol: &str,
        order_id: &OrderId,
        new_price: f64,
    ) -> Result<(), ExchangeError>;

    fn order_status(&self, symbol: &str, order_id: &OrderId) -> Result<Order, ExchangeError>;

    /// Look an order up by its client correlation token.
    fn order_by_link_id(&self, symbol: &str, link_id: &LinkId)
        -> Result<Option<Order>, ExchangeError>;

    /// Open position for one side of a symbol, `None` when flat.
    fn position(
        &self,
        symbol: &str,
        direction: Direction,
    ) -> Result<Option<Position>, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ExchangeError::Timeout.is_retryable());
        assert!(ExchangeError::Network("reset".into()).is_retryable());
        assert!(ExchangeError::Server {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());
        assert_eq!(
            ExchangeError::RateLimited { retry_after: None }.class(),
            ErrorClass::RateLimited
        );
    }

    #[test]
    fn rejections_are_fatal() {
        assert!(!ExchangeError::InsufficientMargin.is_retryable());
        assert!(!ExchangeError::Rejected("qty".into()).is_retryable());
        assert!(!ExchangeError::InvalidSymbol("FOO".into()).is_retryable());
        assert!(ExchangeError::OrderNotActive("1".into()).is_inactive_order());
        assert!(!ExchangeError::Timeout.is_inactive_order());
    }
}
