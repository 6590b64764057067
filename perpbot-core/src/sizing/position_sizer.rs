use crate::domain::Instrument;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relative tolerance for the minimum checks, so an exact boundary passes.
const BOUNDARY_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("price must be a positive finite number, got {0}")]
    InvalidPrice(f64),

    #[error("sizing amount must be a positive finite number, got {0}")]
    InvalidAmount(f64),

    #[error("{symbol}: {raw_qty} rounds to zero with qty_step {qty_step}")]
    RoundsToZero {
        symbol: String,
        raw_qty: f64,
        qty_step: f64,
    },

    #[error("{symbol}: quantity {qty} is below the exchange minimum {min_qty}")]
    BelowMinQty { symbol: String, qty: f64, min_qty: f64 },

    #[error("{symbol}: order value {notional:.4} USDT is below the exchange minimum {min_notional}")]
    BelowMinNotional {
        symbol: String,
        notional: f64,
        min_notional: f64,
    },
}

/// How the entry quantity is chosen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SizingMethod {
    /// Spend a fixed USDT notional per trade.
    FixedNotional { usdt: f64 },
    /// Trade a fixed contract quantity per trade.
    FixedQuantity { qty: f64 },
}

impl Default for SizingMethod {
    fn default() -> Self {
        SizingMethod::FixedNotional { usdt: 100.0 }
    }
}

/// Position sizer
///
/// # Responsibilities
/// - Convert budget + price → contract quantity
/// - Round down to the instrument's quantity step
/// - Respect the instrument and configured maximum quantity
/// - Refuse (with a typed error) anything the exchange would reject
///
/// # Non-Responsibilities
/// - Sizers do NOT decide direction or entry price
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSizer {
    method: SizingMethod,
    max_qty: Option<f64>,
}

impl PositionSizer {
    pub fn new(method: SizingMethod) -> Self {
        Self {
            method,
            max_qty: None,
        }
    }

    /// Cap every sized quantity at `max_qty` (itself floored to the step).
    pub fn with_max_qty(mut self, max_qty: f64) -> Self {
        self.max_qty = Some(max_qty);
        self
    }

    pub fn method(&self) -> &SizingMethod {
        &self.method
    }

    /// Quantity for an entry at `price`.
    pub fn size(&self, price: f64, instrument: &Instrument) -> Result<f64, SizingError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(SizingError::InvalidPrice(price));
        }

        let raw_qty = match self.method {
            SizingMethod::FixedNotional { usdt } => {
                if !(usdt.is_finite() && usdt > 0.0) {
                    return Err(SizingError::InvalidAmount(usdt));
                }
                usdt / price
            }
            SizingMethod::FixedQuantity { qty } => {
                if !(qty.is_finite() && qty > 0.0) {
                    return Err(SizingError::InvalidAmount(qty));
                }
                qty
            }
        };

        let cap = instrument.max_qty.min(self.max_qty.unwrap_or(f64::MAX));
        let qty = instrument.floor_qty(raw_qty.min(cap));

        if qty <= 0.0 {
            return Err(SizingError::RoundsToZero {
                symbol: instrument.symbol.clone(),
                raw_qty,
                qty_step: instrument.qty_step,
            });
        }

        if qty < instrument.min_qty * (1.0 - BOUNDARY_EPSILON) {
            return Err(SizingError::BelowMinQty {
                symbol: instrument.symbol.clone(),
                qty,
                min_qty: instrument.min_qty,
            });
        }

        let notional = qty * price;
        if notional < instrument.min_notional * (1.0 - BOUNDARY_EPSILON) {
            return Err(SizingError::BelowMinNotional {
                symbol: instrument.symbol.clone(),
                notional,
                min_notional: instrument.min_notional,
            });
        }

        Ok(qty)
    }
}
