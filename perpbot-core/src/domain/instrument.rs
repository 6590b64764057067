use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tolerance used when converting prices and quantities to whole step counts.
///
/// `0.3 / 0.1` is `2.9999999999999996` in floating point; without the nudge
/// a floor would drop a whole step.
const STEP_EPSILON: f64 = 1e-9;

/// Tick rounding policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TickPolicy {
    /// Round to nearest tick
    RoundNearest,
    /// Round down
    RoundDown,
    /// Round up
    RoundUp,
}

/// Perpetual contract quantization rules as published by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub tick_size: f64,
    pub qty_step: f64,
    pub min_qty: f64,
    pub max_qty: f64,
    /// Minimum order value in quote currency (USDT).
    pub min_notional: f64,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, tick_size: f64, qty_step: f64, min_qty: f64) -> Self {
        Self {
            symbol: symbol.into(),
            tick_size,
            qty_step,
            min_qty,
            max_qty: f64::MAX,
            min_notional: 0.0,
        }
    }

    pub fn with_max_qty(mut self, max_qty: f64) -> Self {
        self.max_qty = max_qty;
        self
    }

    pub fn with_min_notional(mut self, min_notional: f64) -> Self {
        self.min_notional = min_notional;
        self
    }

    /// Check the quantization rules themselves are usable.
    pub fn validate(&self) -> Result<(), InstrumentError> {
        if !(self.tick_size > 0.0) {
            return Err(InstrumentError::InvalidTickSize {
                symbol: self.symbol.clone(),
                tick_size: self.tick_size,
            });
        }
        if !(self.qty_step > 0.0) {
            return Err(InstrumentError::InvalidQtyStep {
                symbol: self.symbol.clone(),
                qty_step: self.qty_step,
            });
        }
        if self.min_qty < 0.0 || self.max_qty < self.min_qty {
            return Err(InstrumentError::InvalidQtyBounds {
                symbol: self.symbol.clone(),
                min_qty: self.min_qty,
                max_qty: self.max_qty,
            });
        }
        Ok(())
    }

    /// Round price according to policy
    pub fn round_price(&self, price: f64, policy: TickPolicy) -> f64 {
        let ticks = price / self.tick_size;
        let rounded_ticks = match policy {
            TickPolicy::RoundNearest => ticks.round(),
            TickPolicy::RoundDown => (ticks + STEP_EPSILON).floor(),
            TickPolicy::RoundUp => (ticks - STEP_EPSILON).ceil(),
        };
        normalize(rounded_ticks * self.tick_size, self.tick_size)
    }

    /// Number of whole quantity steps in `qty`, rounded down.
    pub fn qty_steps(&self, qty: f64) -> u64 {
        if !(qty > 0.0) {
            return 0;
        }
        (qty / self.qty_step + STEP_EPSILON).floor() as u64
    }

    /// Round a quantity down to the nearest quantity step.
    pub fn floor_qty(&self, qty: f64) -> f64 {
        normalize(self.qty_steps(qty) as f64 * self.qty_step, self.qty_step)
    }
}

/// Strip floating-point noise by rounding to the step's decimal precision.
fn normalize(value: f64, step: f64) -> f64 {
    let decimals = decimals_of(step);
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn decimals_of(step: f64) -> i32 {
    let mut decimals = 0;
    let mut scaled = step;
    while decimals < 12 && (scaled - scaled.round()).abs() > STEP_EPSILON {
        scaled *= 10.0;
        decimals += 1;
    }
    decimals
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("{symbol}: tick_size must be > 0, got {tick_size}")]
    InvalidTickSize { symbol: String, tick_size: f64 },

    #[error("{symbol}: qty_step must be > 0, got {qty_step}")]
    InvalidQtyStep { symbol: String, qty_step: f64 },

    #[error("{symbol}: invalid quantity bounds min={min_qty} max={max_qty}")]
    InvalidQtyBounds {
        symbol: String,
        min_qty: f64,
        max_qty: f64,
    },
}
