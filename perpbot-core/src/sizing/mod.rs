//! Position sizing — turns a USDT budget into an exchange-valid quantity.
//!
//! Sizers convert a notional (or a fixed contract count) into a quantity the
//! instrument accepts. Rounding is always down: a sized order never exceeds
//! the configured budget.

pub mod position_sizer;

pub use position_sizer::{PositionSizer, SizingError, SizingMethod};
