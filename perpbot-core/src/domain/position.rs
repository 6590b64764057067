use super::signal::Direction;
use serde::{Deserialize, Serialize};

/// Exchange-reported position for one side of a symbol (hedge mode).
///
/// This is ground truth; local bracket state is reconciled against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub direction: Direction,
    /// Absolute contract quantity. Zero means flat.
    pub size: f64,
    pub entry_price: f64,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.size <= 0.0
    }

    pub fn unrealized_pnl(&self, mark_price: f64) -> f64 {
        self.direction.sign() * self.size * (mark_price - self.entry_price)
    }
}
