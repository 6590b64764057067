//! Directional signals emitted by the signal engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction. Positions are tracked per direction (hedge mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "Long"),
            Direction::Short => write!(f, "Short"),
        }
    }
}

/// How the entry order is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Market order; basis price is the signal bar's close.
    #[default]
    Market,
    /// Limit order at the FVG midpoint offset by one ATR.
    Limit,
}

/// A directional entry signal. At most one per closed bar per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    /// Market mode: reference price for sizing. Limit mode: the limit price.
    pub basis_price: f64,
    pub atr_at_signal: f64,
    /// Start time of the closed bar the signal was computed from.
    pub bar_time: DateTime<Utc>,
    pub entry_mode: EntryMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_sign_and_opposite() {
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.opposite(), Direction::Long);
    }

    #[test]
    fn entry_mode_deserializes_snake_case() {
        let mode: EntryMode = serde_json::from_str("\"limit\"").unwrap();
        assert_eq!(mode, EntryMode::Limit);
    }
}
