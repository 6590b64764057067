use super::trailing::TrailingSettings;
use crate::domain::{Direction, InstrumentError};
use crate::orders::ExecError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BracketError {
    #[error("invalid bracket setting {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Fee rates as fractions of notional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeRates {
    pub maker: f64,
    pub taker: f64,
}

impl Default for FeeRates {
    fn default() -> Self {
        Self {
            maker: 0.0002,
            taker: 0.00055,
        }
    }
}

impl FeeRates {
    pub fn zero() -> Self {
        Self {
            maker: 0.0,
            taker: 0.0,
        }
    }
}

/// Everything the bracket manager needs to know about the strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketConfig {
    // ── Exit distances ──
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
    pub trailing: TrailingSettings,

    // ── Limits ──
    /// Maximum concurrent long trades per symbol (0 or 1).
    pub max_long_trades: usize,
    /// Maximum concurrent short trades per symbol (0 or 1).
    pub max_short_trades: usize,
    /// Allow a long and a short on the same symbol at once.
    pub hedge_mode: bool,

    // ── Timing ──
    pub order_timeout: Duration,
    pub max_hold: Option<Duration>,

    // ── Protection ──
    /// Attempts to place TP+SL before the position is flattened.
    pub protection_attempts: u32,

    pub fees: FeeRates,
}

impl Default for BracketConfig {
    fn default() -> Self {
        Self {
            sl_atr_mult: 2.0,
            tp_atr_mult: 4.0,
            trailing: TrailingSettings::default(),
            max_long_trades: 1,
            max_short_trades: 1,
            hedge_mode: true,
            order_timeout: Duration::minutes(5),
            max_hold: None,
            protection_attempts: 3,
            fees: FeeRates::default(),
        }
    }
}

impl BracketConfig {
    pub fn max_trades(&self, direction: Direction) -> usize {
        match direction {
            Direction::Long => self.max_long_trades,
            Direction::Short => self.max_short_trades,
        }
    }

    pub fn validate(&self) -> Result<(), BracketError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> Result<(), BracketError> {
            Err(BracketError::InvalidConfig {
                field,
                reason: reason.into(),
            })
        }

        if !(self.sl_atr_mult > 0.0) {
            return invalid("sl_atr_mult", format!("must be > 0, got {}", self.sl_atr_mult));
        }
        if !(self.tp_atr_mult > 0.0) {
            return invalid("tp_atr_mult", format!("must be > 0, got {}", self.tp_atr_mult));
        }
        if self.max_long_trades > 1 {
            return invalid("max_long_trades", "must be 0 or 1");
        }
        if self.max_short_trades > 1 {
            return invalid("max_short_trades", "must be 0 or 1");
        }
        if self.order_timeout <= Duration::zero() {
            return invalid("order_timeout", "must be positive");
        }
        if self.max_hold.is_some_and(|d| d <= Duration::zero()) {
            return invalid("max_hold", "must be positive when set");
        }
        if self.protection_attempts == 0 {
            return invalid("protection_attempts", "must be at least 1");
        }
        let t = &self.trailing;
        if t.enabled && !(t.activation_fraction > 0.0 && t.activation_fraction <= 1.0) {
            return invalid("trailing.activation_fraction", "must be in (0, 1]");
        }
        if t.enabled && !(t.atr_mult > 0.0) {
            return invalid("trailing.atr_mult", "must be > 0");
        }
        if self.fees.maker < 0.0 || self.fees.taker < 0.0 {
            return invalid("fees", "rates cannot be negative");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(BracketConfig::default().validate().is_ok());
    }

    #[test]
    fn test_trade_limits_are_binary() {
        let config = BracketConfig {
            max_long_trades: 2,
            ..BracketConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BracketError::InvalidConfig {
                field: "max_long_trades",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_protection_attempts_rejected() {
        let config = BracketConfig {
            protection_attempts: 0,
            ..BracketConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_trades_by_direction() {
        let config = BracketConfig {
            max_short_trades: 0,
            ..BracketConfig::default()
        };
        assert_eq!(config.max_trades(Direction::Long), 1);
        assert_eq!(config.max_trades(Direction::Short), 0);
    }
}
