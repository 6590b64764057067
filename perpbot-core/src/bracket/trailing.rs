//! Trailing stop-loss.
//!
//! **Core rule:** once armed, the stop only moves in the favorable direction.
//! - Long positions: stop can only rise
//! - Short positions: stop can only fall
//!
//! Arming happens once, the first time price covers `activation_fraction` of
//! the entry → take-profit distance. The take-profit itself never moves.

use crate::domain::Direction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingSettings {
    pub enabled: bool,
    /// Fraction of the entry → TP distance price must cover before trailing.
    pub activation_fraction: f64,
    /// Trailing distance in ATRs (ATR at signal time).
    pub atr_mult: f64,
}

impl Default for TrailingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            activation_fraction: 0.5,
            atr_mult: 1.0,
        }
    }
}

/// Result of feeding one price into the trailing state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrailStep {
    /// Trailing armed on this observation.
    pub armed_now: bool,
    /// Proposed new stop, strictly better than the current one.
    pub candidate: Option<f64>,
}

/// Trailing-stop state for one protected position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingState {
    enabled: bool,
    armed: bool,
    direction: Direction,
    activation_price: f64,
    distance: f64,
    current_stop: f64,
    trailed: bool,
}

impl TrailingState {
    pub fn new(
        settings: &TrailingSettings,
        direction: Direction,
        entry_price: f64,
        take_profit: f64,
        stop_loss: f64,
        atr: f64,
    ) -> Self {
        let activation_price =
            entry_price + (take_profit - entry_price) * settings.activation_fraction;
        Self {
            enabled: settings.enabled,
            armed: false,
            direction,
            activation_price,
            distance: atr * settings.atr_mult,
            current_stop: stop_loss,
            trailed: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// The stop has been moved at least once.
    pub fn has_trailed(&self) -> bool {
        self.trailed
    }

    pub fn current_stop(&self) -> f64 {
        self.current_stop
    }

    pub fn activation_price(&self) -> f64 {
        self.activation_price
    }

    /// Feed a price. Arms on first activation and proposes a tighter stop.
    pub fn observe(&mut self, price: f64) -> TrailStep {
        let mut step = TrailStep::default();
        if !self.enabled || !price.is_finite() {
            return step;
        }

        if !self.armed {
            let reached = match self.direction {
                Direction::Long => price >= self.activation_price,
                Direction::Short => price <= self.activation_price,
            };
            if !reached {
                return step;
            }
            self.armed = true;
            step.armed_now = true;
        }

        let candidate = price - self.direction.sign() * self.distance;
        if self.improves(candidate) {
            step.candidate = Some(candidate);
        }
        step
    }

    /// Whether `stop` is strictly more favorable than the current stop.
    pub fn improves(&self, stop: f64) -> bool {
        match self.direction {
            Direction::Long => stop > self.current_stop,
            Direction::Short => stop < self.current_stop,
        }
    }

    /// Record a stop the exchange accepted. Never loosens.
    pub fn commit(&mut self, stop: f64) -> f64 {
        if self.improves(stop) {
            self.current_stop = stop;
            self.trailed = true;
        }
        self.current_stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> TrailingSettings {
        TrailingSettings {
            enabled: true,
            activation_fraction: 0.5,
            atr_mult: 1.0,
        }
    }

    #[test]
    fn test_long_arms_at_activation_fraction() {
        // entry 100, TP 120, SL 90, ATR 5 → activation at 110
        let mut trail = TrailingState::new(&enabled(), Direction::Long, 100.0, 120.0, 90.0, 5.0);
        assert_eq!(trail.activation_price(), 110.0);

        assert_eq!(trail.observe(109.0), TrailStep::default());
        assert!(!trail.is_armed());

        let step = trail.observe(110.0);
        assert!(step.armed_now);
        assert_eq!(step.candidate, Some(105.0));
    }

    #[test]
    fn test_arms_only_once() {
        let mut trail = TrailingState::new(&enabled(), Direction::Long, 100.0, 120.0, 90.0, 5.0);
        assert!(trail.observe(111.0).armed_now);
        assert!(!trail.observe(115.0).armed_now);
        // falling back below activation does not disarm
        trail.observe(101.0);
        assert!(trail.is_armed());
    }

    #[test]
    fn test_commit_never_loosens_long() {
        let mut trail = TrailingState::new(&enabled(), Direction::Long, 100.0, 120.0, 90.0, 5.0);
        assert!(!trail.has_trailed());
        assert_eq!(trail.commit(105.0), 105.0);
        assert_eq!(trail.commit(95.0), 105.0);
        assert!(trail.has_trailed());
        assert!(!trail.improves(104.0));
    }

    #[test]
    fn test_short_trails_downward() {
        // entry 100, TP 80, SL 110, ATR 4 → activation at 90
        let mut trail = TrailingState::new(&enabled(), Direction::Short, 100.0, 80.0, 110.0, 4.0);
        assert_eq!(trail.observe(91.0).candidate, None);
        let step = trail.observe(89.0);
        assert!(step.armed_now);
        assert_eq!(step.candidate, Some(93.0));
        trail.commit(93.0);
        // price bounces up: candidate would be worse
        assert_eq!(trail.observe(92.0).candidate, None);
        assert_eq!(trail.commit(97.0), 93.0);
    }

    #[test]
    fn test_disabled_never_proposes() {
        let mut trail = TrailingState::new(
            &TrailingSettings::default(),
            Direction::Long,
            100.0,
            120.0,
            90.0,
            5.0,
        );
        assert_eq!(trail.observe(200.0), TrailStep::default());
        assert!(!trail.is_armed());
    }

    #[test]
    fn test_candidate_below_current_stop_is_not_proposed() {
        // wide trailing distance: 110 - 25 = 85 is below SL 90
        let settings = TrailingSettings {
            atr_mult: 5.0,
            ..enabled()
        };
        let mut trail = TrailingState::new(&settings, Direction::Long, 100.0, 120.0, 90.0, 5.0);
        let step = trail.observe(110.0);
        assert!(step.armed_now);
        assert_eq!(step.candidate, None);
    }
}
