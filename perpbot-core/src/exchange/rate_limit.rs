//! Shared request pacing for all symbol workers.
//!
//! Every exchange call takes a slot: slots are at least `min_interval` apart
//! across the whole process. A rate-limit response opens a cooldown during
//! which no slot is handed out.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct LimiterState {
    next_slot: Instant,
    cooldown_until: Option<Instant>,
}

/// Minimum-interval limiter with a server-driven cooldown.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                next_slot: Instant::now(),
                cooldown_until: None,
            }),
            min_interval,
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the next slot without sleeping. Returns how long the caller
    /// must wait before using it.
    pub fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut state = self.lock();

        let mut earliest = state.next_slot.max(now);
        if let Some(until) = state.cooldown_until {
            if until > now {
                earliest = earliest.max(until);
            } else {
                state.cooldown_until = None;
            }
        }

        state.next_slot = earliest + self.min_interval;
        earliest.saturating_duration_since(now)
    }

    /// Block until a slot is available. Returns the time spent waiting.
    pub fn acquire(&self) -> Duration {
        let wait = self.reserve();
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        wait
    }

    /// Refuse slots for `cooldown` (server asked us to back off).
    pub fn penalize(&self, cooldown: Duration) {
        let until = Instant::now() + cooldown;
        let mut state = self.lock();
        state.cooldown_until = Some(state.cooldown_until.map_or(until, |u| u.max(until)));
    }

    /// Remaining cooldown time (zero if not cooling down).
    pub fn remaining_cooldown(&self) -> Duration {
        let state = self.lock();
        state
            .cooldown_until
            .map_or(Duration::ZERO, |u| u.saturating_duration_since(Instant::now()))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..10 {
            assert_eq!(limiter.reserve(), Duration::ZERO);
        }
    }

    #[test]
    fn slots_are_spaced_by_min_interval() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        assert_eq!(limiter.reserve(), Duration::ZERO);
        let second = limiter.reserve();
        assert!(second > Duration::from_secs(9), "second slot waited {second:?}");
        let third = limiter.reserve();
        assert!(third > Duration::from_secs(19), "third slot waited {third:?}");
    }

    #[test]
    fn penalize_delays_next_slot() {
        let limiter = RateLimiter::unlimited();
        limiter.penalize(Duration::from_secs(30));
        assert!(limiter.remaining_cooldown() > Duration::from_secs(29));
        assert!(limiter.reserve() > Duration::from_secs(29));
    }

    #[test]
    fn cooldown_expires() {
        let limiter = RateLimiter::unlimited();
        limiter.penalize(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(limiter.remaining_cooldown(), Duration::ZERO);
        assert_eq!(limiter.acquire(), Duration::ZERO);
    }
}
