//! OrderExecutor — retry, classification, and idempotent resubmission around
//! every exchange call the bot makes.

use crate::domain::{
    Candle, Direction, Instrument, LinkId, Order, OrderId, OrderRequest, Position,
};
use crate::exchange::{Exchange, ExchangeError, RateLimiter};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Longest single sleep between abort checks.
const ABORT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Linear,
    #[default]
    Exponential,
}

/// Bounded retry schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Random extra delay as a fraction of the computed delay (0 disables).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff: Backoff::Exponential,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately. Used by replay and tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        };
        let delay = if self.jitter > 0.0 && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..self.jitter);
            delay.mul_f64(1.0 + extra)
        } else {
            delay
        };
        delay.min(self.max_delay)
    }
}

/// Shared flag that abandons retry sequences at the next attempt boundary.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecError {
    #[error("{op} failed after {attempts} attempt(s): {source}")]
    Fatal {
        op: &'static str,
        attempts: u32,
        source: ExchangeError,
    },

    #[error("{op} gave up after {attempts} attempts, last error: {last}")]
    Exhausted {
        op: &'static str,
        attempts: u32,
        last: ExchangeError,
    },

    #[error("{op} aborted after {attempts} attempt(s)")]
    Aborted { op: &'static str, attempts: u32 },
}

impl ExecError {
    pub fn attempts(&self) -> u32 {
        match self {
            ExecError::Fatal { attempts, .. }
            | ExecError::Exhausted { attempts, .. }
            | ExecError::Aborted { attempts, .. } => *attempts,
        }
    }

    /// The exchange error that ended the sequence, if any.
    pub fn exchange_error(&self) -> Option<&ExchangeError> {
        match self {
            ExecError::Fatal { source, .. } => Some(source),
            ExecError::Exhausted { last, .. } => Some(last),
            ExecError::Aborted { .. } => None,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, ExecError::Fatal { .. })
    }
}

/// A successful call and how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The order was already filled, cancelled, or unknown.
    AlreadyInactive,
}

/// Reliability wrapper around an [`Exchange`].
///
/// Cheap to clone; clones share the exchange, the rate limiter and the abort
/// token.
#[derive(Clone)]
pub struct OrderExecutor {
    exchange: Arc<dyn Exchange>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    abort: AbortToken,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self {
            exchange,
            limiter: Arc::new(RateLimiter::unlimited()),
            policy: RetryPolicy::default(),
            abort: AbortToken::new(),
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_abort(mut self, abort: AbortToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn abort_token(&self) -> &AbortToken {
        &self.abort
    }

    pub fn exchange(&self) -> &dyn Exchange {
        self.exchange.as_ref()
    }

    /// Submit an order. Retries first ask the exchange whether an earlier
    /// attempt with the same link id was accepted and return that order.
    pub fn submit(&self, request: &OrderRequest) -> Result<Outcome<Order>, ExecError> {
        let outcome = self.run("submit", |attempt| {
            if attempt > 1 {
                if let Some(existing) = self
                    .exchange
                    .order_by_link_id(&request.symbol, &request.link_id)?
                {
                    info!(
                        "{}: order {} already accepted as {}, not resubmitting",
                        request.symbol, request.link_id, existing.id
                    );
                    return Ok(existing);
                }
            }
            self.exchange.place_order(request)
        })?;
        debug!(
            "{}: {} {:?} {:?} qty {} accepted as {} after {} attempt(s)",
            request.symbol,
            request.link_id,
            request.side,
            request.kind,
            request.qty,
            outcome.value.id,
            outcome.attempts
        );
        Ok(outcome)
    }

    /// Cancel an order. An order that is already inactive is not an error.
    pub fn cancel(&self, symbol: &str, order_id: &OrderId) -> Result<Outcome<CancelOutcome>, ExecError> {
        match self.run("cancel", |_| self.exchange.cancel_order(symbol, order_id)) {
            Ok(outcome) => Ok(Outcome {
                value: CancelOutcome::Cancelled,
                attempts: outcome.attempts,
            }),
            Err(ExecError::Fatal { source, attempts, .. }) if source.is_inactive_order() => {
                debug!("{symbol}: cancel of {order_id} found it inactive ({source})");
                Ok(Outcome {
                    value: CancelOutcome::AlreadyInactive,
                    attempts,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub fn amend(
        &self,
        symbol: &str,
        order_id: &OrderId,
        new_price: f64,
    ) -> Result<Outcome<()>, ExecError> {
        self.run("amend", |_| {
            self.exchange.amend_order(symbol, order_id, new_price)
        })
    }

    pub fn status(&self, symbol: &str, order_id: &OrderId) -> Result<Order, ExecError> {
        self.run("status", |_| self.exchange.order_status(symbol, order_id))
            .map(|o| o.value)
    }

    /// Look up an order by its link id.
    pub fn find_by_link(&self, symbol: &str, link_id: &LinkId) -> Result<Option<Order>, ExecError> {
        self.run("find_by_link", |_| {
            self.exchange.order_by_link_id(symbol, link_id)
        })
        .map(|o| o.value)
    }

    pub fn position(&self, symbol: &str, direction: Direction) -> Result<Option<Position>, ExecError> {
        self.run("position", |_| self.exchange.position(symbol, direction))
            .map(|o| o.value)
    }

    pub fn mark_price(&self, symbol: &str) -> Result<f64, ExecError> {
        self.run("mark_price", |_| self.exchange.mark_price(symbol))
            .map(|o| o.value)
    }

    pub fn instrument(&self, symbol: &str) -> Result<Instrument, ExecError> {
        self.run("instrument", |_| self.exchange.instrument(symbol))
            .map(|o| o.value)
    }

    pub fn closed_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExecError> {
        self.run("candles", |_| {
            self.exchange.closed_candles(symbol, timeframe, limit)
        })
        .map(|o| o.value)
    }

    /// Run `call` until it succeeds, fails fatally, runs out of attempts, or
    /// the abort token trips. `call` receives the 1-based attempt number.
    fn run<T>(
        &self,
        op: &'static str,
        mut call: impl FnMut(u32) -> Result<T, ExchangeError>,
    ) -> Result<Outcome<T>, ExecError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if self.abort.is_tripped() {
                return Err(ExecError::Aborted {
                    op,
                    attempts: attempt,
                });
            }
            attempt += 1;
            self.limiter.acquire();

            let err = match call(attempt) {
                Ok(value) => {
                    return Ok(Outcome {
                        value,
                        attempts: attempt,
                    })
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(ExecError::Fatal {
                    op,
                    attempts: attempt,
                    source: err,
                });
            }
            if attempt >= max_attempts {
                warn!("{op}: giving up after {attempt} attempts: {err}");
                return Err(ExecError::Exhausted {
                    op,
                    attempts: attempt,
                    last: err,
                });
            }

            let mut delay = self.policy.delay_for(attempt);
            if let ExchangeError::RateLimited { retry_after } = &err {
                if let Some(hint) = retry_after {
                    delay = delay.max(*hint);
                }
                self.limiter.penalize(delay);
            }

            warn!("{op}: attempt {attempt}/{max_attempts} failed ({err}), retrying in {delay:?}");
            if !self.pause(delay) {
                return Err(ExecError::Aborted {
                    op,
                    attempts: attempt,
                });
            }
        }
    }

    /// Sleep for `delay`, waking early if aborted. Returns false on abort.
    fn pause(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.abort.is_tripped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(ABORT_POLL));
        }
    }
}
