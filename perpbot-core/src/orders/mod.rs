//! Order execution — reliable submission, cancellation, and amendment.

pub mod executor;

pub use executor::{
    AbortToken, Backoff, CancelOutcome, ExecError, OrderExecutor, Outcome, RetryPolicy,
};
