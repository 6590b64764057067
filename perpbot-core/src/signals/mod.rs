//! Signal generation.
//!
//! The engine only ever sees snapshots of closed bars. It has no access to
//! positions or brackets; whether a signal is acted on is the bracket
//! manager's decision.

pub mod engine;

pub use engine::{confluence, ConfluenceFilters, NoSignal, SignalEngine};
