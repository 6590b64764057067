//! Bracket lifecycle — one trade from entry to closure.
//!
//! A bracket is the entry order plus the take-profit / stop-loss pair that
//! protects the resulting position. The manager moves brackets through their
//! phases; the book owns them.

pub mod book;
pub mod config;
pub mod events;
pub mod manager;
pub mod state;
pub mod trailing;

pub use book::BracketBook;
pub use config::{BracketConfig, BracketError, FeeRates};
pub use events::{BracketEvent, SkipReason};
pub use manager::{bracket_prices, BracketManager};
pub use state::{Bracket, BracketPhase, CancelReason, Leg, PendingExit};
pub use trailing::{TrailStep, TrailingSettings, TrailingState};
