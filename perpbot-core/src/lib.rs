//! perpbot core — domain types, indicators, signals, sizing, order execution,
//! and the bracket state machine.
//!
//! This crate contains everything between closed candles and exchange orders:
//! - Domain types (candles, orders, positions, instruments, trades)
//! - Indicator set (ATR, CVD, TVA, VFI, FVG) and per-bar snapshots
//! - Confluence signal engine (unanimous, fail-closed)
//! - Position sizing with exchange quantization
//! - Order executor with retries and link-id idempotency
//! - Bracket manager: entry, TP/SL placement, OCO, trailing, reconciliation
//! - `Exchange` trait and an in-process paper exchange

pub mod bracket;
pub mod domain;
pub mod exchange;
pub mod indicators;
pub mod orders;
pub mod signals;
pub mod sizing;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything a symbol worker owns can move to a
    /// rayon thread, and everything shared across workers is Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Candle>();
        require_sync::<domain::Candle>();
        require_send::<domain::Order>();
        require_sync::<domain::Order>();
        require_send::<domain::Signal>();
        require_sync::<domain::Signal>();
        require_send::<domain::TradeRecord>();
        require_sync::<domain::TradeRecord>();
        require_send::<domain::Instrument>();
        require_sync::<domain::Instrument>();

        // Per-symbol state
        require_send::<indicators::IndicatorSet>();
        require_send::<indicators::SnapshotSeries>();
        require_send::<signals::SignalEngine>();
        require_send::<bracket::BracketBook>();
        require_send::<bracket::BracketManager>();
        require_sync::<bracket::BracketManager>();

        // Shared
        require_send::<orders::OrderExecutor>();
        require_sync::<orders::OrderExecutor>();
        require_send::<exchange::PaperExchange>();
        require_sync::<exchange::PaperExchange>();
        require_sync::<exchange::RateLimiter>();
    }
}
