//! perpbot runner — configuration, per-symbol workers, scheduling, replay.
//!
//! This crate builds on `perpbot-core` to provide:
//! - TOML configuration with defaults, validation, and a fingerprint
//! - Candle CSV loading for replay and signal scans
//! - Per-symbol workers run in parallel by the scheduler
//! - Replay on the paper exchange with end-of-data closing
//! - Live polling against any exchange, paced and retried
//! - Trade journal, signal log, and JSON run summary

pub mod config;
pub mod data;
pub mod journal;
pub mod live;
pub mod replay;
pub mod scheduler;
pub mod summary;
pub mod worker;

pub use config::{BotConfig, ConfigError};
pub use data::{dataset_hash, load_candles, load_dir, DataError};
pub use journal::Journal;
pub use live::{build_live, run_live};
pub use replay::{build_replay, run_replay, scan_signals, ReplayOutcome};
pub use scheduler::Scheduler;
pub use summary::{RunCounters, RunSummary};
pub use worker::{SymbolWorker, TickReport};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn workers_can_move_to_the_pool() {
        assert_send::<SymbolWorker>();
        assert_send::<TickReport>();
        assert_send::<Scheduler>();
    }
}
