//! Live polling against the paper exchange: paced, retried, and brackets left
//! resting on shutdown.

use chrono::{Duration, TimeZone, Utc};
use perpbot_core::domain::{Candle, Direction};
use perpbot_core::exchange::{Exchange, PaperExchange};
use perpbot_core::orders::AbortToken;
use perpbot_runner::{run_live, BotConfig, Journal};
use std::sync::Arc;

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

const CONFIG: &str = r#"
    [session]
    symbols = ["BTCUSDT"]
    poll_interval_ms = 1

    [indicators.cvd]
    enabled = false
    [indicators.vfi]
    enabled = false
    [indicators.tva]
    enabled = false

    [execution]
    base_delay_ms = 1
    max_delay_ms = 5
    rate_limit_interval_ms = 1

    [sizing]
    notional_usdt = 1000.0

    [instruments.BTCUSDT]
    tick_size = 0.1
    qty_step = 0.001
    min_qty = 0.001
    min_notional = 5.0
"#;

fn bar(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        start_time: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(i as i64),
        open,
        high,
        low,
        close,
        volume: 10.0,
        is_closed: true,
    }
}

fn gap_market() -> Arc<PaperExchange> {
    let mut candles: Vec<Candle> = (0..30)
        .map(|i| bar(i, 100_000.0, 100_010.0, 99_990.0, 100_000.0))
        .collect();
    candles.push(bar(30, 100_000.0, 100_120.0, 100_000.0, 100_100.0));
    candles.push(bar(31, 100_100.0, 100_150.0, 100_050.0, 100_120.0));

    let config = BotConfig::from_toml(CONFIG).unwrap();
    let paper = Arc::new(PaperExchange::new());
    paper.add_market(config.instrument("BTCUSDT").unwrap(), candles);
    paper.preload("BTCUSDT", 32);
    paper
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[test]
fn signal_is_entered_and_left_protected_on_shutdown() {
    let config = BotConfig::from_toml(CONFIG).unwrap();
    let paper = gap_market();

    let summary = run_live(&config, paper.clone(), Journal::disabled(), AbortToken::new(), Some(1)).unwrap();

    assert_eq!(summary.counters.ticks, 1);
    assert_eq!(summary.counters.signals, 1);
    assert_eq!(summary.trade_count, 0);
    assert!(summary.dataset_hash.is_none());

    let position = paper.position("BTCUSDT", Direction::Long).unwrap().unwrap();
    assert_eq!(position.size, 0.009);
    // TP and SL both resting
    assert_eq!(paper.open_orders("BTCUSDT").len(), 2);
}

#[test]
fn tripped_abort_runs_no_ticks() {
    let config = BotConfig::from_toml(CONFIG).unwrap();
    let paper = gap_market();
    let abort = AbortToken::new();
    abort.trip();

    let summary = run_live(&config, paper.clone(), Journal::disabled(), abort, None).unwrap();

    assert_eq!(summary.counters.ticks, 0);
    assert!(paper.open_orders("BTCUSDT").is_empty());
}
