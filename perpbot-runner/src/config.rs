//! Bot configuration, loaded from TOML.
//!
//! Every section and field has a default, so a config file only needs the
//! values that differ. `validate()` collects every problem instead of
//! stopping at the first one.
//!
//! ```toml
//! [session]
//! symbols = ["BTCUSDT"]
//! timeframe = "1m"
//!
//! [strategy]
//! entry_mode = "limit"
//! sl_atr_mult = 2.0
//! tp_atr_mult = 4.0
//!
//! [instruments.BTCUSDT]
//! tick_size = 0.1
//! qty_step = 0.001
//! min_qty = 0.001
//! min_notional = 5.0
//! ```

use chrono::Duration as ChronoDuration;
use perpbot_core::bracket::{BracketConfig, FeeRates, TrailingSettings};
use perpbot_core::domain::{EntryMode, Instrument};
use perpbot_core::exchange::RateLimiter;
use perpbot_core::indicators::IndicatorSettings;
use perpbot_core::orders::{Backoff, RetryPolicy};
use perpbot_core::sizing::{PositionSizer, SizingMethod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

// ── Sections ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub symbols: Vec<String>,
    pub timeframe: String,
    /// Closed candles fetched per tick for the indicator computation.
    pub candle_window: usize,
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            timeframe: "1m".to_string(),
            candle_window: 200,
            poll_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyConfig {
    pub entry_mode: EntryMode,
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            entry_mode: EntryMode::Market,
            sl_atr_mult: 2.0,
            tp_atr_mult: 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_long_trades: usize,
    pub max_short_trades: usize,
    pub hedge_mode: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_long_trades: 1,
            max_short_trades: 1,
            hedge_mode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
    pub jitter: f64,
    /// Minimum spacing between exchange requests across all symbols.
    pub rate_limit_interval_ms: u64,
    pub order_timeout_secs: u64,
    pub max_hold_secs: Option<u64>,
    pub protection_attempts: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            backoff: Backoff::Exponential,
            jitter: 0.0,
            rate_limit_interval_ms: 100,
            order_timeout_secs: 300,
            max_hold_secs: None,
            protection_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SizingKind {
    #[default]
    FixedNotional,
    FixedQuantity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SizingConfig {
    pub method: SizingKind,
    /// USDT per trade for `fixed_notional`.
    pub notional_usdt: f64,
    /// Contracts per trade for `fixed_quantity`.
    pub quantity: f64,
    pub max_qty: Option<f64>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            method: SizingKind::FixedNotional,
            notional_usdt: 100.0,
            quantity: 0.001,
            max_qty: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub trades_file: String,
    pub signals_file: String,
    pub summary_file: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("journal"),
            trades_file: "trades.csv".to_string(),
            signals_file: "signals.csv".to_string(),
            summary_file: "summary.json".to_string(),
        }
    }
}

/// Lot and price rules for one symbol, as published by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentSpec {
    pub tick_size: f64,
    pub qty_step: f64,
    pub min_qty: f64,
    #[serde(default)]
    pub min_notional: f64,
    #[serde(default)]
    pub max_qty: Option<f64>,
}

impl InstrumentSpec {
    pub fn to_instrument(&self, symbol: &str) -> Instrument {
        let instrument = Instrument::new(symbol, self.tick_size, self.qty_step, self.min_qty)
            .with_min_notional(self.min_notional);
        match self.max_qty {
            Some(max_qty) => instrument.with_max_qty(max_qty),
            None => instrument,
        }
    }
}

// ── Root ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BotConfig {
    pub session: SessionConfig,
    pub indicators: IndicatorSettings,
    pub strategy: StrategyConfig,
    pub trailing: TrailingSettings,
    pub limits: LimitsConfig,
    pub execution: ExecutionConfig,
    pub sizing: SizingConfig,
    pub fees: FeeRates,
    pub journal: JournalConfig,
    pub instruments: BTreeMap<String, InstrumentSpec>,
}

impl BotConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// BLAKE3 of the canonical JSON form. Two runs with the same fingerprint
    /// used the same settings.
    pub fn fingerprint(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => blake3::hash(json.as_bytes()).to_hex()[..16].to_string(),
            Err(_) => "unknown".to_string(),
        }
    }

    /// Check every section. Returns all problems found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let session = &self.session;
        if session.symbols.is_empty() {
            problems.push("session.symbols must not be empty".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for symbol in &session.symbols {
            if !seen.insert(symbol) {
                problems.push(format!("session.symbols lists {symbol} twice"));
            }
            match self.instruments.get(symbol) {
                None => problems.push(format!("no [instruments.{symbol}] section")),
                Some(spec) => {
                    if let Err(e) = spec.to_instrument(symbol).validate() {
                        problems.push(format!("instruments.{symbol}: {e}"));
                    }
                }
            }
        }
        if session.timeframe.trim().is_empty() {
            problems.push("session.timeframe must not be empty".to_string());
        }
        if let Err(e) = self.indicators.validate() {
            problems.push(format!("indicators: {e}"));
        }
        if session.candle_window <= self.warmup_candles() {
            problems.push(format!(
                "session.candle_window ({}) must exceed the indicator warm-up ({} candles)",
                session.candle_window,
                self.warmup_candles()
            ));
        }
        if self.indicators.enabled_directional() == 0 {
            problems.push("no directional indicator enabled; no signal could ever fire".to_string());
        }
        if self.strategy.entry_mode == EntryMode::Limit && !self.indicators.fvg.enabled {
            problems.push("strategy.entry_mode = \"limit\" needs indicators.fvg enabled".to_string());
        }

        let exec = &self.execution;
        if exec.max_attempts == 0 {
            problems.push("execution.max_attempts must be at least 1".to_string());
        }
        if exec.max_delay_ms < exec.base_delay_ms {
            problems.push("execution.max_delay_ms must be >= base_delay_ms".to_string());
        }
        if !(exec.jitter >= 0.0 && exec.jitter <= 1.0) {
            problems.push(format!("execution.jitter must be in [0, 1], got {}", exec.jitter));
        }

        let sizing = &self.sizing;
        match sizing.method {
            SizingKind::FixedNotional if !(sizing.notional_usdt > 0.0) => {
                problems.push("sizing.notional_usdt must be > 0".to_string())
            }
            SizingKind::FixedQuantity if !(sizing.quantity > 0.0) => {
                problems.push("sizing.quantity must be > 0".to_string())
            }
            _ => {}
        }
        if sizing.max_qty.is_some_and(|q| !(q > 0.0)) {
            problems.push("sizing.max_qty must be > 0 when set".to_string());
        }

        if let Err(e) = self.bracket_config().validate() {
            problems.push(e.to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    fn warmup_candles(&self) -> usize {
        perpbot_core::indicators::IndicatorSet::new(&self.indicators)
            .map(|set| set.warmup_candles())
            .unwrap_or(0)
    }

    // ── Conversions into core settings ──

    pub fn bracket_config(&self) -> BracketConfig {
        let exec = &self.execution;
        BracketConfig {
            sl_atr_mult: self.strategy.sl_atr_mult,
            tp_atr_mult: self.strategy.tp_atr_mult,
            trailing: self.trailing.clone(),
            max_long_trades: self.limits.max_long_trades,
            max_short_trades: self.limits.max_short_trades,
            hedge_mode: self.limits.hedge_mode,
            order_timeout: ChronoDuration::seconds(exec.order_timeout_secs as i64),
            max_hold: exec
                .max_hold_secs
                .map(|secs| ChronoDuration::seconds(secs as i64)),
            protection_attempts: exec.protection_attempts,
            fees: self.fees,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let exec = &self.execution;
        RetryPolicy {
            max_attempts: exec.max_attempts,
            base_delay: Duration::from_millis(exec.base_delay_ms),
            max_delay: Duration::from_millis(exec.max_delay_ms),
            backoff: exec.backoff,
            jitter: exec.jitter,
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(Duration::from_millis(self.execution.rate_limit_interval_ms))
    }

    pub fn sizer(&self) -> PositionSizer {
        let method = match self.sizing.method {
            SizingKind::FixedNotional => SizingMethod::FixedNotional {
                usdt: self.sizing.notional_usdt,
            },
            SizingKind::FixedQuantity => SizingMethod::FixedQuantity {
                qty: self.sizing.quantity,
            },
        };
        let sizer = PositionSizer::new(method);
        match self.sizing.max_qty {
            Some(max_qty) => sizer.with_max_qty(max_qty),
            None => sizer,
        }
    }

    pub fn instrument(&self, symbol: &str) -> Option<Instrument> {
        self.instruments
            .get(symbol)
            .map(|spec| spec.to_instrument(symbol))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.poll_interval_ms)
    }
}
