//! perpbot CLI — replay, signal scan, and config check commands.
//!
//! Commands:
//! - `replay` — run the full pipeline over candle CSVs on the paper exchange
//! - `signals` — list every signal the engine would emit for one symbol
//! - `check-config` — validate a config file and print its fingerprint

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use perpbot_core::orders::AbortToken;
use perpbot_runner::{
    load_candles, load_dir, run_replay, scan_signals, BotConfig, ConfigError, Journal, RunSummary,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "perpbot",
    about = "perpbot — confluence signals to bracketed perpetual-futures orders"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay candle CSVs through signals, sizing, and brackets on a paper exchange.
    Replay {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Directory holding one `<SYMBOL>.csv` per configured symbol.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Output directory for journals and summary. Overrides `[journal] dir`.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Print every signal the engine would emit over one candle CSV.
    Signals {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Candle CSV (timestamp,open,high,low,close,volume).
        #[arg(long)]
        data: PathBuf,

        /// Symbol the candles belong to.
        #[arg(long)]
        symbol: String,
    },
    /// Validate a config file and print its fingerprint.
    CheckConfig {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            config,
            data_dir,
            out_dir,
        } => run_replay_cmd(&config, &data_dir, out_dir),
        Commands::Signals {
            config,
            data,
            symbol,
        } => run_signals_cmd(&config, &data, &symbol),
        Commands::CheckConfig { config } => run_check_config(&config),
    }
}

fn load_config(path: &Path) -> Result<BotConfig> {
    BotConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn run_replay_cmd(config_path: &Path, data_dir: &Path, out_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;

    let data = load_dir(data_dir, &config.session.symbols)
        .with_context(|| format!("Failed to load candles from {}", data_dir.display()))?;

    let journal_cfg = &config.journal;
    let out_dir = out_dir.unwrap_or_else(|| journal_cfg.dir.clone());
    let journal = if journal_cfg.enabled {
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;
        Journal::open(
            &out_dir.join(&journal_cfg.trades_file),
            &out_dir.join(&journal_cfg.signals_file),
        )?
    } else {
        Journal::disabled()
    };

    let outcome = run_replay(&config, &data, journal, AbortToken::new())?;
    print_summary(&outcome.summary);

    if journal_cfg.enabled {
        let path = out_dir.join(&journal_cfg.summary_file);
        outcome.summary.write_json(&path)?;
        info!("summary written to {}", path.display());
        println!("Artifacts saved to: {}", out_dir.display());
    }
    Ok(())
}

fn run_signals_cmd(config_path: &Path, data_path: &Path, symbol: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let candles = load_candles(data_path)?;
    let signals = scan_signals(&config, symbol, &candles)?;

    for signal in &signals {
        println!("{}", serde_json::to_string(signal)?);
    }
    info!("{} signal(s) over {} candles", signals.len(), candles.len());
    Ok(())
}

fn run_check_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    match config.validate() {
        Ok(()) => {
            println!("OK  {}", config_path.display());
            println!("Fingerprint: {}", config.fingerprint());
            println!("Symbols:     {}", config.session.symbols.join(", "));
            println!("Entry mode:  {:?}", config.strategy.entry_mode);
            Ok(())
        }
        Err(ConfigError::Invalid(problems)) => {
            eprintln!("Invalid config {}:", config_path.display());
            for problem in &problems {
                eprintln!("  - {problem}");
            }
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== Replay Summary ===");
    println!("Config:        {}", summary.config_fingerprint);
    if let Some(hash) = &summary.dataset_hash {
        println!("Dataset:       {hash}");
    }
    println!("Ticks:         {}", summary.counters.ticks);
    println!(
        "Signals:       {} ({} skipped)",
        summary.counters.signals, summary.counters.skipped_signals
    );
    println!("Trades:        {}", summary.trade_count);
    println!("Win rate:      {:.1}%", summary.win_rate * 100.0);
    println!("Net P&L:       {:.4} USDT", summary.net_pnl);
    println!("Fees:          {:.4} USDT", summary.fees);
    println!("Profit factor: {:.2}", summary.profit_factor);
    println!("Max drawdown:  {:.4} USDT", summary.max_drawdown);
    println!("Max loss run:  {}", summary.max_consecutive_losses);

    if !summary.exit_reasons.is_empty() {
        println!("\nExit reasons:");
        for (reason, count) in &summary.exit_reasons {
            println!("  {reason:<16} {count}");
        }
    }
    if summary.per_symbol.len() > 1 {
        println!("\n{:<12} {:>6} {:>6} {:>14}", "Symbol", "Trades", "Wins", "Net P&L");
        println!("{}", "-".repeat(41));
        for (symbol, s) in &summary.per_symbol {
            println!("{:<12} {:>6} {:>6} {:>14.4}", symbol, s.trades, s.wins, s.net_pnl);
        }
    }
    if summary.counters.critical_events > 0 {
        println!(
            "\nWARNING: {} critical event(s), check the log",
            summary.counters.critical_events
        );
    }
}
