//! sma-backtest: evaluate a moving-average crossover on historical klines
//!
//! Usage:
//!   sma-backtest run --symbol BTCUSDT --start 2024-01-01 --end 2024-03-01
//!   sma-backtest run --input data/btc_1h.json --fast-window 5 --slow-window 20
//!   sma-backtest sweep --start 2024-01-01 --end 2024-06-01 --fast 5,10 --slow 20,50

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use engine::{
    load_klines, price_series, run_sweep, save_klines, BacktestConfig, BacktestEngine,
    BacktestResult, BinanceClient, Kline, SimulatorConfig, StrategyKind, SweepProgress,
    SweepRequest, SweepResult,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "sma-backtest")]
#[command(about = "Backtest a moving-average crossover on historical prices", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest a single SMA(fast, slow) configuration
    Run {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        account: AccountArgs,
        /// Fast moving average window
        #[arg(long, default_value_t = 10)]
        fast_window: usize,
        /// Slow moving average window
        #[arg(long, default_value_t = 30)]
        slow_window: usize,
        /// Print every completed trade
        #[arg(long)]
        print_trades: bool,
        /// Optional JSON export path for the full result
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Backtest a grid of SMA windows in parallel and rank them
    Sweep {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        account: AccountArgs,
        /// Fast windows to try (comma-separated)
        #[arg(long, value_delimiter = ',', default_values_t = [5usize, 10, 15, 20])]
        fast: Vec<usize>,
        /// Slow windows to try (comma-separated)
        #[arg(long, value_delimiter = ',', default_values_t = [20usize, 30, 50, 100])]
        slow: Vec<usize>,
        /// Number of top results to show
        #[arg(long, default_value_t = 5)]
        top_n: usize,
    },
}

/// Where the price history comes from
#[derive(Args, Debug, Clone)]
struct DataArgs {
    /// Trading symbol, e.g. BTCUSDT
    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,
    /// Candle interval, e.g. 1m, 5m, 1h, 1d
    #[arg(long, default_value = "1h")]
    interval: String,
    /// Start date (YYYY-MM-DD or RFC 3339)
    #[arg(long, required_unless_present = "input")]
    start: Option<String>,
    /// End date (YYYY-MM-DD or RFC 3339)
    #[arg(long, required_unless_present = "input")]
    end: Option<String>,
    /// Read klines from a JSON snapshot instead of Binance
    #[arg(long)]
    input: Option<PathBuf>,
    /// Write the fetched klines to a JSON snapshot
    #[arg(long)]
    save_klines: Option<PathBuf>,
}

/// Account sizing
#[derive(Args, Debug, Clone)]
struct AccountArgs {
    /// Initial cash in quote currency
    #[arg(long, default_value_t = 10_000.0)]
    initial_cash: f64,
    /// Fraction of equity to allocate per trade (0-1]
    #[arg(long, default_value_t = 0.1)]
    risk_per_trade: f64,
    /// Realize a position still open on the last bar
    #[arg(long)]
    close_at_end: bool,
}

impl AccountArgs {
    fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            initial_cash: self.initial_cash,
            risk_per_trade: self.risk_per_trade,
            close_at_end: self.close_at_end,
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,sma_backtest=debug")
    } else {
        EnvFilter::new("info,engine=info,sma_backtest=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp into epoch millis
fn parse_date(input: &str) -> anyhow::Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", input))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("invalid date '{}'", input))?;
    Ok(midnight.and_utc().timestamp_millis())
}

fn format_time(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Run {
            data,
            account,
            fast_window,
            slow_window,
            print_trades,
            export,
        } => {
            cmd_run(data, account, fast_window, slow_window, print_trades, export).await?;
        }
        Commands::Sweep {
            data,
            account,
            fast,
            slow,
            top_n,
        } => {
            cmd_sweep(data, account, fast, slow, top_n).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Data loading
// ============================================================================

async fn load_data(data: &DataArgs) -> anyhow::Result<(Vec<Kline>, Option<i64>, Option<i64>)> {
    let start = data.start.as_deref().map(parse_date).transpose()?;
    let end = data.end.as_deref().map(parse_date).transpose()?;

    if let (Some(start_ms), Some(end_ms)) = (start, end) {
        if start_ms >= end_ms {
            bail!("--start must be before --end");
        }
    }

    let klines = if let Some(path) = &data.input {
        let loaded = load_klines(path)?;
        let total = loaded.len();
        let klines = filter_range(loaded, start, end);
        if klines.len() < total {
            info!(
                kept = klines.len(),
                total,
                "Trimmed snapshot to the requested date range"
            );
        }
        klines
    } else {
        let (Some(start_ms), Some(end_ms)) = (start, end) else {
            bail!("--start and --end are required when no --input is given");
        };

        let client = match std::env::var("BINANCE_BASE_URL") {
            Ok(url) => BinanceClient::with_base_url(url)?,
            Err(_) => BinanceClient::new()?,
        };
        client
            .get_klines_paginated(&data.symbol, &data.interval, start_ms, end_ms)
            .await?
    };

    if let Some(path) = &data.save_klines {
        save_klines(path, &klines)?;
    }

    Ok((klines, start, end))
}

/// Keep klines whose open time falls within `[start, end]`; missing bounds are open
fn filter_range(klines: Vec<Kline>, start: Option<i64>, end: Option<i64>) -> Vec<Kline> {
    klines
        .into_iter()
        .filter(|k| start.map_or(true, |s| k.open_time >= s))
        .filter(|k| end.map_or(true, |e| k.open_time <= e))
        .collect()
}

// ============================================================================
// Run command
// ============================================================================

async fn cmd_run(
    data: DataArgs,
    account: AccountArgs,
    fast_window: usize,
    slow_window: usize,
    print_trades: bool,
    export: Option<PathBuf>,
) -> anyhow::Result<()> {
    println!("\n=== sma-backtest v{} ===", APP_VERSION);

    let config = BacktestConfig {
        symbol: data.symbol.clone(),
        interval: data.interval.clone(),
        start_time: None,
        end_time: None,
        strategy: StrategyKind::Sma {
            fast_window,
            slow_window,
        },
        simulator: account.simulator_config(),
    };
    // Validate parameters before fetching any data
    engine::build_strategy(&config.strategy)?;
    engine::TradeSimulator::new(config.simulator.clone())?;

    let (klines, start_time, end_time) = load_data(&data).await?;
    if klines.is_empty() {
        error!("No data returned. Aborting.");
        return Ok(());
    }
    info!(
        "Fetched {} candles for {} @ {}",
        klines.len(),
        data.symbol,
        data.interval
    );

    let config = BacktestConfig {
        start_time,
        end_time,
        ..config
    };
    let bars = price_series(&klines);
    let result = BacktestEngine::run(&config, &bars)?;

    print_result(&data, &result, print_trades);

    if let Some(path) = export {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("\nExported result to {}", path.display());
    }

    Ok(())
}

fn print_result(data: &DataArgs, result: &BacktestResult, print_trades: bool) {
    println!("======================================\n");
    if print_trades {
        if result.trades.is_empty() {
            println!("No trades executed.");
        } else {
            println!("Trades:");
            for t in &result.trades {
                println!(
                    "{} → {} | entry={:.2}, exit={:.2}, qty={:.5}, pnl={:.2}",
                    format_time(t.entry_time),
                    format_time(t.exit_time),
                    t.entry_price,
                    t.exit_price,
                    t.qty,
                    t.pnl()
                );
            }
        }
    }

    let summary = &result.summary;
    println!("\n========== BACKTEST SUMMARY ==========");
    println!("Symbol           : {}", data.symbol);
    println!("Interval         : {}", data.interval);
    println!(
        "Period           : {} → {}",
        format_time(result.start_time),
        format_time(result.end_time)
    );
    println!("Strategy         : {}", result.strategy);
    println!("--------------------------------------");
    println!("Start equity     : {:.2}", summary.start_equity);
    println!("End equity       : {:.2}", summary.end_equity);
    println!("Total return     : {:.2}%", summary.total_return_pct);
    println!("Max drawdown     : {:.2}%", summary.max_drawdown_pct);
    println!("# of trades      : {}", summary.num_trades);
    println!("Win rate         : {:.2}%", summary.win_rate_pct);
    if let Some(pos) = &result.open_position {
        println!(
            "Open position    : {:.5} @ {:.2} since {}",
            pos.qty,
            pos.entry_price,
            format_time(pos.entry_time)
        );
    }
    if result.dropped_signals > 0 {
        println!("Dropped signals  : {}", result.dropped_signals);
    }
    println!("======================================");
}

// ============================================================================
// Sweep command
// ============================================================================

async fn cmd_sweep(
    data: DataArgs,
    account: AccountArgs,
    fast: Vec<usize>,
    slow: Vec<usize>,
    top_n: usize,
) -> anyhow::Result<()> {
    println!("\n=== sma-backtest v{} ===", APP_VERSION);

    let simulator = account.simulator_config();
    engine::TradeSimulator::new(simulator.clone())?;
    if engine::generate_sma_grid(&fast, &slow).is_empty() {
        bail!("no window pair satisfies fast < slow");
    }

    let (klines, _, _) = load_data(&data).await?;
    if klines.is_empty() {
        error!("No data returned. Aborting.");
        return Ok(());
    }

    let bars = Arc::new(price_series(&klines));
    engine::validate_series(&bars)?;

    let request = SweepRequest {
        symbol: data.symbol.clone(),
        interval: data.interval.clone(),
        fast_windows: fast,
        slow_windows: slow,
        simulator,
        top_n: Some(top_n),
    };

    let progress = Arc::new(SweepProgress::new());
    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        progress_for_ctrlc.cancel();
    });

    let results = run_sweep(request, bars, progress.clone()).await;
    print_sweep(&data, &results);
    Ok(())
}

fn print_sweep(data: &DataArgs, results: &[SweepResult]) {
    println!(
        "\n========== SWEEP: {} @ {} ==========",
        data.symbol, data.interval
    );
    if results.is_empty() {
        println!("No results.");
        return;
    }
    println!(
        "{:>4}  {:>10}  {:>10}  {:>9}  {:>9}  {:>6}  {:>8}",
        "Rank", "Fast", "Slow", "Return%", "MaxDD%", "Trades", "WinRate%"
    );
    for r in results {
        println!(
            "{:>4}  {:>10}  {:>10}  {:>9.2}  {:>9.2}  {:>6}  {:>8.2}",
            r.rank,
            r.fast_window,
            r.slow_window,
            r.summary.total_return_pct,
            r.summary.max_drawdown_pct,
            r.summary.num_trades,
            r.summary.win_rate_pct
        );
    }
}
