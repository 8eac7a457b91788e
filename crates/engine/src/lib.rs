//! Backtest engine: single-instrument, long-only strategy evaluation
//!
//! Provides:
//! - Target-position strategies (SMA crossover, momentum, mean reversion)
//!   sharing one position → signal translation
//! - A single-position trade simulator producing trades and an equity curve
//! - Performance summary (return, drawdown, win rate)
//! - Parallel SMA parameter sweep
//! - Binance public API client and JSON snapshots for historical klines

pub mod api;
pub mod engine;
pub mod error;
pub mod simulator;
pub mod strategy;
pub mod summary;
pub mod sweep;
pub mod types;

// Re-exports for convenience
pub use api::{load_klines, save_klines, BinanceClient};
pub use engine::BacktestEngine;
pub use error::{EngineError, EngineResult};
pub use simulator::{validate_series, SimulationOutput, TradeSimulator};
pub use strategy::{
    build_strategy, positions_to_signals, MeanReversionStrategy, MomentumStrategy,
    SimpleMovingAverageStrategy, Strategy,
};
pub use summary::{max_drawdown_pct, summarize};
pub use sweep::{generate_sma_grid, run_sweep, SweepProgress, SweepRequest, SweepResult, SweepStatus};
pub use types::*;
