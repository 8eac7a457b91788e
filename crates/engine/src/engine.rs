//! Backtest orchestration: strategy → signals → simulator → summary

use tracing::{debug, info};

use crate::error::EngineResult;
use crate::simulator::{validate_series, TradeSimulator};
use crate::strategy::build_strategy;
use crate::summary::summarize;
use crate::types::*;

/// Runs one strategy over one price series
pub struct BacktestEngine;

impl BacktestEngine {
    /// Run a backtest on the given bars with the specified config.
    ///
    /// Configuration is validated before the bars are looked at. An empty
    /// series is valid and yields an empty result with a zeroed summary.
    pub fn run(config: &BacktestConfig, bars: &[PriceBar]) -> EngineResult<BacktestResult> {
        let strategy = build_strategy(&config.strategy)?;
        let simulator = TradeSimulator::new(config.simulator.clone())?;

        validate_series(bars)?;

        info!(
            symbol = %config.symbol,
            strategy = %strategy.name(),
            bars = bars.len(),
            capital = config.simulator.initial_cash,
            "Starting backtest"
        );

        let signals = strategy.generate_signals(bars);
        info!(count = signals.len(), "Generated signals");

        let output = simulator.run(bars, &signals)?;
        for trade in &output.trades {
            debug!(
                entry_time = trade.entry_time,
                exit_time = trade.exit_time,
                entry = trade.entry_price,
                exit = trade.exit_price,
                qty = trade.qty,
                pnl = trade.pnl(),
                "Trade"
            );
        }

        let summary = summarize(&output.trades, &output.equity_curve);

        info!(
            trades = summary.num_trades,
            win_rate = summary.win_rate_pct,
            total_return = summary.total_return_pct,
            max_drawdown = summary.max_drawdown_pct,
            open_position = output.open_position.is_some(),
            "Backtest complete"
        );

        Ok(BacktestResult {
            symbol: config.symbol.clone(),
            interval: config.interval.clone(),
            strategy: strategy.name(),
            start_time: bars.first().map(|b| b.timestamp).unwrap_or(0),
            end_time: bars.last().map(|b| b.timestamp).unwrap_or(0),
            signals,
            dropped_signals: output.dropped_signals,
            trades: output.trades,
            equity_curve: output.equity_curve,
            open_position: output.open_position,
            summary,
        })
    }
}
