//! Single-position trade simulator
//!
//! Walks a closing-price series in time order, applies BUY/SELL signals that
//! land exactly on a bar timestamp, and marks the account to market at every
//! bar. Long-only, no pyramiding, no costs.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::{EquityPoint, OpenPosition, PriceBar, Side, Signal, SimulatorConfig, Trade};

/// Everything a simulation run produces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationOutput {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    /// Position still open after the last bar (never set when `close_at_end` is on)
    pub open_position: Option<OpenPosition>,
    /// Signals that were never applied: no matching bar timestamp, or replaced
    /// by a later signal on the same timestamp
    pub dropped_signals: usize,
}

/// Check that a price series is usable: strictly increasing timestamps and
/// finite, positive closes.
pub fn validate_series(bars: &[PriceBar]) -> EngineResult<()> {
    for (i, bar) in bars.iter().enumerate() {
        if !(bar.close.is_finite() && bar.close > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "bar {} at {} has invalid close {}",
                i, bar.timestamp, bar.close
            )));
        }
        if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
            return Err(EngineError::InvalidInput(format!(
                "timestamps not strictly increasing at bar {} ({} after {})",
                i,
                bar.timestamp,
                bars[i - 1].timestamp
            )));
        }
    }
    Ok(())
}

/// Converts signals into trades and an equity curve
#[derive(Debug, Clone)]
pub struct TradeSimulator {
    config: SimulatorConfig,
}

impl TradeSimulator {
    pub fn new(config: SimulatorConfig) -> EngineResult<Self> {
        if !(config.initial_cash.is_finite() && config.initial_cash > 0.0) {
            return Err(EngineError::InvalidConfiguration(format!(
                "initial_cash must be positive, got {}",
                config.initial_cash
            )));
        }
        if !(config.risk_per_trade > 0.0 && config.risk_per_trade <= 1.0) {
            return Err(EngineError::InvalidConfiguration(format!(
                "risk_per_trade must be in (0, 1], got {}",
                config.risk_per_trade
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Run the simulation. Signals must be in time order; a later signal on the
    /// same timestamp replaces an earlier one.
    pub fn run(&self, bars: &[PriceBar], signals: &[Signal]) -> EngineResult<SimulationOutput> {
        validate_series(bars)?;

        let mut pending: HashMap<i64, Side> = HashMap::with_capacity(signals.len());
        let mut replaced = 0usize;
        for signal in signals {
            if let Some(previous) = pending.insert(signal.timestamp, signal.side) {
                replaced += 1;
                debug!(
                    time = signal.timestamp,
                    replaced = %previous,
                    by = %signal.side,
                    "Duplicate signal timestamp, keeping the later signal"
                );
            }
        }

        let mut cash = self.config.initial_cash;
        let mut position: Option<OpenPosition> = None;
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());

        for bar in bars {
            match pending.remove(&bar.timestamp) {
                Some(Side::Buy) if position.is_none() => {
                    let alloc = cash * self.config.risk_per_trade;
                    let qty = alloc / bar.close;
                    debug!(
                        time = bar.timestamp,
                        price = bar.close,
                        qty,
                        "Opened LONG position"
                    );
                    position = Some(OpenPosition {
                        entry_time: bar.timestamp,
                        entry_price: bar.close,
                        qty,
                    });
                }
                Some(Side::Sell) => {
                    if let Some(pos) = position.take() {
                        let trade = close_position(pos, bar);
                        cash += trade.pnl();
                        debug!(
                            entry = trade.entry_price,
                            exit = trade.exit_price,
                            pnl = trade.pnl(),
                            "Closed position"
                        );
                        trades.push(trade);
                    }
                }
                // BUY while long: no pyramiding
                Some(Side::Buy) | None => {}
            }

            let unrealized = position
                .as_ref()
                .map(|pos| pos.unrealized_pnl(bar.close))
                .unwrap_or(0.0);
            equity_curve.push(EquityPoint {
                time: bar.timestamp,
                equity: cash + unrealized,
            });
        }

        if self.config.close_at_end {
            if let (Some(pos), Some(last)) = (position.take(), bars.last()) {
                let trade = close_position(pos, last);
                debug!(pnl = trade.pnl(), "Closed remaining position at last bar");
                trades.push(trade);
            }
        }

        let unmatched = pending.len();
        if unmatched > 0 {
            warn!(
                dropped = unmatched,
                "Signals did not match any bar timestamp and were ignored"
            );
        }
        if replaced > 0 {
            warn!(replaced, "Signals replaced by a later signal on the same timestamp");
        }
        let dropped_signals = unmatched + replaced;

        Ok(SimulationOutput {
            trades,
            equity_curve,
            open_position: position,
            dropped_signals,
        })
    }
}

fn close_position(pos: OpenPosition, bar: &PriceBar) -> Trade {
    Trade {
        entry_time: pos.entry_time,
        exit_time: bar.timestamp,
        entry_price: pos.entry_price,
        exit_price: bar.close,
        qty: pos.qty,
    }
}
