//! Types for the backtesting engine

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single candlestick (OHLCV) as delivered by the market data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

/// A timestamped closing price, the only bar data the simulation consumes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub close: f64,
}

impl PriceBar {
    pub fn new(timestamp: i64, close: f64) -> Self {
        Self { timestamp, close }
    }
}

impl From<&Kline> for PriceBar {
    fn from(kline: &Kline) -> Self {
        Self {
            timestamp: kline.open_time,
            close: kline.close.to_f64().unwrap_or(f64::NAN),
        }
    }
}

/// Project klines onto the closing-price series, keyed by open time
pub fn price_series(klines: &[Kline]) -> Vec<PriceBar> {
    klines.iter().map(PriceBar::from).collect()
}

/// Desired exposure at a bar (long-only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPosition {
    #[default]
    Flat,
    Long,
}

impl TargetPosition {
    pub fn as_i8(self) -> i8 {
        match self {
            TargetPosition::Flat => 0,
            TargetPosition::Long => 1,
        }
    }
}

/// Side of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// A discrete entry/exit event at a bar timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: i64,
    pub side: Side,
}

impl Signal {
    pub fn buy(timestamp: i64) -> Self {
        Self {
            timestamp,
            side: Side::Buy,
        }
    }

    pub fn sell(timestamp: i64) -> Self {
        Self {
            timestamp,
            side: Side::Sell,
        }
    }
}

/// A completed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub qty: f64,
}

impl Trade {
    /// Realized profit in quote currency
    pub fn pnl(&self) -> f64 {
        (self.exit_price - self.entry_price) * self.qty
    }

    /// Price change from entry to exit, in percent
    pub fn pnl_pct(&self) -> f64 {
        if self.entry_price > 0.0 {
            (self.exit_price / self.entry_price - 1.0) * 100.0
        } else {
            0.0
        }
    }

    pub fn is_win(&self) -> bool {
        self.pnl() > 0.0
    }
}

/// A point on the equity curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: i64,
    pub equity: f64,
}

/// A long position still open when the series ran out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub entry_time: i64,
    pub entry_price: f64,
    pub qty: f64,
}

impl OpenPosition {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.qty
    }
}

/// Scalar statistics of a finished run. All percentages are on a 0–100 scale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub start_equity: f64,
    pub end_equity: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub num_trades: usize,
    pub win_rate_pct: f64,
}

/// Account and sizing parameters for the trade simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub initial_cash: f64,
    /// Fraction of current equity allocated per entry, in (0, 1]
    pub risk_per_trade: f64,
    /// Realize a position left open on the last bar instead of leaving it unrealized
    #[serde(default)]
    pub close_at_end: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            initial_cash: 10_000.0,
            risk_per_trade: 0.1,
            close_at_end: false,
        }
    }
}

/// Strategy variant and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyKind {
    Sma {
        fast_window: usize,
        slow_window: usize,
    },
    Momentum {
        lookback: usize,
        threshold_pct: f64,
    },
    MeanReversion {
        period: usize,
        multiplier: f64,
    },
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::Sma {
            fast_window: 10,
            slow_window: 30,
        }
    }
}

/// Configuration for a backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub symbol: String,
    pub interval: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub strategy: StrategyKind,
    pub simulator: SimulatorConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            start_time: None,
            end_time: None,
            strategy: StrategyKind::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

/// Result of a backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub interval: String,
    pub strategy: String,
    pub start_time: i64,
    pub end_time: i64,
    pub signals: Vec<Signal>,
    /// Signals whose timestamp matched no bar
    pub dropped_signals: usize,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub open_position: Option<OpenPosition>,
    pub summary: Summary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_bar_from_kline_uses_open_time_and_close() {
        let kline = Kline {
            open_time: 1_704_067_200_000,
            open: dec!(100),
            high: dec!(105),
            low: dec!(95),
            close: dec!(102.5),
            volume: dec!(123.45),
            close_time: 1_704_070_799_999,
        };

        let bar = PriceBar::from(&kline);
        assert_eq!(bar.timestamp, 1_704_067_200_000);
        assert_eq!(bar.close, 102.5);
        assert_eq!(price_series(&[kline.clone(), kline]).len(), 2);
    }

    #[test]
    fn test_trade_pnl_and_win() {
        let win = Trade {
            entry_time: 0,
            exit_time: 1,
            entry_price: 100.0,
            exit_price: 110.0,
            qty: 1.0,
        };
        assert_eq!(win.pnl(), 10.0);
        assert!(win.is_win());
        assert!((win.pnl_pct() - 10.0).abs() < 1e-9);

        let flat = Trade {
            exit_price: 100.0,
            ..win
        };
        assert_eq!(flat.pnl(), 0.0);
        assert!(!flat.is_win());
    }

    #[test]
    fn test_target_position_encoding() {
        assert_eq!(TargetPosition::Flat.as_i8(), 0);
        assert_eq!(TargetPosition::Long.as_i8(), 1);
        assert_eq!(TargetPosition::default(), TargetPosition::Flat);
    }

    #[test]
    fn test_strategy_kind_serde_tag() {
        let kind: StrategyKind =
            serde_json::from_str(r#"{"type":"sma","fast_window":2,"slow_window":3}"#).unwrap();
        assert_eq!(
            kind,
            StrategyKind::Sma {
                fast_window: 2,
                slow_window: 3
            }
        );
    }
}
