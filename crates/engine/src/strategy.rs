//! Target-position strategies and the shared position → signal translation
//!
//! Every strategy turns a closing-price series into a dense series of
//! `TargetPosition`s, one per bar. Discrete BUY/SELL events are always derived
//! from that series by [`positions_to_signals`], so crossover detection lives in
//! exactly one place no matter which indicator drives the position.

use std::collections::VecDeque;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use ta::indicators::{BollingerBands, RateOfChange};
use ta::Next;

use crate::error::{EngineError, EngineResult};
use crate::types::{PriceBar, Signal, StrategyKind, TargetPosition};

// ============================================================================
// Core trait
// ============================================================================

/// A rule that states the desired position at every bar of a price series
pub trait Strategy: Send + Sync {
    fn name(&self) -> String;

    /// One position per input bar. Bars where the indicator lacks history are `Flat`.
    fn generate_target_positions(&self, bars: &[PriceBar]) -> Vec<TargetPosition>;

    /// Sparse entry/exit events in ascending timestamp order
    fn generate_signals(&self, bars: &[PriceBar]) -> Vec<Signal> {
        let positions = self.generate_target_positions(bars);
        positions_to_signals(bars, &positions)
    }
}

/// Emit BUY on each Flat→Long transition and SELL on each Long→Flat transition.
///
/// The position before the first bar is taken to be `Flat`, so a series that
/// starts out Long emits a BUY at its first bar.
pub fn positions_to_signals(bars: &[PriceBar], positions: &[TargetPosition]) -> Vec<Signal> {
    let mut signals = Vec::new();
    let mut prev = TargetPosition::Flat;

    for (bar, &pos) in bars.iter().zip(positions) {
        match (prev, pos) {
            (TargetPosition::Flat, TargetPosition::Long) => {
                signals.push(Signal::buy(bar.timestamp));
            }
            (TargetPosition::Long, TargetPosition::Flat) => {
                signals.push(Signal::sell(bar.timestamp));
            }
            _ => {}
        }
        prev = pos;
    }

    signals
}

fn ta_error(what: &str, err: ta::errors::TaError) -> EngineError {
    EngineError::InvalidConfiguration(format!("{what}: {err:?}"))
}

// ============================================================================
// 1. Simple Moving Average Crossover
// ============================================================================

/// Arithmetic mean of the last `window` values, summed in `Decimal`.
///
/// Adding and removing values is exact, so a window of identical prices
/// averages to exactly that price however much history came before it.
#[derive(Debug, Clone)]
struct RollingMean {
    window: usize,
    values: VecDeque<Decimal>,
    sum: Decimal,
}

impl RollingMean {
    fn new(window: usize) -> Self {
        Self {
            window,
            values: VecDeque::with_capacity(window + 1),
            sum: Decimal::ZERO,
        }
    }

    fn reset(&mut self) {
        self.values.clear();
        self.sum = Decimal::ZERO;
    }

    /// Push a value; `None` until the window is full or if the sum overflows
    fn next(&mut self, value: Decimal) -> Option<Decimal> {
        let Some(sum) = self.sum.checked_add(value) else {
            self.reset();
            return None;
        };
        self.sum = sum;
        self.values.push_back(value);
        if self.values.len() > self.window {
            if let Some(oldest) = self.values.pop_front() {
                self.sum -= oldest;
            }
        }
        if self.values.len() < self.window {
            return None;
        }
        self.sum.checked_div(Decimal::from(self.window))
    }
}

/// Long while the fast SMA is strictly above the slow SMA
#[derive(Debug, Clone)]
pub struct SimpleMovingAverageStrategy {
    fast_window: usize,
    slow_window: usize,
}

impl SimpleMovingAverageStrategy {
    pub fn new(fast_window: usize, slow_window: usize) -> EngineResult<Self> {
        if fast_window == 0 || slow_window == 0 {
            return Err(EngineError::InvalidConfiguration(
                "moving average windows must be positive".to_string(),
            ));
        }
        if fast_window >= slow_window {
            return Err(EngineError::InvalidConfiguration(format!(
                "fast_window ({fast_window}) must be < slow_window ({slow_window})"
            )));
        }

        Ok(Self {
            fast_window,
            slow_window,
        })
    }

    pub fn fast_window(&self) -> usize {
        self.fast_window
    }

    pub fn slow_window(&self) -> usize {
        self.slow_window
    }
}

impl Strategy for SimpleMovingAverageStrategy {
    fn name(&self) -> String {
        format!("SMA({}, {})", self.fast_window, self.slow_window)
    }

    fn generate_target_positions(&self, bars: &[PriceBar]) -> Vec<TargetPosition> {
        let mut fast = RollingMean::new(self.fast_window);
        let mut slow = RollingMean::new(self.slow_window);

        bars.iter()
            .map(|bar| {
                // Out of Decimal range: restart both windows
                let Some(close) = Decimal::from_f64(bar.close) else {
                    fast.reset();
                    slow.reset();
                    return TargetPosition::Flat;
                };
                match (fast.next(close), slow.next(close)) {
                    (Some(fast_val), Some(slow_val)) if fast_val > slow_val => {
                        TargetPosition::Long
                    }
                    _ => TargetPosition::Flat,
                }
            })
            .collect()
    }
}

// ============================================================================
// 2. Momentum (rate of change)
// ============================================================================

/// Long while the `lookback`-bar rate of change is above a threshold (percent)
#[derive(Debug, Clone)]
pub struct MomentumStrategy {
    lookback: usize,
    threshold_pct: f64,
    roc: RateOfChange,
}

impl MomentumStrategy {
    pub fn new(lookback: usize, threshold_pct: f64) -> EngineResult<Self> {
        if lookback == 0 {
            return Err(EngineError::InvalidConfiguration(
                "momentum lookback must be positive".to_string(),
            ));
        }
        if !threshold_pct.is_finite() {
            return Err(EngineError::InvalidConfiguration(
                "momentum threshold must be finite".to_string(),
            ));
        }

        Ok(Self {
            lookback,
            threshold_pct,
            roc: RateOfChange::new(lookback).map_err(|e| ta_error("rate of change", e))?,
        })
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> String {
        format!("Momentum({}, {}%)", self.lookback, self.threshold_pct)
    }

    fn generate_target_positions(&self, bars: &[PriceBar]) -> Vec<TargetPosition> {
        let mut roc = self.roc.clone();

        bars.iter()
            .enumerate()
            .map(|(i, bar)| {
                let change = roc.next(bar.close);
                if i >= self.lookback && change > self.threshold_pct {
                    TargetPosition::Long
                } else {
                    TargetPosition::Flat
                }
            })
            .collect()
    }
}

// ============================================================================
// 3. Mean Reversion (Bollinger Bands)
// ============================================================================

/// Buy a close below the lower band, hold until price recovers to the middle band
#[derive(Debug, Clone)]
pub struct MeanReversionStrategy {
    period: usize,
    multiplier: f64,
    bands: BollingerBands,
}

impl MeanReversionStrategy {
    pub fn new(period: usize, multiplier: f64) -> EngineResult<Self> {
        if period < 2 {
            return Err(EngineError::InvalidConfiguration(format!(
                "bollinger period must be >= 2, got {period}"
            )));
        }
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(EngineError::InvalidConfiguration(format!(
                "bollinger multiplier must be positive, got {multiplier}"
            )));
        }

        Ok(Self {
            period,
            multiplier,
            bands: BollingerBands::new(period, multiplier)
                .map_err(|e| ta_error("bollinger bands", e))?,
        })
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> String {
        format!("MeanReversion({}, {})", self.period, self.multiplier)
    }

    fn generate_target_positions(&self, bars: &[PriceBar]) -> Vec<TargetPosition> {
        let mut bands = self.bands.clone();
        let mut current = TargetPosition::Flat;

        bars.iter()
            .enumerate()
            .map(|(i, bar)| {
                let out = bands.next(bar.close);
                if i + 1 < self.period {
                    return TargetPosition::Flat;
                }

                current = match current {
                    TargetPosition::Flat if bar.close < out.lower => TargetPosition::Long,
                    TargetPosition::Long if bar.close >= out.average => TargetPosition::Flat,
                    held => held,
                };
                current
            })
            .collect()
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Build a strategy from its configuration, validating parameters up front
pub fn build_strategy(kind: &StrategyKind) -> EngineResult<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match *kind {
        StrategyKind::Sma {
            fast_window,
            slow_window,
        } => Box::new(SimpleMovingAverageStrategy::new(fast_window, slow_window)?),
        StrategyKind::Momentum {
            lookback,
            threshold_pct,
        } => Box::new(MomentumStrategy::new(lookback, threshold_pct)?),
        StrategyKind::MeanReversion { period, multiplier } => {
            Box::new(MeanReversionStrategy::new(period, multiplier)?)
        }
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    const HOUR_MS: i64 = 3_600_000;

    fn make_bars(prices: &[f64]) -> Vec<PriceBar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PriceBar::new(i as i64 * HOUR_MS, p))
            .collect()
    }

    #[test]
    fn test_sma_rejects_fast_not_below_slow() {
        let err = SimpleMovingAverageStrategy::new(10, 5).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));

        let err = SimpleMovingAverageStrategy::new(5, 5).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_sma_rejects_zero_window() {
        assert!(matches!(
            SimpleMovingAverageStrategy::new(0, 5),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_sma_positions_rise_then_drop() {
        let strat = SimpleMovingAverageStrategy::new(2, 3).unwrap();
        let bars = make_bars(&[100.0, 100.0, 100.0, 110.0, 110.0, 90.0]);

        let positions: Vec<i8> = strat
            .generate_target_positions(&bars)
            .into_iter()
            .map(TargetPosition::as_i8)
            .collect();
        // t2: fast == slow counts as not above
        assert_eq!(positions, vec![0, 0, 0, 1, 1, 0]);

        let signals = strat.generate_signals(&bars);
        assert_eq!(
            signals,
            vec![Signal::buy(3 * HOUR_MS), Signal::sell(5 * HOUR_MS)]
        );
    }

    #[test]
    fn test_sma_constant_price_never_signals() {
        let pairs = [(2, 3), (3, 7), (5, 20), (10, 30)];
        let prices = [0.000123, 0.1, 0.3, 0.7, 1.0, 1.1, 2.675, 100.0, 123.45, 43_000.0];
        for (fast, slow) in pairs {
            let strat = SimpleMovingAverageStrategy::new(fast, slow).unwrap();
            for price in prices {
                let bars = make_bars(&[price; 200]);
                assert!(
                    strat
                        .generate_target_positions(&bars)
                        .iter()
                        .all(|p| *p == TargetPosition::Flat),
                    "SMA({fast}, {slow}) went long on constant {price}"
                );
                assert!(strat.generate_signals(&bars).is_empty());
            }
        }
    }

    #[test]
    fn test_sma_flat_tail_after_volatility_is_flat() {
        let mut prices: Vec<f64> = (0..500)
            .map(|i| 100.0 + ((i as f64) / 7.0).sin() * 25.0)
            .collect();
        prices.extend(std::iter::repeat(123.45).take(100));
        let bars = make_bars(&prices);

        for (fast, slow) in [(3, 7), (5, 20), (10, 30)] {
            let strat = SimpleMovingAverageStrategy::new(fast, slow).unwrap();
            let positions = strat.generate_target_positions(&bars);
            // Once the slow window lies entirely inside the tail
            let tail_long = positions[500 + slow - 1..]
                .iter()
                .filter(|p| **p == TargetPosition::Long)
                .count();
            assert_eq!(tail_long, 0, "SMA({fast}, {slow}) long on flat tail");
        }
    }

    #[test]
    fn test_rolling_mean_matches_window_average() {
        let mut mean = RollingMean::new(3);
        assert_eq!(mean.next(dec!(1)), None);
        assert_eq!(mean.next(dec!(2)), None);
        assert_eq!(mean.next(dec!(6)), Some(dec!(3)));
        assert_eq!(mean.next(dec!(0.1)), Some(dec!(2.7)));
        mean.reset();
        assert_eq!(mean.next(dec!(5)), None);
    }

    #[test]
    fn test_sma_short_series_stays_flat() {
        let strat = SimpleMovingAverageStrategy::new(2, 3).unwrap();
        assert!(strat.generate_target_positions(&[]).is_empty());

        let one = make_bars(&[100.0]);
        assert_eq!(
            strat.generate_target_positions(&one),
            vec![TargetPosition::Flat]
        );
        assert!(strat.generate_signals(&one).is_empty());

        // Rising prices, but the slow average is not yet defined
        let two = make_bars(&[100.0, 200.0]);
        assert!(strat.generate_signals(&two).is_empty());
    }

    #[test]
    fn test_sma_rising_series_buys_once() {
        let strat = SimpleMovingAverageStrategy::new(2, 3).unwrap();
        let prices: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&prices);

        let signals = strat.generate_signals(&bars);
        assert_eq!(signals, vec![Signal::buy(2 * HOUR_MS)]);
    }

    #[test]
    fn test_generation_is_repeatable() {
        let strat = SimpleMovingAverageStrategy::new(2, 5).unwrap();
        let prices: Vec<f64> = (0..40)
            .map(|i| 100.0 + ((i as f64) * 0.7).sin() * 10.0)
            .collect();
        let bars = make_bars(&prices);

        let first = strat.generate_signals(&bars);
        let second = strat.generate_signals(&bars);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_positions_to_signals_alternates() {
        use TargetPosition::{Flat, Long};
        let bars = make_bars(&[1.0; 7]);
        let positions = [Long, Long, Flat, Flat, Long, Flat, Flat];

        let sides: Vec<Side> = positions_to_signals(&bars, &positions)
            .into_iter()
            .map(|s| s.side)
            .collect();
        assert_eq!(sides, vec![Side::Buy, Side::Sell, Side::Buy, Side::Sell]);
    }

    #[test]
    fn test_momentum_goes_long_on_strong_rise() {
        let strat = MomentumStrategy::new(2, 5.0).unwrap();
        let bars = make_bars(&[100.0, 100.0, 100.0, 110.0, 121.0, 121.0, 121.0]);

        let positions: Vec<i8> = strat
            .generate_target_positions(&bars)
            .into_iter()
            .map(TargetPosition::as_i8)
            .collect();
        assert_eq!(positions, vec![0, 0, 0, 1, 1, 1, 0]);
        assert_eq!(strat.generate_signals(&bars).len(), 2);
    }

    #[test]
    fn test_momentum_rejects_zero_lookback() {
        assert!(MomentumStrategy::new(0, 1.0).is_err());
        assert!(MomentumStrategy::new(3, f64::NAN).is_err());
    }

    #[test]
    fn test_mean_reversion_buys_dip_and_exits_at_mean() {
        let strat = MeanReversionStrategy::new(5, 1.0).unwrap();
        let mut prices = vec![100.0; 7];
        prices.push(80.0); // collapse below the lower band
        prices.push(82.0);
        prices.push(120.0); // snaps back above the mean
        let bars = make_bars(&prices);

        let signals = strat.generate_signals(&bars);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0], Signal::buy(7 * HOUR_MS));
        assert_eq!(signals[1], Signal::sell(9 * HOUR_MS));
    }

    #[test]
    fn test_mean_reversion_rejects_bad_params() {
        assert!(MeanReversionStrategy::new(1, 2.0).is_err());
        assert!(MeanReversionStrategy::new(20, 0.0).is_err());
    }

    #[test]
    fn test_build_strategy_dispatches() {
        let strat = build_strategy(&StrategyKind::default()).unwrap();
        assert_eq!(strat.name(), "SMA(10, 30)");

        let strat = build_strategy(&StrategyKind::Momentum {
            lookback: 3,
            threshold_pct: 1.0,
        })
        .unwrap();
        assert!(strat.name().starts_with("Momentum"));

        assert!(build_strategy(&StrategyKind::Sma {
            fast_window: 30,
            slow_window: 10
        })
        .is_err());
    }
}
