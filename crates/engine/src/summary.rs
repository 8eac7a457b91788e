//! Performance summary of a finished run

use crate::types::{EquityPoint, Summary, Trade};

/// Reduce a trade list and equity curve to scalar statistics.
///
/// Only completed trades count toward `num_trades` and `win_rate_pct`; a
/// position left open shows up in `end_equity` alone.
pub fn summarize(trades: &[Trade], equity_curve: &[EquityPoint]) -> Summary {
    let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
        return Summary::default();
    };

    let start_equity = first.equity;
    let end_equity = last.equity;
    let total_return_pct = if start_equity != 0.0 {
        (end_equity - start_equity) * 100.0 / start_equity
    } else {
        0.0
    };

    let num_trades = trades.len();
    let win_rate_pct = if num_trades > 0 {
        let wins = trades.iter().filter(|t| t.is_win()).count();
        wins as f64 / num_trades as f64 * 100.0
    } else {
        0.0
    };

    Summary {
        start_equity,
        end_equity,
        total_return_pct,
        max_drawdown_pct: max_drawdown_pct(equity_curve),
        num_trades,
        win_rate_pct,
    }
}

/// Most negative percentage decline from the running peak (0.0 or below).
/// Computed as `(equity - peak) * 100 / peak`.
pub fn max_drawdown_pct(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;

    for point in equity_curve {
        peak = peak.max(point.equity);
        if peak > 0.0 {
            let drawdown = (point.equity - peak) * 100.0 / peak;
            worst = worst.min(drawdown);
        }
    }

    worst
}
