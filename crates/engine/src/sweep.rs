//! Parameter sweep over SMA window pairs
//!
//! Every (fast, slow) combination is an independent backtest on the same
//! price series. Runs are spread over tokio's blocking pool; the only shared
//! state is the progress tracker.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, RwLock,
};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::engine::BacktestEngine;
use crate::types::{BacktestConfig, PriceBar, SimulatorConfig, StrategyKind, Summary};

// ============================================================================
// Types
// ============================================================================

/// Request to sweep SMA window pairs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRequest {
    pub symbol: String,
    pub interval: String,
    pub fast_windows: Vec<usize>,
    pub slow_windows: Vec<usize>,
    pub simulator: SimulatorConfig,
    /// Number of top results to return (default 5)
    pub top_n: Option<usize>,
}

impl Default for SweepRequest {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            fast_windows: vec![5, 10, 15, 20],
            slow_windows: vec![20, 30, 50, 100],
            simulator: SimulatorConfig::default(),
            top_n: None,
        }
    }
}

/// One ranked sweep outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub rank: usize,
    pub fast_window: usize,
    pub slow_window: usize,
    pub summary: Summary,
}

/// Sweep run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    Idle,
    Running,
    Complete,
    Cancelled,
}

/// Shared progress tracker between the caller and the sweep task
pub struct SweepProgress {
    pub status: RwLock<SweepStatus>,
    pub total_combinations: AtomicU32,
    pub completed: AtomicU32,
    pub failed: AtomicU32,
    pub cancelled: AtomicBool,
}

impl SweepProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(SweepStatus::Idle),
            total_combinations: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Get progress as percentage
    pub fn progress_pct(&self) -> f32 {
        let total = self.total_combinations.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    pub fn status(&self) -> SweepStatus {
        self.status
            .read()
            .map(|s| *s)
            .unwrap_or(SweepStatus::Idle)
    }

    fn set_status(&self, status: SweepStatus) {
        if let Ok(mut guard) = self.status.write() {
            *guard = status;
        }
    }
}

impl Default for SweepProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Grid Generation
// ============================================================================

/// All (fast, slow) pairs with fast < slow, in input order
pub fn generate_sma_grid(fast_windows: &[usize], slow_windows: &[usize]) -> Vec<(usize, usize)> {
    let mut grid = Vec::with_capacity(fast_windows.len() * slow_windows.len());
    for &fast in fast_windows {
        for &slow in slow_windows {
            if fast > 0 && fast < slow {
                grid.push((fast, slow));
            }
        }
    }
    grid
}

// ============================================================================
// Ranking
// ============================================================================

/// Higher return first, then the shallower drawdown
fn compare_results(a: &SweepResult, b: &SweepResult) -> CmpOrdering {
    b.summary
        .total_return_pct
        .total_cmp(&a.summary.total_return_pct)
        .then_with(|| {
            b.summary
                .max_drawdown_pct
                .total_cmp(&a.summary.max_drawdown_pct)
        })
        .then_with(|| (a.fast_window, a.slow_window).cmp(&(b.fast_window, b.slow_window)))
}

fn rank_results(mut results: Vec<SweepResult>, top_n: usize) -> Vec<SweepResult> {
    results.sort_by(compare_results);
    results.truncate(top_n);
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    results
}

// ============================================================================
// Runner
// ============================================================================

/// Backtest every grid combination in parallel and return the best `top_n`
pub async fn run_sweep(
    request: SweepRequest,
    bars: Arc<Vec<PriceBar>>,
    progress: Arc<SweepProgress>,
) -> Vec<SweepResult> {
    let grid = generate_sma_grid(&request.fast_windows, &request.slow_windows);
    let top_n = request.top_n.unwrap_or(5);

    progress
        .total_combinations
        .store(grid.len() as u32, Ordering::Relaxed);
    progress.completed.store(0, Ordering::Relaxed);
    progress.failed.store(0, Ordering::Relaxed);
    progress.set_status(SweepStatus::Running);

    info!(
        symbol = %request.symbol,
        combinations = grid.len(),
        bars = bars.len(),
        "Starting parameter sweep"
    );

    let mut tasks = JoinSet::new();
    for (fast_window, slow_window) in grid {
        let bars = Arc::clone(&bars);
        let progress = Arc::clone(&progress);
        let config = BacktestConfig {
            symbol: request.symbol.clone(),
            interval: request.interval.clone(),
            start_time: None,
            end_time: None,
            strategy: StrategyKind::Sma {
                fast_window,
                slow_window,
            },
            simulator: request.simulator.clone(),
        };

        tasks.spawn_blocking(move || {
            if progress.is_cancelled() {
                return None;
            }
            let outcome = BacktestEngine::run(&config, &bars);
            progress.completed.fetch_add(1, Ordering::Relaxed);
            match outcome {
                Ok(result) => Some(SweepResult {
                    rank: 0,
                    fast_window,
                    slow_window,
                    summary: result.summary,
                }),
                Err(e) => {
                    progress.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(fast_window, slow_window, error = %e, "Sweep combination failed");
                    None
                }
            }
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(result)) => results.push(result),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Sweep task panicked"),
        }
    }

    if progress.is_cancelled() {
        warn!(completed = results.len(), "Sweep cancelled");
        progress.set_status(SweepStatus::Cancelled);
    } else {
        progress.set_status(SweepStatus::Complete);
    }

    let ranked = rank_results(results, top_n);
    info!(returned = ranked.len(), "Sweep complete");
    ranked
}
