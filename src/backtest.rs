//! Rolling-window backtest engine.
//!
//! Sequences rebalances chronologically over a return panel, carries held
//! weights forward between rebalances, and produces a continuous,
//! transaction-cost-adjusted daily performance record. The rebalance loop is
//! strictly sequential (each rebalance's outcome feeds the next); independent
//! runs with different configurations are embarrassingly parallel and can be
//! dispatched with [`run_parameter_sweep`].

use crate::error::{QuantoroError, Result};
use crate::optimizer::{CvarOptimizer, OptimizerConfig, SolveRequest};
use crate::params::RegimeParams;
use crate::types::{
    count_positions, drifted_weights, equal_weights, turnover, AlphaScores, DailyReturn,
    RegimeSignal, ReturnMatrix, WeightPanel,
};
use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Calendar rule generating candidate rebalance dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceFrequency {
    /// Every trading date.
    Daily,
    /// Week ends (Sundays, mapped back to the last trading date).
    Weekly,
    /// Calendar month ends.
    Monthly,
    /// Calendar quarter ends (Mar, Jun, Sep, Dec).
    Quarterly,
}

impl FromStr for RebalanceFrequency {
    type Err = QuantoroError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "d" | "daily" => Ok(Self::Daily),
            "w" | "weekly" => Ok(Self::Weekly),
            "m" | "monthly" => Ok(Self::Monthly),
            "q" | "quarterly" => Ok(Self::Quarterly),
            other => Err(QuantoroError::ConfigError(format!(
                "Unknown rebalance frequency: {}",
                other
            ))),
        }
    }
}

fn month_end(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid month start")
        .pred_opt()
        .expect("valid month end")
}

impl RebalanceFrequency {
    /// Candidate calendar period-end dates between `first` and `last` inclusive.
    fn period_ends(&self, first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
        match self {
            RebalanceFrequency::Daily => {
                // Every trading date is its own candidate; the caller maps
                // candidates onto trading dates anyway.
                let mut out = Vec::new();
                let mut d = first;
                while d <= last {
                    out.push(d);
                    d = d.succ_opt().expect("valid date");
                }
                out
            }
            RebalanceFrequency::Weekly => {
                let offset = 6 - first.weekday().num_days_from_monday() as i64;
                let mut d = first + chrono::Duration::days(offset);
                let mut out = Vec::new();
                while d <= last {
                    out.push(d);
                    d += chrono::Duration::days(7);
                }
                out
            }
            RebalanceFrequency::Monthly => {
                let mut out = Vec::new();
                let (mut y, mut m) = (first.year(), first.month());
                loop {
                    let end = month_end(y, m);
                    if end > last {
                        break;
                    }
                    if end >= first {
                        out.push(end);
                    }
                    if m == 12 {
                        y += 1;
                        m = 1;
                    } else {
                        m += 1;
                    }
                }
                out
            }
            RebalanceFrequency::Quarterly => {
                let mut out = Vec::new();
                for y in first.year()..=last.year() {
                    for m in [3u32, 6, 9, 12] {
                        let end = month_end(y, m);
                        if end >= first && end <= last {
                            out.push(end);
                        }
                    }
                }
                out
            }
        }
    }
}

/// Rebalance date indices into `dates`: candidate period ends mapped to the
/// last trading date on or before them, gated on `lookback` prior trading
/// days, with consecutive collapses to the same date de-duplicated.
pub fn rebalance_schedule(
    dates: &[NaiveDate],
    frequency: RebalanceFrequency,
    lookback: usize,
) -> Vec<usize> {
    let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
        return Vec::new();
    };

    let mut schedule = Vec::new();
    for candidate in frequency.period_ends(*first, *last) {
        let loc = dates.partition_point(|d| *d <= candidate);
        let Some(idx) = loc.checked_sub(1) else {
            continue;
        };
        if idx < lookback {
            continue;
        }
        if schedule.last() != Some(&idx) {
            schedule.push(idx);
        }
    }
    schedule
}

/// One scheduled rebalance and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceEvent {
    /// Trading date of the rebalance.
    pub date: NaiveDate,
    /// Eligible asset universe at that date.
    pub universe: Vec<String>,
    /// Weights held after the rebalance (previous weights when the solve failed).
    pub weights: Vec<f64>,
    /// CVaR estimate at the optimum.
    pub cvar: Option<f64>,
    /// Tracking-error volatility over the lookback window.
    pub tracking_error: Option<f64>,
    /// Turnover against the previously-held weights (0 on failure).
    pub turnover: f64,
    /// Count of non-trivial positions.
    pub n_positions: usize,
    /// "optimal", "optimal_inaccurate", or "failed_optimization".
    pub status: String,
}

/// Complete output of one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestOutput {
    /// One event per scheduled rebalance, in chronological order.
    pub rebalances: Vec<RebalanceEvent>,
    /// Continuous daily net returns over the full horizon, including the
    /// pre-first-rebalance seed period held at equal weight.
    pub daily_returns: Vec<DailyReturn>,
    /// Daily held weights aligned to the same horizon.
    pub weight_panel: WeightPanel,
}

impl BacktestOutput {
    fn empty(assets: &[String]) -> Self {
        Self {
            rebalances: Vec::new(),
            daily_returns: Vec::new(),
            weight_panel: WeightPanel::new(Vec::new(), assets.to_vec(), Vec::new()),
        }
    }

    /// Write the full run record to a JSON file.
    pub fn save_json(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self)?;
        info!(path = %path.as_ref().display(), "saved backtest output");
        Ok(())
    }

    /// Read a run record back from a JSON file.
    pub fn load_json(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Ok(serde_json::from_reader(file)?)
    }
}

/// Backtest engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Trailing history length per solve, in trading days.
    pub lookback_window: usize,
    /// Calendar rule for candidate rebalance dates.
    pub rebalance_frequency: RebalanceFrequency,
    /// Risk-on / risk-off endpoints for regime interpolation. When set and a
    /// regime signal is supplied to the run, each solve uses parameters
    /// interpolated at the as-of risk-off probability.
    pub regime_params: Option<RegimeParams>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            lookback_window: 252,
            rebalance_frequency: RebalanceFrequency::Quarterly,
            regime_params: None,
        }
    }
}

impl BacktestConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.lookback_window < 2 {
            return Err(QuantoroError::ConfigError(format!(
                "lookback_window must be at least 2, got {}",
                self.lookback_window
            )));
        }
        if let Some(regime) = &self.regime_params {
            regime.validate()?;
        }
        Ok(())
    }
}

/// Rolling-window backtest engine.
pub struct RollingBacktest {
    config: BacktestConfig,
    optimizer: CvarOptimizer,
}

impl RollingBacktest {
    /// Create an engine, validating the configuration.
    pub fn new(config: BacktestConfig, optimizer: CvarOptimizer) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, optimizer })
    }

    /// Engine configuration.
    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the backtest end to end.
    ///
    /// `benchmark`, when supplied, must be aligned to `returns` dates.
    /// An empty rebalance schedule is terminal for the run and yields empty
    /// containers, not an error.
    pub fn run(
        &self,
        returns: &ReturnMatrix,
        benchmark: Option<&[f64]>,
        alpha_scores: Option<&AlphaScores>,
        regime: Option<&RegimeSignal>,
    ) -> Result<BacktestOutput> {
        if let Some(bench) = benchmark {
            if bench.len() != returns.n_dates() {
                return Err(QuantoroError::InvalidInput(format!(
                    "Benchmark length {} does not match {} trading dates",
                    bench.len(),
                    returns.n_dates()
                )));
            }
        }

        let schedule = rebalance_schedule(
            returns.dates(),
            self.config.rebalance_frequency,
            self.config.lookback_window,
        );
        if schedule.is_empty() {
            warn!(
                lookback = self.config.lookback_window,
                dates = returns.n_dates(),
                "no eligible rebalance dates; returning empty result"
            );
            return Ok(BacktestOutput::empty(returns.assets()));
        }
        info!(rebalances = schedule.len(), "rebalance schedule constructed");

        if regime.is_some() && self.config.regime_params.is_none() {
            warn!("regime signal supplied but no regime_params configured; signal ignored");
        }

        let needs_alpha = !self.optimizer.config().tilts.is_empty();
        let n = returns.n_assets();
        let mut held = equal_weights(n);
        let mut events: Vec<RebalanceEvent> = Vec::with_capacity(schedule.len());

        for &idx in &schedule {
            let date = returns.dates()[idx];
            let window = returns.window(idx, self.config.lookback_window)?;
            let bench_slice =
                benchmark.map(|b| &b[idx - self.config.lookback_window..idx]);

            let aligned_alpha = if needs_alpha {
                match alpha_scores.and_then(|a| a.aligned_as_of(date, returns.assets())) {
                    Some(scores) => Some(scores),
                    None => return Err(QuantoroError::MissingAlphaScores),
                }
            } else {
                None
            };

            let mut request = SolveRequest::new(window).with_previous_weights(&held);
            if let Some(bench) = bench_slice {
                request = request.with_benchmark(bench);
            }
            if let Some(scores) = &aligned_alpha {
                request = request.with_alpha_scores(scores);
            }
            if let (Some(signal), Some(endpoints)) = (regime, &self.config.regime_params) {
                if let Some(risk_off_prob) = signal.as_of(date) {
                    let params = endpoints.at(risk_off_prob);
                    debug!(
                        %date,
                        risk_off_prob,
                        confidence_level = params.confidence_level,
                        lasso_penalty = params.lasso_penalty,
                        max_weight = params.max_weight,
                        "regime-adjusted parameters"
                    );
                    request = request.with_params(params);
                }
            }

            let result = self.optimizer.optimize(&request)?;

            if result.status.is_ok() {
                let weights = result
                    .weights
                    .clone()
                    .expect("successful solve carries weights");
                info!(
                    %date,
                    cvar = result.cvar.unwrap_or(f64::NAN),
                    turnover = result.turnover,
                    status = result.status.label(),
                    "rebalanced"
                );
                events.push(RebalanceEvent {
                    date,
                    universe: returns.assets().to_vec(),
                    n_positions: count_positions(&weights),
                    weights: weights.clone(),
                    cvar: result.cvar,
                    tracking_error: result.tracking_error,
                    turnover: result.turnover,
                    status: result.status.label().to_string(),
                });
                held = weights;
            } else {
                warn!(%date, status = ?result.status, "optimization failed; holding previous weights");
                events.push(RebalanceEvent {
                    date,
                    universe: returns.assets().to_vec(),
                    weights: held.clone(),
                    cvar: None,
                    tracking_error: None,
                    turnover: 0.0,
                    n_positions: count_positions(&held),
                    status: "failed_optimization".to_string(),
                });
            }
        }

        Ok(self.build_daily_record(returns, events))
    }

    /// Forward-fill rebalance weights into a daily panel and compute the
    /// cost-adjusted daily net return series over the full horizon.
    fn build_daily_record(
        &self,
        returns: &ReturnMatrix,
        events: Vec<RebalanceEvent>,
    ) -> BacktestOutput {
        let n = returns.n_assets();
        let n_dates = returns.n_dates();
        let cost_rate = self.optimizer.config().transaction_cost_rate;

        let mut held = equal_weights(n);
        let mut panel_values = Vec::with_capacity(n_dates * n);
        let mut daily_returns = Vec::with_capacity(n_dates);
        let mut next_event = 0usize;
        let mut traded_before = false;

        for i in 0..n_dates {
            let date = returns.dates()[i];
            let mut cost = 0.0;

            if next_event < events.len() && events[next_event].date == date {
                let event = &events[next_event];
                if event.status != "failed_optimization" {
                    // Cost is charged on the trade away from what the held
                    // weights drifted into, not on passive price movement.
                    // The first trade has no drifted state and is costed
                    // against the equal-weight seed (the optimizer-reported
                    // turnover).
                    let traded = if !traded_before || i == 0 {
                        event.turnover
                    } else {
                        let drifted = drifted_weights(&held, returns.row(i - 1));
                        turnover(&event.weights, &drifted)
                    };
                    cost = traded * cost_rate;
                    held = event.weights.clone();
                    traded_before = true;
                    info!(%date, turnover = traded, cost, "applied transaction cost");
                }
                next_event += 1;
            }

            let gross: f64 = held
                .iter()
                .zip(returns.row(i).iter())
                .map(|(w, r)| w * r)
                .sum();
            daily_returns.push(DailyReturn {
                date,
                value: gross - cost,
            });
            panel_values.extend_from_slice(&held);
        }

        BacktestOutput {
            rebalances: events,
            daily_returns,
            weight_panel: WeightPanel::new(
                returns.dates().to_vec(),
                returns.assets().to_vec(),
                panel_values,
            ),
        }
    }
}

/// Run independent backtest configurations in parallel.
///
/// Each run builds its own optimizer and engine; no mutable state is shared.
pub fn run_parameter_sweep(
    returns: &ReturnMatrix,
    benchmark: Option<&[f64]>,
    runs: Vec<(String, BacktestConfig, OptimizerConfig)>,
) -> Vec<(String, Result<BacktestOutput>)> {
    runs.into_par_iter()
        .map(|(label, backtest_config, optimizer_config)| {
            let output = CvarOptimizer::new(optimizer_config)
                .and_then(|optimizer| RollingBacktest::new(backtest_config, optimizer))
                .and_then(|engine| engine.run(returns, benchmark, None, None));
            (label, output)
        })
        .collect()
}
