//! CVaR portfolio optimization.
//!
//! Solves for the long-only, fully-invested weight vector minimizing the
//! Conditional Value-at-Risk of tracking error against a benchmark, using the
//! Rockafellar-Uryasev scenario reformulation. With the long-only and
//! fully-invested constraints the problem is a linear program:
//!
//! - variables `[w (n), u (n, turnover split, optional), z (T), zeta]`
//! - `CVaR = zeta + (1 / ((1 - alpha) * T)) * sum(z)`
//! - `z_t >= -(R_t . w - b_t) - zeta`, `z_t >= 0`
//! - `sum(w) = 1`, `0 <= w <= max_weight`
//! - objective adds `lambda * sum(w)` (the L1 penalty is linear since
//!   `w >= 0`), `c * sum(u)` for turnover, and `-alpha_factor * (a . w)`
//!   when an alpha tilt is configured.
//!
//! Solves are stateless: hyperparameters are a [`RiskParams`] value on the
//! request (or the configured default), so one optimizer instance can be
//! shared across threads and regime-aware callers simply pass interpolated
//! parameters.

use crate::error::{QuantoroError, Result};
use crate::params::RiskParams;
use crate::types::ReturnWindow;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// Outcome classification of a solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStatus {
    /// Solved to the requested tolerances.
    Optimal,
    /// Solved to relaxed tolerances; weights are usable.
    OptimalInaccurate,
    /// All solver attempts failed; weights are undefined.
    Failed(String),
}

impl SolverStatus {
    /// Whether the solve produced usable weights.
    pub fn is_ok(&self) -> bool {
        matches!(self, SolverStatus::Optimal | SolverStatus::OptimalInaccurate)
    }

    /// Short status label for reporting.
    pub fn label(&self) -> &str {
        match self {
            SolverStatus::Optimal => "optimal",
            SolverStatus::OptimalInaccurate => "optimal_inaccurate",
            SolverStatus::Failed(_) => "failed",
        }
    }
}

/// Result of one optimization call.
///
/// A failed solve carries `None` weights and a [`SolverStatus::Failed`]
/// status; it is an expected, recoverable outcome, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Optimal weights aligned to the window's asset universe, if solved.
    pub weights: Option<Vec<f64>>,
    /// CVaR of tracking error at the optimum.
    pub cvar: Option<f64>,
    /// Mean daily portfolio return over the window.
    pub portfolio_return: Option<f64>,
    /// Daily portfolio volatility over the window.
    pub portfolio_volatility: Option<f64>,
    /// Daily tracking-error volatility over the window.
    pub tracking_error: Option<f64>,
    /// Turnover against the supplied previous weights (0 when none supplied).
    pub turnover: f64,
    /// Solve outcome.
    pub status: SolverStatus,
    /// Wall-clock solve time in seconds, across all attempts.
    pub solve_time: f64,
}

impl OptimizationResult {
    fn failed(reason: String, solve_time: f64) -> Self {
        Self {
            weights: None,
            cvar: None,
            portfolio_return: None,
            portfolio_volatility: None,
            tracking_error: None,
            turnover: 0.0,
            status: SolverStatus::Failed(reason),
            solve_time,
        }
    }
}

/// A tagged extra objective term.
///
/// Variants of the optimizer are expressed as term lists rather than
/// subclass chains; regime awareness needs no term since it only changes
/// the hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ObjectiveTerm {
    /// Subtract `factor * (alpha_scores . w)` from the objective, tilting
    /// the portfolio toward high-alpha assets. Requires alpha scores on
    /// every request.
    AlphaTilt {
        /// Weight given to the alpha signal, >= 0.
        factor: f64,
    },
}

/// Numerical solve configuration: a primary attempt at tight tolerances and
/// a relaxed, iteration-capped fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Iteration limit for the primary attempt.
    pub max_iter: u32,
    /// Iteration limit for the fallback attempt; keeps runs bounded.
    pub fallback_max_iter: u32,
    /// Relaxed feasibility/gap tolerance for the fallback attempt.
    pub fallback_tol: f64,
    /// Print solver progress.
    pub verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iter: 200,
            fallback_max_iter: 5000,
            fallback_tol: 1e-4,
            verbose: false,
        }
    }
}

/// One entry in the ordered solver attempt ladder.
#[derive(Debug, Clone)]
struct SolverAttempt {
    label: &'static str,
    max_iter: u32,
    tol: f64,
}

impl SolverConfig {
    fn attempts(&self) -> Vec<SolverAttempt> {
        vec![
            SolverAttempt {
                label: "primary",
                max_iter: self.max_iter,
                tol: 1e-8,
            },
            SolverAttempt {
                label: "fallback",
                max_iter: self.fallback_max_iter,
                tol: self.fallback_tol,
            },
        ]
    }
}

/// Optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Default hyperparameters, used when a request carries no override.
    pub params: RiskParams,
    /// Per-unit-turnover cost penalty in the objective.
    pub transaction_cost_rate: f64,
    /// Extra objective terms.
    pub tilts: Vec<ObjectiveTerm>,
    /// Solver attempt configuration.
    pub solver: SolverConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            params: RiskParams::default(),
            transaction_cost_rate: 0.002,
            tilts: Vec::new(),
            solver: SolverConfig::default(),
        }
    }
}

impl OptimizerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.transaction_cost_rate < 0.0 {
            return Err(QuantoroError::ConfigError(format!(
                "transaction_cost_rate must be non-negative, got {}",
                self.transaction_cost_rate
            )));
        }
        for tilt in &self.tilts {
            let ObjectiveTerm::AlphaTilt { factor } = tilt;
            if *factor < 0.0 {
                return Err(QuantoroError::ConfigError(format!(
                    "alpha tilt factor must be non-negative, got {}",
                    factor
                )));
            }
        }
        Ok(())
    }

    fn alpha_factor(&self) -> Option<f64> {
        self.tilts.iter().map(|t| {
            let ObjectiveTerm::AlphaTilt { factor } = t;
            *factor
        }).next()
    }
}

/// Inputs for one solve over a lookback window.
#[derive(Debug, Clone)]
pub struct SolveRequest<'a> {
    /// Lookback window of asset returns (T scenarios x n assets).
    pub window: ReturnWindow<'a>,
    /// Benchmark returns aligned to the window. When `None`, the
    /// cross-sectional mean of the universe is used.
    pub benchmark: Option<&'a [f64]>,
    /// Currently-held weights, the turnover reference.
    pub previous_weights: Option<&'a [f64]>,
    /// Alpha scores aligned to the window universe. Required when the
    /// optimizer carries an alpha tilt.
    pub alpha_scores: Option<&'a [f64]>,
    /// Hyperparameter override for this solve (regime interpolation).
    pub params: Option<RiskParams>,
}

impl<'a> SolveRequest<'a> {
    /// A request with no benchmark, previous weights, scores, or override.
    pub fn new(window: ReturnWindow<'a>) -> Self {
        Self {
            window,
            benchmark: None,
            previous_weights: None,
            alpha_scores: None,
            params: None,
        }
    }

    /// Attach a benchmark return series aligned to the window.
    pub fn with_benchmark(mut self, benchmark: &'a [f64]) -> Self {
        self.benchmark = Some(benchmark);
        self
    }

    /// Attach the currently-held weights as the turnover reference.
    pub fn with_previous_weights(mut self, weights: &'a [f64]) -> Self {
        self.previous_weights = Some(weights);
        self
    }

    /// Attach alpha scores aligned to the window universe.
    pub fn with_alpha_scores(mut self, scores: &'a [f64]) -> Self {
        self.alpha_scores = Some(scores);
        self
    }

    /// Override the hyperparameters for this solve only.
    pub fn with_params(mut self, params: RiskParams) -> Self {
        self.params = Some(params);
        self
    }
}

/// CVaR tracking-error optimizer.
pub struct CvarOptimizer {
    config: OptimizerConfig,
}

impl CvarOptimizer {
    /// Create an optimizer, validating the configuration.
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The optimizer's configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Solve one window.
    ///
    /// Returns `Err` only for caller contract violations (dimension
    /// mismatches, missing alpha scores, invalid parameter overrides).
    /// Solver non-convergence yields `Ok` with a failed status.
    pub fn optimize(&self, request: &SolveRequest) -> Result<OptimizationResult> {
        let n = request.window.n_assets();
        let t = request.window.n_scenarios();
        if n == 0 || t == 0 {
            return Err(QuantoroError::InvalidInput(
                "Optimization window must be non-empty".to_string(),
            ));
        }

        let params = request.params.unwrap_or(self.config.params);
        params.validate()?;

        if let Some(bench) = request.benchmark {
            if bench.len() != t {
                return Err(QuantoroError::InvalidInput(format!(
                    "Benchmark length {} does not match {} scenarios",
                    bench.len(),
                    t
                )));
            }
        }
        if let Some(prev) = request.previous_weights {
            if prev.len() != n {
                return Err(QuantoroError::InvalidInput(format!(
                    "Previous weights length {} does not match {} assets",
                    prev.len(),
                    n
                )));
            }
        }

        let alpha_factor = self.config.alpha_factor();
        let alpha_scores = match (alpha_factor, request.alpha_scores) {
            (Some(_), None) => return Err(QuantoroError::MissingAlphaScores),
            (_, Some(scores)) if scores.len() != n => {
                return Err(QuantoroError::InvalidInput(format!(
                    "Alpha scores length {} does not match {} assets",
                    scores.len(),
                    n
                )));
            }
            (Some(factor), Some(scores)) => Some((factor, scores)),
            _ => None,
        };

        let benchmark: Vec<f64> = match request.benchmark {
            Some(b) => b.to_vec(),
            None => request.window.cross_sectional_mean(),
        };

        self.solve(request, &params, &benchmark, alpha_scores)
    }

    fn solve(
        &self,
        request: &SolveRequest,
        params: &RiskParams,
        benchmark: &[f64],
        alpha: Option<(f64, &[f64])>,
    ) -> Result<OptimizationResult> {
        use clarabel::algebra::CscMatrix;
        use clarabel::solver::SupportedConeT::{NonnegativeConeT, ZeroConeT};
        use clarabel::solver::{
            DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus as ClarabelStatus,
        };

        let window = &request.window;
        let n = window.n_assets();
        let t = window.n_scenarios();
        let prev = request.previous_weights;
        let has_u = prev.is_some();
        let n_u = if has_u { n } else { 0 };

        // Variable layout: [w(n), u(n_u), z(t), zeta].
        let nvar = n + n_u + t + 1;
        let z_off = n + n_u;
        let zeta_idx = nvar - 1;

        // Row layout: equality first, then the nonnegative cone.
        //   0                     : sum(w) = 1
        //   1 .. 1+n              : -w <= 0
        //   1+n .. 1+2n           : w <= max_weight
        //   1+2n .. 1+2n+t        : -z <= 0
        //   1+2n+t .. 1+2n+2t     : -R_t.w - z_t - zeta <= -b_t
        //   then 2n turnover rows : w - u <= w_prev, -w - u <= -w_prev
        let r_cvar = 1 + 2 * n + t;
        let r_u = 1 + 2 * n + 2 * t;
        let m = r_u + 2 * n_u;

        let mut a_data: Vec<f64> = Vec::new();
        let mut a_indices: Vec<usize> = Vec::new();
        let mut a_indptr: Vec<usize> = vec![0];

        // w columns.
        for j in 0..n {
            a_data.push(1.0);
            a_indices.push(0);
            a_data.push(-1.0);
            a_indices.push(1 + j);
            a_data.push(1.0);
            a_indices.push(1 + n + j);
            for s in 0..t {
                let val = window.row(s)[j];
                if val.abs() > 1e-12 {
                    a_data.push(-val);
                    a_indices.push(r_cvar + s);
                }
            }
            if has_u {
                a_data.push(1.0);
                a_indices.push(r_u + j);
                a_data.push(-1.0);
                a_indices.push(r_u + n + j);
            }
            a_indptr.push(a_data.len());
        }

        // u columns (turnover split variables).
        for j in 0..n_u {
            a_data.push(-1.0);
            a_indices.push(r_u + j);
            a_data.push(-1.0);
            a_indices.push(r_u + n + j);
            a_indptr.push(a_data.len());
        }

        // z columns.
        for s in 0..t {
            a_data.push(-1.0);
            a_indices.push(1 + 2 * n + s);
            a_data.push(-1.0);
            a_indices.push(r_cvar + s);
            a_indptr.push(a_data.len());
        }

        // zeta column.
        for s in 0..t {
            a_data.push(-1.0);
            a_indices.push(r_cvar + s);
        }
        a_indptr.push(a_data.len());

        let a = CscMatrix::new(m, nvar, a_indptr, a_indices, a_data);

        let mut b = Vec::with_capacity(m);
        b.push(1.0);
        b.extend(std::iter::repeat(0.0).take(n));
        b.extend(std::iter::repeat(params.max_weight).take(n));
        b.extend(std::iter::repeat(0.0).take(t));
        b.extend(benchmark.iter().map(|r| -r));
        if let Some(prev) = prev {
            b.extend(prev.iter().copied());
            b.extend(prev.iter().map(|w| -w));
        }

        let cones = [ZeroConeT(1), NonnegativeConeT(m - 1)];

        // Linear objective; P is empty so the problem is an LP.
        let p = CscMatrix::new(nvar, nvar, vec![0; nvar + 1], vec![], vec![]);
        let tail_scale = 1.0 / ((1.0 - params.confidence_level) * t as f64);
        let mut q = vec![0.0; nvar];
        for j in 0..n {
            // w >= 0 makes the L1 penalty linear in w.
            q[j] = params.lasso_penalty;
            if let Some((factor, scores)) = alpha {
                q[j] -= factor * scores[j];
            }
        }
        for j in 0..n_u {
            q[n + j] = self.config.transaction_cost_rate;
        }
        for s in 0..t {
            q[z_off + s] = tail_scale;
        }
        q[zeta_idx] = 1.0;

        let started = Instant::now();
        let mut last_reason = String::from("no solver attempt ran");

        for attempt in self.config.solver.attempts() {
            let settings = match DefaultSettingsBuilder::default()
                .max_iter(attempt.max_iter)
                .verbose(self.config.solver.verbose)
                .tol_feas(attempt.tol)
                .tol_gap_abs(attempt.tol)
                .tol_gap_rel(attempt.tol)
                .build()
            {
                Ok(s) => s,
                Err(e) => {
                    last_reason = format!("settings build failed: {}", e);
                    continue;
                }
            };

            let mut solver = match DefaultSolver::new(&p, &q, &a, &b, &cones, settings) {
                Ok(s) => s,
                Err(e) => {
                    last_reason = format!("solver setup failed: {:?}", e);
                    warn!(attempt = attempt.label, reason = %last_reason, "solver attempt skipped");
                    continue;
                }
            };

            solver.solve();

            let status = match solver.solution.status {
                ClarabelStatus::Solved => SolverStatus::Optimal,
                ClarabelStatus::AlmostSolved => SolverStatus::OptimalInaccurate,
                other => {
                    last_reason = format!("{:?}", other);
                    debug!(
                        attempt = attempt.label,
                        status = %last_reason,
                        "solver attempt did not converge"
                    );
                    continue;
                }
            };

            let x = &solver.solution.x;
            if x.len() != nvar || x.iter().any(|v| !v.is_finite()) {
                last_reason = format!("{}_no_weights", status.label());
                warn!(attempt = attempt.label, "solver reported success but returned unusable weights");
                continue;
            }

            let weights: Vec<f64> = x[..n].iter().map(|w| w.max(0.0)).collect();
            let zeta = x[zeta_idx];
            let z_sum: f64 = x[z_off..z_off + t].iter().sum();
            let cvar = zeta + tail_scale * z_sum;

            let portfolio: Vec<f64> = (0..t)
                .map(|s| {
                    window
                        .row(s)
                        .iter()
                        .zip(weights.iter())
                        .map(|(r, w)| r * w)
                        .sum()
                })
                .collect();
            let tracking: Vec<f64> = portfolio
                .iter()
                .zip(benchmark.iter())
                .map(|(p, b)| p - b)
                .collect();

            let turnover = prev
                .map(|prev| crate::types::turnover(&weights, prev))
                .unwrap_or(0.0);

            let solve_time = started.elapsed().as_secs_f64();
            debug!(
                attempt = attempt.label,
                cvar,
                turnover,
                solve_time,
                "optimization solved"
            );

            return Ok(OptimizationResult {
                weights: Some(weights),
                cvar: Some(cvar),
                portfolio_return: Some(mean(&portfolio)),
                portfolio_volatility: Some(population_std(&portfolio)),
                tracking_error: Some(population_std(&tracking)),
                turnover,
                status,
                solve_time,
            });
        }

        let solve_time = started.elapsed().as_secs_f64();
        warn!(reason = %last_reason, "all solver attempts failed");
        Ok(OptimizationResult::failed(last_reason, solve_time))
    }

    /// Per-asset risk contributions `w * (cov . w) / portfolio_stdev`.
    ///
    /// Returns a zero vector when the portfolio variance is below 1e-9.
    pub fn risk_decomposition(&self, window: &ReturnWindow, weights: &[f64]) -> Result<Vec<f64>> {
        let n = window.n_assets();
        let t = window.n_scenarios();
        if weights.len() != n {
            return Err(QuantoroError::InvalidInput(format!(
                "Weights length {} does not match {} assets",
                weights.len(),
                n
            )));
        }
        if t < 2 {
            return Ok(vec![0.0; n]);
        }

        let means: Vec<f64> = (0..n)
            .map(|j| (0..t).map(|s| window.row(s)[j]).sum::<f64>() / t as f64)
            .collect();

        // Sample covariance times the weight vector.
        let mut mctr = vec![0.0; n];
        for i in 0..n {
            for j in 0..n {
                let cov: f64 = (0..t)
                    .map(|s| (window.row(s)[i] - means[i]) * (window.row(s)[j] - means[j]))
                    .sum::<f64>()
                    / (t - 1) as f64;
                mctr[i] += cov * weights[j];
            }
        }

        let variance: f64 = weights.iter().zip(mctr.iter()).map(|(w, m)| w * m).sum();
        if variance < 1e-9 {
            return Ok(vec![0.0; n]);
        }
        let stdev = variance.sqrt();
        Ok(weights
            .iter()
            .zip(mctr.iter())
            .map(|(w, m)| w * m / stdev)
            .collect())
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation with a near-zero-variance guard.
fn population_std(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let m = mean(xs);
    let variance = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64;
    if variance < 1e-18 {
        0.0
    } else {
        variance.sqrt()
    }
}
