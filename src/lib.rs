//! Quantoro - CVaR portfolio construction and rolling backtesting.
//!
//! # Overview
//!
//! Quantoro builds long-only portfolios that minimize Conditional Value-at-Risk
//! (CVaR) of returns relative to a benchmark, and simulates them over time:
//!
//! - **Scenario CVaR optimization**: the Rockafellar-Uryasev linear
//!   reformulation over historical return scenarios, solved with Clarabel
//! - **LASSO sparsity**: an L1 penalty that concentrates the portfolio in a
//!   small number of positions
//! - **Alpha tilts**: composable objective terms that tilt weights toward
//!   assets with higher expected-return scores
//! - **Regime awareness**: a trend/volatility ensemble detector whose risk-off
//!   probability continuously interpolates the risk parameters per rebalance
//! - **Rolling backtests**: calendar-scheduled rebalances over trailing
//!   windows, with drift-aware transaction cost accounting and hold-on-failure
//!   recovery
//! - **Parameter sweeps**: independent configurations run in parallel
//! - **Configuration files**: TOML-based configuration for reproducible runs
//!
//! # Quick Start
//!
//! ```no_run
//! use quantoro::{
//!     backtest::{BacktestConfig, RebalanceFrequency, RollingBacktest},
//!     data::load_returns_csv,
//!     optimizer::{CvarOptimizer, OptimizerConfig},
//!     analytics::PortfolioMetrics,
//! };
//!
//! let returns = load_returns_csv("data/returns.csv").unwrap();
//!
//! let optimizer = CvarOptimizer::new(OptimizerConfig::default()).unwrap();
//! let engine = RollingBacktest::new(
//!     BacktestConfig {
//!         lookback_window: 252,
//!         rebalance_frequency: RebalanceFrequency::Quarterly,
//!         regime_params: None,
//!     },
//!     optimizer,
//! )
//! .unwrap();
//!
//! let output = engine.run(&returns, None, None, None).unwrap();
//!
//! let daily: Vec<f64> = output.daily_returns.iter().map(|r| r.value).collect();
//! let metrics = PortfolioMetrics::calculate(&daily, None).unwrap();
//! println!("Annual return: {:.2}%", metrics.annual_return * 100.0);
//! println!("Sharpe: {:.2}", metrics.sharpe_ratio);
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core data types (return panels, weight panels, alpha scores)
//! - [`params`]: Risk parameters and regime interpolation
//! - [`optimizer`]: The scenario CVaR optimizer
//! - [`backtest`]: Rolling backtest engine and parameter sweeps
//! - [`regime`]: Trend/volatility ensemble regime detection
//! - [`analytics`]: Performance and concentration metrics
//! - [`data`]: CSV loading for return panels and price series
//! - [`config`]: TOML configuration file support

pub mod analytics;
pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod optimizer;
pub mod params;
pub mod regime;
pub mod types;

// Re-exports for convenience
pub use analytics::{PortfolioMetrics, WeightConcentration};
pub use backtest::{
    rebalance_schedule, run_parameter_sweep, BacktestConfig, BacktestOutput, RebalanceEvent,
    RebalanceFrequency, RollingBacktest,
};
pub use config::BacktestFileConfig;
pub use data::{load_price_series_csv, load_returns_csv, prices_to_returns};
pub use error::{QuantoroError, Result};
pub use optimizer::{
    CvarOptimizer, ObjectiveTerm, OptimizationResult, OptimizerConfig, SolveRequest, SolverConfig,
    SolverStatus,
};
pub use params::{RegimeParams, RiskParams};
pub use regime::{EnsembleRegimeDetector, RegimeConfig};
pub use types::{
    count_positions, drifted_weights, equal_weights, turnover, AlphaScores, DailyReturn,
    RegimeSignal, ReturnMatrix, ReturnWindow, WeightPanel,
};
