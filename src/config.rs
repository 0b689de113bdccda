//! Configuration file support for backtests.
//!
//! Allows loading backtest configurations from TOML files for reproducibility.

use crate::backtest::{BacktestConfig, RebalanceFrequency};
use crate::error::{QuantoroError, Result};
use crate::optimizer::{ObjectiveTerm, OptimizerConfig, SolverConfig};
use crate::params::{RegimeParams, RiskParams};
use crate::regime::RegimeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete backtest configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestFileConfig {
    /// Optimizer settings.
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    /// Solver settings.
    #[serde(default)]
    pub solver: SolverSettings,
    /// Rolling backtest settings.
    #[serde(default)]
    pub backtest: BacktestSettings,
    /// Regime parameter endpoints; absent means no regime adjustment.
    #[serde(default)]
    pub regime: Option<RegimeEndpointSettings>,
    /// Regime detector settings.
    #[serde(default)]
    pub regime_detector: RegimeDetectorSettings,
}

/// Optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Tail confidence level.
    #[serde(default = "default_confidence")]
    pub confidence_level: f64,
    /// L1 sparsity penalty.
    #[serde(default = "default_lasso")]
    pub lasso_penalty: f64,
    /// Per-asset weight cap.
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
    /// Proportional transaction cost rate.
    #[serde(default = "default_cost_rate")]
    pub transaction_cost_rate: f64,
    /// Alpha tilt factor; zero disables the tilt term.
    #[serde(default)]
    pub alpha_tilt_factor: f64,
}

fn default_confidence() -> f64 { 0.95 }
fn default_lasso() -> f64 { 0.01 }
fn default_max_weight() -> f64 { 0.05 }
fn default_cost_rate() -> f64 { 0.002 }

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            lasso_penalty: 0.01,
            max_weight: 0.05,
            transaction_cost_rate: 0.002,
            alpha_tilt_factor: 0.0,
        }
    }
}

/// Solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Iteration cap for the primary attempt.
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
    /// Iteration cap for the relaxed fallback attempt.
    #[serde(default = "default_fallback_max_iter")]
    pub fallback_max_iter: u32,
    /// Relaxed tolerance for the fallback attempt.
    #[serde(default = "default_fallback_tol")]
    pub fallback_tol: f64,
    /// Print solver progress.
    #[serde(default)]
    pub verbose: bool,
}

fn default_max_iter() -> u32 { 200 }
fn default_fallback_max_iter() -> u32 { 5000 }
fn default_fallback_tol() -> f64 { 1e-4 }

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iter: 200,
            fallback_max_iter: 5000,
            fallback_tol: 1e-4,
            verbose: false,
        }
    }
}

/// Rolling backtest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    /// Trailing history per solve, in trading days.
    #[serde(default = "default_lookback")]
    pub lookback_window: usize,
    /// "daily", "weekly", "monthly", or "quarterly".
    #[serde(default = "default_frequency")]
    pub rebalance_frequency: String,
}

fn default_lookback() -> usize { 252 }
fn default_frequency() -> String { "quarterly".to_string() }

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            lookback_window: 252,
            rebalance_frequency: "quarterly".to_string(),
        }
    }
}

/// Risk-parameter endpoint, one per regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEndpoint {
    /// Tail confidence level.
    pub confidence_level: f64,
    /// L1 sparsity penalty.
    pub lasso_penalty: f64,
    /// Per-asset weight cap.
    pub max_weight: f64,
}

impl RiskEndpoint {
    fn to_params(&self) -> RiskParams {
        RiskParams {
            confidence_level: self.confidence_level,
            lasso_penalty: self.lasso_penalty,
            max_weight: self.max_weight,
        }
    }
}

/// Regime parameter endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeEndpointSettings {
    /// Parameters used when fully risk-on.
    pub risk_on: RiskEndpoint,
    /// Parameters used when fully risk-off.
    pub risk_off: RiskEndpoint,
}

/// Regime detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeDetectorSettings {
    /// Short SMA window.
    #[serde(default = "default_short_window")]
    pub short_window: usize,
    /// Long SMA window.
    #[serde(default = "default_long_window")]
    pub long_window: usize,
    /// Rolling volatility window.
    #[serde(default = "default_vol_window")]
    pub vol_window: usize,
    /// Expanding volatility quantile threshold.
    #[serde(default = "default_vol_quantile")]
    pub vol_quantile: f64,
    /// Ensemble weight of the trend component.
    #[serde(default = "default_trend_weight")]
    pub trend_weight: f64,
    /// Ensemble weight of the volatility component.
    #[serde(default = "default_vol_weight")]
    pub vol_weight: f64,
    /// Optional trailing smoothing window.
    pub smoothing_window: Option<usize>,
}

fn default_short_window() -> usize { 50 }
fn default_long_window() -> usize { 200 }
fn default_vol_window() -> usize { 21 }
fn default_vol_quantile() -> f64 { 0.75 }
fn default_trend_weight() -> f64 { 0.7 }
fn default_vol_weight() -> f64 { 0.3 }

impl Default for RegimeDetectorSettings {
    fn default() -> Self {
        Self {
            short_window: 50,
            long_window: 200,
            vol_window: 21,
            vol_quantile: 0.75,
            trend_weight: 0.7,
            vol_weight: 0.3,
            smoothing_window: None,
        }
    }
}

impl BacktestFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: BacktestFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| QuantoroError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Convert to an [`OptimizerConfig`] for the optimizer.
    pub fn to_optimizer_config(&self) -> Result<OptimizerConfig> {
        let mut tilts = Vec::new();
        if self.optimizer.alpha_tilt_factor != 0.0 {
            tilts.push(ObjectiveTerm::AlphaTilt {
                factor: self.optimizer.alpha_tilt_factor,
            });
        }
        let config = OptimizerConfig {
            params: RiskParams {
                confidence_level: self.optimizer.confidence_level,
                lasso_penalty: self.optimizer.lasso_penalty,
                max_weight: self.optimizer.max_weight,
            },
            transaction_cost_rate: self.optimizer.transaction_cost_rate,
            tilts,
            solver: SolverConfig {
                max_iter: self.solver.max_iter,
                fallback_max_iter: self.solver.fallback_max_iter,
                fallback_tol: self.solver.fallback_tol,
                verbose: self.solver.verbose,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Convert to a [`BacktestConfig`] for the engine.
    pub fn to_backtest_config(&self) -> Result<BacktestConfig> {
        let frequency: RebalanceFrequency = self.backtest.rebalance_frequency.parse()?;
        let regime_params = self.regime.as_ref().map(|r| RegimeParams {
            risk_on: r.risk_on.to_params(),
            risk_off: r.risk_off.to_params(),
        });
        let config = BacktestConfig {
            lookback_window: self.backtest.lookback_window,
            rebalance_frequency: frequency,
            regime_params,
        };
        config.validate()?;
        Ok(config)
    }

    /// Convert to a [`RegimeConfig`] for the detector.
    pub fn to_regime_config(&self) -> Result<RegimeConfig> {
        let config = RegimeConfig {
            short_window: self.regime_detector.short_window,
            long_window: self.regime_detector.long_window,
            vol_window: self.regime_detector.vol_window,
            vol_quantile: self.regime_detector.vol_quantile,
            trend_weight: self.regime_detector.trend_weight,
            vol_weight: self.regime_detector.vol_weight,
            smoothing_window: self.regime_detector.smoothing_window,
        };
        config.validate()?;
        Ok(config)
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Quantoro Backtest Configuration File
# This file configures a CVaR portfolio backtest run

[optimizer]
confidence_level = 0.95
lasso_penalty = 0.01
max_weight = 0.05
transaction_cost_rate = 0.002   # 20 bps per unit turnover
# alpha_tilt_factor = 0.5

[solver]
max_iter = 200
fallback_max_iter = 5000
fallback_tol = 1e-4
verbose = false

[backtest]
lookback_window = 252
rebalance_frequency = "quarterly"   # daily, weekly, monthly, quarterly

# Uncomment to enable regime-aware parameter interpolation:
# [regime.risk_on]
# confidence_level = 0.95
# lasso_penalty = 0.01
# max_weight = 0.05
#
# [regime.risk_off]
# confidence_level = 0.99
# lasso_penalty = 0.05
# max_weight = 0.03

[regime_detector]
short_window = 50
long_window = 200
vol_window = 21
vol_quantile = 0.75
trend_weight = 0.7
vol_weight = 0.3
# smoothing_window = 10
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = BacktestFileConfig::default();
        assert_eq!(config.optimizer.confidence_level, 0.95);
        assert_eq!(config.backtest.rebalance_frequency, "quarterly");
        assert!(config.regime.is_none());
    }

    #[test]
    fn test_load_config() {
        let toml_content = r#"
[optimizer]
confidence_level = 0.99
max_weight = 0.10
alpha_tilt_factor = 0.5

[solver]
max_iter = 500

[backtest]
lookback_window = 120
rebalance_frequency = "monthly"

[regime.risk_on]
confidence_level = 0.95
lasso_penalty = 0.01
max_weight = 0.05

[regime.risk_off]
confidence_level = 0.99
lasso_penalty = 0.05
max_weight = 0.03
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", toml_content).unwrap();

        let config = BacktestFileConfig::load(file.path()).unwrap();
        assert_eq!(config.optimizer.confidence_level, 0.99);
        assert_eq!(config.optimizer.max_weight, 0.10);
        // Omitted fields take defaults.
        assert_eq!(config.optimizer.lasso_penalty, 0.01);
        assert_eq!(config.solver.max_iter, 500);
        assert_eq!(config.solver.fallback_max_iter, 5000);
        assert_eq!(config.backtest.lookback_window, 120);
        let regime = config.regime.as_ref().unwrap();
        assert_eq!(regime.risk_off.max_weight, 0.03);
    }

    #[test]
    fn test_to_optimizer_config() {
        let mut file_config = BacktestFileConfig::default();
        file_config.optimizer.alpha_tilt_factor = 0.5;
        let config = file_config.to_optimizer_config().unwrap();
        assert_eq!(config.tilts.len(), 1);
        assert!((config.params.confidence_level - 0.95).abs() < 1e-12);

        file_config.optimizer.alpha_tilt_factor = 0.0;
        let config = file_config.to_optimizer_config().unwrap();
        assert!(config.tilts.is_empty());
    }

    #[test]
    fn test_to_backtest_config_rejects_bad_frequency() {
        let mut file_config = BacktestFileConfig::default();
        file_config.backtest.rebalance_frequency = "fortnightly".to_string();
        assert!(file_config.to_backtest_config().is_err());
    }

    #[test]
    fn test_round_trip() {
        let mut config = BacktestFileConfig::default();
        config.backtest.lookback_window = 90;
        config.regime = Some(RegimeEndpointSettings {
            risk_on: RiskEndpoint {
                confidence_level: 0.95,
                lasso_penalty: 0.01,
                max_weight: 0.05,
            },
            risk_off: RiskEndpoint {
                confidence_level: 0.99,
                lasso_penalty: 0.05,
                max_weight: 0.03,
            },
        });

        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();
        let loaded = BacktestFileConfig::load(file.path()).unwrap();
        assert_eq!(loaded.backtest.lookback_window, 90);
        assert_eq!(
            loaded.regime.unwrap().risk_off.confidence_level,
            0.99
        );
    }

    #[test]
    fn test_example_parses() {
        let config: BacktestFileConfig = toml::from_str(&BacktestFileConfig::example()).unwrap();
        assert_eq!(config.backtest.lookback_window, 252);
        config.to_optimizer_config().unwrap();
        config.to_backtest_config().unwrap();
        config.to_regime_config().unwrap();
    }
}
