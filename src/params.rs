//! Optimizer hyperparameters and regime-based interpolation.
//!
//! The regime-aware path does not mutate optimizer state: it computes an
//! interpolated [`RiskParams`] value and passes it into a stateless solve, so
//! a single optimizer can be shared across threads.

use crate::error::{QuantoroError, Result};
use serde::{Deserialize, Serialize};

/// The hyperparameters a single solve runs under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    /// CVaR confidence level in (0, 1); higher is more conservative.
    pub confidence_level: f64,
    /// L1 sparsity penalty, >= 0.
    pub lasso_penalty: f64,
    /// Per-asset concentration ceiling in (0, 1].
    pub max_weight: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            lasso_penalty: 0.01,
            max_weight: 0.05,
        }
    }
}

impl RiskParams {
    /// A defensive parameter set for risk-off conditions.
    pub fn defensive() -> Self {
        Self {
            confidence_level: 0.99,
            lasso_penalty: 0.05,
            max_weight: 0.03,
        }
    }

    /// Validate that every parameter lies in its admissible range.
    pub fn validate(&self) -> Result<()> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(QuantoroError::ConfigError(format!(
                "confidence_level must lie in (0, 1), got {}",
                self.confidence_level
            )));
        }
        if self.lasso_penalty < 0.0 {
            return Err(QuantoroError::ConfigError(format!(
                "lasso_penalty must be non-negative, got {}",
                self.lasso_penalty
            )));
        }
        if !(self.max_weight > 0.0 && self.max_weight <= 1.0) {
            return Err(QuantoroError::ConfigError(format!(
                "max_weight must lie in (0, 1], got {}",
                self.max_weight
            )));
        }
        Ok(())
    }

    /// Linearly interpolate between a risk-on set (`p = 0`) and a risk-off
    /// set (`p = 1`), each parameter independently.
    pub fn interpolate(risk_on: &RiskParams, risk_off: &RiskParams, risk_off_prob: f64) -> Self {
        let p = risk_off_prob.clamp(0.0, 1.0);
        let lerp = |on: f64, off: f64| on + (off - on) * p;
        Self {
            confidence_level: lerp(risk_on.confidence_level, risk_off.confidence_level),
            lasso_penalty: lerp(risk_on.lasso_penalty, risk_off.lasso_penalty),
            max_weight: lerp(risk_on.max_weight, risk_off.max_weight),
        }
    }
}

/// Risk-on / risk-off endpoints for regime interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeParams {
    /// Parameters at risk-off probability 0.
    pub risk_on: RiskParams,
    /// Parameters at risk-off probability 1.
    pub risk_off: RiskParams,
}

impl Default for RegimeParams {
    fn default() -> Self {
        Self {
            risk_on: RiskParams::default(),
            risk_off: RiskParams::defensive(),
        }
    }
}

impl RegimeParams {
    /// Validate both endpoints.
    pub fn validate(&self) -> Result<()> {
        self.risk_on.validate()?;
        self.risk_off.validate()
    }

    /// Interpolated parameters at a given risk-off probability.
    pub fn at(&self, risk_off_prob: f64) -> RiskParams {
        RiskParams::interpolate(&self.risk_on, &self.risk_off, risk_off_prob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_endpoints() {
        let on = RiskParams::default();
        let off = RiskParams::defensive();

        let at_zero = RiskParams::interpolate(&on, &off, 0.0);
        assert_eq!(at_zero, on);

        let at_one = RiskParams::interpolate(&on, &off, 1.0);
        assert_eq!(at_one, off);
    }

    #[test]
    fn test_interpolation_midpoint() {
        let on = RiskParams {
            confidence_level: 0.95,
            lasso_penalty: 0.01,
            max_weight: 0.05,
        };
        let off = RiskParams {
            confidence_level: 0.99,
            lasso_penalty: 0.05,
            max_weight: 0.03,
        };

        let mid = RiskParams::interpolate(&on, &off, 0.5);
        assert!((mid.confidence_level - 0.97).abs() < 1e-12);
        assert!((mid.lasso_penalty - 0.03).abs() < 1e-12);
        assert!((mid.max_weight - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_interpolation_clamps_probability() {
        let on = RiskParams::default();
        let off = RiskParams::defensive();
        assert_eq!(RiskParams::interpolate(&on, &off, -0.5), on);
        assert_eq!(RiskParams::interpolate(&on, &off, 1.5), off);
    }

    #[test]
    fn test_params_validation() {
        assert!(RiskParams::default().validate().is_ok());

        let bad = RiskParams {
            confidence_level: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = RiskParams {
            lasso_penalty: -0.1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = RiskParams {
            max_weight: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_regime_params_at() {
        let params = RegimeParams::default();
        assert_eq!(params.at(0.0), params.risk_on);
        assert_eq!(params.at(1.0), params.risk_off);
    }
}
