//! Performance and concentration analytics for backtest output.

use crate::error::{QuantoroError, Result};
use crate::types::count_positions;
use serde::{Deserialize, Serialize};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Summary statistics over a daily net return series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    /// Annualized arithmetic mean return.
    pub annual_return: f64,
    /// Annualized volatility.
    pub annual_volatility: f64,
    /// Annualized Sharpe ratio (zero risk-free rate).
    pub sharpe_ratio: f64,
    /// Annualized Sortino ratio; infinite when no downside observations exist.
    pub sortino_ratio: f64,
    /// Annual return over the magnitude of the maximum drawdown.
    pub calmar_ratio: f64,
    /// Maximum peak-to-trough drawdown of the compounded equity curve (negative).
    pub max_drawdown: f64,
    /// Historical daily CVaR at 95% confidence (expected tail loss, positive).
    pub cvar_95: f64,
    /// Historical daily CVaR at 99% confidence.
    pub cvar_99: f64,
    /// Annualized tracking error versus the benchmark, when one is supplied.
    pub tracking_error: Option<f64>,
    /// Annualized information ratio versus the benchmark.
    pub information_ratio: Option<f64>,
    /// Beta to the benchmark.
    pub beta: Option<f64>,
    /// Return correlation with the benchmark.
    pub correlation: Option<f64>,
}

impl PortfolioMetrics {
    /// Compute metrics over a daily return series, optionally against an
    /// aligned benchmark series.
    pub fn calculate(returns: &[f64], benchmark: Option<&[f64]>) -> Result<Self> {
        if returns.len() < 2 {
            return Err(QuantoroError::InvalidInput(format!(
                "Need at least 2 return observations, got {}",
                returns.len()
            )));
        }
        if let Some(bench) = benchmark {
            if bench.len() != returns.len() {
                return Err(QuantoroError::InvalidInput(format!(
                    "Benchmark length {} does not match {} returns",
                    bench.len(),
                    returns.len()
                )));
            }
        }

        let mean_return = mean(returns);
        let vol = sample_std(returns);
        let annual_return = mean_return * TRADING_DAYS_PER_YEAR;
        let annual_volatility = vol * TRADING_DAYS_PER_YEAR.sqrt();
        let sharpe_ratio = if annual_volatility > 1e-12 {
            annual_return / annual_volatility
        } else {
            0.0
        };

        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let sortino_ratio = if downside.is_empty() {
            f64::INFINITY
        } else {
            let downside_var =
                downside.iter().map(|r| r * r).sum::<f64>() / returns.len() as f64;
            let downside_dev = downside_var.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
            if downside_dev > 1e-12 {
                annual_return / downside_dev
            } else {
                f64::INFINITY
            }
        };

        let max_drawdown = max_drawdown(returns);
        let calmar_ratio = if max_drawdown.abs() > 1e-12 {
            annual_return / max_drawdown.abs()
        } else {
            0.0
        };

        let (tracking_error, information_ratio, beta, correlation) = match benchmark {
            Some(bench) => {
                let active: Vec<f64> = returns
                    .iter()
                    .zip(bench.iter())
                    .map(|(r, b)| r - b)
                    .collect();
                let te = sample_std(&active) * TRADING_DAYS_PER_YEAR.sqrt();
                let ir = if te > 1e-12 {
                    mean(&active) * TRADING_DAYS_PER_YEAR / te
                } else {
                    0.0
                };
                let bench_var = sample_std(bench).powi(2);
                let cov = sample_cov(returns, bench);
                let beta = if bench_var > 1e-12 { cov / bench_var } else { 0.0 };
                let denom = sample_std(returns) * sample_std(bench);
                let corr = if denom > 1e-12 { cov / denom } else { 0.0 };
                (Some(te), Some(ir), Some(beta), Some(corr))
            }
            None => (None, None, None, None),
        };

        Ok(Self {
            annual_return,
            annual_volatility,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            max_drawdown,
            cvar_95: historical_cvar(returns, 0.95),
            cvar_99: historical_cvar(returns, 0.99),
            tracking_error,
            information_ratio,
            beta,
            correlation,
        })
    }
}

/// Concentration statistics of a single weight vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightConcentration {
    /// Inverse Herfindahl index: the equivalent number of equal-weight bets.
    pub effective_n: f64,
    /// Largest single position.
    pub max_weight: f64,
    /// Count of non-trivial positions.
    pub n_positions: usize,
    /// Total weight held in the five largest positions.
    pub top5_concentration: f64,
}

impl WeightConcentration {
    /// Compute concentration statistics for a weight vector.
    pub fn calculate(weights: &[f64]) -> Self {
        let herfindahl: f64 = weights.iter().map(|w| w * w).sum();
        let effective_n = if herfindahl > 1e-12 {
            1.0 / herfindahl
        } else {
            0.0
        };
        let max_weight = weights.iter().copied().fold(0.0, f64::max);
        let n_positions = count_positions(weights);

        let mut sorted: Vec<f64> = weights.to_vec();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let top5_concentration = sorted.iter().take(5).sum();

        Self {
            effective_n,
            max_weight,
            n_positions,
            top5_concentration,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    var.sqrt()
}

fn sample_cov(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < 2 {
        return 0.0;
    }
    let ma = mean(a);
    let mb = mean(b);
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / (a.len() as f64 - 1.0)
}

/// Maximum drawdown of the compounded equity curve, as a negative fraction.
fn max_drawdown(returns: &[f64]) -> f64 {
    let mut equity = 1.0f64;
    let mut peak = 1.0f64;
    let mut worst = 0.0f64;
    for r in returns {
        equity *= 1.0 + r;
        peak = peak.max(equity);
        worst = worst.min(equity / peak - 1.0);
    }
    worst
}

/// Linearly interpolated percentile of a sorted copy of `values`.
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = q * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Historical CVaR at the given confidence level: the mean loss in the tail
/// beyond the empirical VaR, reported as a positive number.
fn historical_cvar(returns: &[f64], confidence: f64) -> f64 {
    let var = percentile(returns, 1.0 - confidence);
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
    if tail.is_empty() {
        return -var;
    }
    -(tail.iter().sum::<f64>() / tail.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oscillating(count: usize) -> Vec<f64> {
        (0..count).map(|i| (i as f64 * 0.37).sin() * 0.01).collect()
    }

    #[test]
    fn test_rejects_short_series() {
        assert!(PortfolioMetrics::calculate(&[0.01], None).is_err());
    }

    #[test]
    fn test_rejects_misaligned_benchmark() {
        let returns = oscillating(50);
        assert!(PortfolioMetrics::calculate(&returns, Some(&returns[..40])).is_err());
    }

    #[test]
    fn test_annualization() {
        let returns = vec![0.001; 100];
        let m = PortfolioMetrics::calculate(&returns, None).unwrap();
        assert!((m.annual_return - 0.252).abs() < 1e-12);
        // Constant returns: zero volatility, guarded Sharpe, no downside.
        assert!(m.annual_volatility < 1e-12);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert!(m.sortino_ratio.is_infinite());
        assert!(m.max_drawdown.abs() < 1e-12);
    }

    #[test]
    fn test_max_drawdown() {
        // +10%, -50%, +10%: trough at 0.55x the peak.
        let returns = vec![0.10, -0.50, 0.10];
        let m = PortfolioMetrics::calculate(&returns, None).unwrap();
        assert!((m.max_drawdown - (-0.50)).abs() < 1e-12);
        assert!(m.calmar_ratio < 0.0);
    }

    #[test]
    fn test_historical_cvar_is_tail_mean() {
        // 19 zeros and one -10% day: the 95% tail is the worst day.
        let mut returns = vec![0.0; 19];
        returns.push(-0.10);
        let cvar = historical_cvar(&returns, 0.95);
        assert!(cvar > 0.0);
        assert!(cvar <= 0.10 + 1e-12);
        // The 99% tail is at least as severe as the 95% tail.
        assert!(historical_cvar(&returns, 0.99) >= cvar - 1e-12);
    }

    #[test]
    fn test_benchmark_relative_metrics() {
        let returns = oscillating(100);
        // Portfolio tracks the benchmark exactly: zero TE, unit beta.
        let m = PortfolioMetrics::calculate(&returns, Some(&returns)).unwrap();
        assert!(m.tracking_error.unwrap() < 1e-12);
        assert_eq!(m.information_ratio.unwrap(), 0.0);
        assert!((m.beta.unwrap() - 1.0).abs() < 1e-9);
        assert!((m.correlation.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_information_ratio_from_active_mean() {
        // Portfolio beats the benchmark by 20 bps every other day: the
        // active series has mean 0.001 and a known sample deviation.
        let bench = oscillating(100);
        let returns: Vec<f64> = bench
            .iter()
            .enumerate()
            .map(|(i, b)| b + if i % 2 == 0 { 0.002 } else { 0.0 })
            .collect();
        let m = PortfolioMetrics::calculate(&returns, Some(&bench)).unwrap();

        let te = m.tracking_error.unwrap();
        assert!(te > 0.0);
        let expected_ir = 0.001 * 252.0 / te;
        assert!((m.information_ratio.unwrap() - expected_ir).abs() < 1e-9);
    }

    #[test]
    fn test_no_benchmark_leaves_relative_metrics_unset() {
        let m = PortfolioMetrics::calculate(&oscillating(50), None).unwrap();
        assert!(m.tracking_error.is_none());
        assert!(m.information_ratio.is_none());
        assert!(m.beta.is_none());
        assert!(m.correlation.is_none());
    }

    #[test]
    fn test_weight_concentration() {
        let c = WeightConcentration::calculate(&[0.25, 0.25, 0.25, 0.25]);
        assert!((c.effective_n - 4.0).abs() < 1e-12);
        assert_eq!(c.n_positions, 4);
        assert!((c.top5_concentration - 1.0).abs() < 1e-12);
        assert!((c.max_weight - 0.25).abs() < 1e-12);

        let c = WeightConcentration::calculate(&[1.0, 0.0, 0.0]);
        assert!((c.effective_n - 1.0).abs() < 1e-12);
        assert_eq!(c.n_positions, 1);
    }

    #[test]
    fn test_percentile_interpolation() {
        let values = vec![4.0, 1.0, 3.0, 2.0];
        assert!((percentile(&values, 0.5) - 2.5).abs() < 1e-12);
        assert!((percentile(&values, 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(&values, 1.0) - 4.0).abs() < 1e-12);
    }
}
