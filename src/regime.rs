//! Market regime detection from price history.
//!
//! Two strictly-causal component signals are blended into a per-date risk-off
//! probability in [0, 1]:
//!
//! - Trend: a moving-average crossover (short SMA below long SMA is risk-off).
//! - Volatility: rolling realized volatility compared against an expanding
//!   quantile of its own history, so the threshold only ever uses the past.
//!
//! Both components are binary per date; the ensemble blend produces the
//! continuous probability consumed by regime-aware parameter interpolation.

use crate::error::{QuantoroError, Result};
use crate::types::RegimeSignal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Regime detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Short simple-moving-average window, in trading days.
    pub short_window: usize,
    /// Long simple-moving-average window, in trading days.
    pub long_window: usize,
    /// Rolling realized-volatility window, in trading days.
    pub vol_window: usize,
    /// Expanding-history quantile above which volatility reads risk-off.
    pub vol_quantile: f64,
    /// Ensemble weight of the trend component.
    pub trend_weight: f64,
    /// Ensemble weight of the volatility component.
    pub vol_weight: f64,
    /// Optional trailing moving-average smoothing of the blended signal.
    pub smoothing_window: Option<usize>,
}

impl Default for RegimeConfig {
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

impl RegimeConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.short_window == 0 || self.long_window == 0 {
            return Err(QuantoroError::ConfigError(
                "SMA windows must be positive".to_string(),
            ));
        }
        if self.short_window >= self.long_window {
            return Err(QuantoroError::ConfigError(format!(
                "Short SMA window {} must be below long window {}",
                self.short_window, self.long_window
            )));
        }
        if self.vol_window < 2 {
            return Err(QuantoroError::ConfigError(
                "Volatility window must be at least 2".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.vol_quantile) {
            return Err(QuantoroError::ConfigError(format!(
                "Volatility quantile must lie in [0, 1), got {}",
                self.vol_quantile
            )));
        }
        if self.trend_weight < 0.0 || self.vol_weight < 0.0 {
            return Err(QuantoroError::ConfigError(
                "Ensemble weights must be non-negative".to_string(),
            ));
        }
        if self.trend_weight + self.vol_weight <= 0.0 {
            return Err(QuantoroError::ConfigError(
                "Ensemble weights must not both be zero".to_string(),
            ));
        }
        if let Some(w) = self.smoothing_window {
            if w == 0 {
                return Err(QuantoroError::ConfigError(
                    "Smoothing window must be positive when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Ensemble regime detector blending trend and volatility components.
pub struct EnsembleRegimeDetector {
    config: RegimeConfig,
}

impl EnsembleRegimeDetector {
    /// Create a detector, validating the configuration.
    pub fn new(config: RegimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create a detector with default settings.
    pub fn default_detector() -> Self {
        Self {
            config: RegimeConfig::default(),
        }
    }

    /// Detector configuration.
    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Compute the risk-off probability series from a price history.
    ///
    /// The output covers only dates where every component is defined; with
    /// less history than the longest warm-up the signal is empty.
    pub fn detect(&self, dates: &[NaiveDate], prices: &[f64]) -> Result<RegimeSignal> {
        if dates.len() != prices.len() {
            return Err(QuantoroError::InvalidInput(
                "Regime dates and prices must have equal length".to_string(),
            ));
        }
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(QuantoroError::DataError(
                "Regime prices must be finite and positive".to_string(),
            ));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(QuantoroError::InvalidInput(
                "Regime dates must be strictly increasing".to_string(),
            ));
        }

        let trend = self.trend_component(prices);
        let vol = self.vol_component(prices);

        // The blended signal starts where both components are defined.
        let trend_start = self.config.long_window.saturating_sub(1);
        let vol_start = self.config.vol_window;
        let start = trend_start.max(vol_start);
        if start >= prices.len() {
            warn!(
                required = start + 1,
                available = prices.len(),
                "insufficient price history for regime detection"
            );
            return RegimeSignal::new(Vec::new(), Vec::new());
        }

        let total = self.config.trend_weight + self.config.vol_weight;
        let tw = self.config.trend_weight / total;
        let vw = self.config.vol_weight / total;

        let mut risk_off: Vec<f64> = (start..prices.len())
            .map(|i| tw * trend[i] + vw * vol[i])
            .collect();

        if let Some(window) = self.config.smoothing_window {
            risk_off = trailing_mean(&risk_off, window);
        }
        debug!(
            observations = risk_off.len(),
            first_date = %dates[start],
            "regime signal computed"
        );

        RegimeSignal::new(dates[start..].to_vec(), risk_off)
    }

    /// Binary trend signal per price index: 1 unless the short SMA sits
    /// strictly above the long SMA, so a tie reads risk-off. Undefined (0)
    /// before the long window fills.
    fn trend_component(&self, prices: &[f64]) -> Vec<f64> {
        let short_sma = rolling_mean(prices, self.config.short_window);
        let long_sma = rolling_mean(prices, self.config.long_window);
        prices
            .iter()
            .enumerate()
            .map(|(i, _)| match (short_sma[i], long_sma[i]) {
                (Some(s), Some(l)) if s <= l => 1.0,
                _ => 0.0,
            })
            .collect()
    }

    /// Binary volatility signal per price index: 1 when rolling realized
    /// volatility exceeds the expanding quantile of its own past values.
    /// The threshold at index i only sees volatilities up to and including i,
    /// so appending future data never changes earlier outputs.
    fn vol_component(&self, prices: &[f64]) -> Vec<f64> {
        let returns: Vec<f64> = prices
            .windows(2)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        let vols = rolling_std(&returns, self.config.vol_window);

        let mut signal = vec![0.0; prices.len()];
        let mut history = SortedHistory::new();
        for (ri, vol) in vols.iter().enumerate() {
            let Some(v) = vol else { continue };
            history.insert(*v);
            let threshold = history.quantile(self.config.vol_quantile);
            // returns index ri corresponds to price index ri + 1
            if *v > threshold {
                signal[ri + 1] = 1.0;
            }
        }
        signal
    }
}

/// Rolling simple mean with a trailing window; `None` until the window fills.
fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= window {
            sum -= values[i - window];
        }
        if i + 1 >= window {
            out.push(Some(sum / window as f64));
        } else {
            out.push(None);
        }
    }
    out
}

/// Rolling sample standard deviation with a trailing window.
fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        if i + 1 < window {
            out.push(None);
            continue;
        }
        let slice = &values[i + 1 - window..=i];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window as f64 - 1.0);
        out.push(Some(var.sqrt()));
    }
    out
}

/// Trailing moving average; shorter windows at the start of the series.
fn trailing_mean(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// A sorted insert-only history supporting interpolated quantiles.
struct SortedHistory {
    values: Vec<f64>,
}

impl SortedHistory {
    fn new() -> Self {
        Self { values: Vec::new() }
    }

    fn insert(&mut self, v: f64) {
        let pos = self.values.partition_point(|x| *x < v);
        self.values.insert(pos, v);
    }

    /// Linearly interpolated quantile of everything inserted so far.
    fn quantile(&self, q: f64) -> f64 {
        let n = self.values.len();
        if n == 1 {
            return self.values[0];
        }
        let rank = q * (n - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let frac = rank - lo as f64;
        self.values[lo] + frac * (self.values[hi] - self.values[lo])
    }
}
