//! Core data types: return panels, weight panels, alpha scores, regime signals.

use crate::error::{QuantoroError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Positions smaller than this are treated as zero when counting holdings.
pub const POSITION_THRESHOLD: f64 = 1e-4;

/// A dense panel of periodic asset returns: ordered trading dates x assets.
///
/// Values are stored row-major (one row per trading date). The panel must be
/// rectangular and free of missing values; upstream cleaning is assumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnMatrix {
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    values: Vec<f64>,
}

impl ReturnMatrix {
    /// Create a return matrix from dates, asset identifiers, and row-major values.
    pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, values: Vec<f64>) -> Result<Self> {
        if dates.is_empty() || assets.is_empty() {
            return Err(QuantoroError::InvalidInput(
                "Return matrix must have at least one date and one asset".to_string(),
            ));
        }
        if values.len() != dates.len() * assets.len() {
            return Err(QuantoroError::InvalidInput(format!(
                "Return matrix shape mismatch: {} dates x {} assets but {} values",
                dates.len(),
                assets.len(),
                values.len()
            )));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(QuantoroError::InvalidInput(
                "Return matrix dates must be strictly increasing".to_string(),
            ));
        }
        {
            let mut seen = std::collections::HashSet::new();
            if assets.iter().any(|a| !seen.insert(a)) {
                return Err(QuantoroError::InvalidInput(
                    "Asset identifiers must be unique".to_string(),
                ));
            }
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(QuantoroError::DataError(
                "Return matrix contains non-finite values".to_string(),
            ));
        }
        Ok(Self {
            dates,
            assets,
            values,
        })
    }

    /// Number of trading dates.
    pub fn n_dates(&self) -> usize {
        self.dates.len()
    }

    /// Number of assets.
    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    /// Trading dates in ascending order.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Asset identifiers (column order).
    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// Returns for one trading date.
    pub fn row(&self, idx: usize) -> &[f64] {
        let n = self.assets.len();
        &self.values[idx * n..(idx + 1) * n]
    }

    /// Index of the last trading date on or before `date`, if any.
    pub fn last_on_or_before(&self, date: NaiveDate) -> Option<usize> {
        let loc = self.dates.partition_point(|d| *d <= date);
        loc.checked_sub(1)
    }

    /// A trailing window of `lookback` rows ending just before `end_idx`
    /// (the row at `end_idx` itself is excluded so the window stays causal).
    pub fn window(&self, end_idx: usize, lookback: usize) -> Result<ReturnWindow<'_>> {
        if end_idx > self.dates.len() {
            return Err(QuantoroError::InvalidInput(format!(
                "Window end {} is out of range ({} dates)",
                end_idx,
                self.dates.len()
            )));
        }
        if end_idx < lookback {
            return Err(QuantoroError::InsufficientHistory {
                required: lookback,
                available: end_idx,
            });
        }
        let start = end_idx - lookback;
        let n = self.assets.len();
        Ok(ReturnWindow {
            dates: &self.dates[start..end_idx],
            assets: &self.assets,
            values: &self.values[start * n..end_idx * n],
        })
    }
}

/// A borrowed slice of a [`ReturnMatrix`]: one lookback window of scenarios.
#[derive(Debug, Clone, Copy)]
pub struct ReturnWindow<'a> {
    dates: &'a [NaiveDate],
    assets: &'a [String],
    values: &'a [f64],
}

impl<'a> ReturnWindow<'a> {
    /// Number of scenarios (trading days) in the window.
    pub fn n_scenarios(&self) -> usize {
        self.dates.len()
    }

    /// Number of assets in the window.
    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    /// Trading dates covered by the window.
    pub fn dates(&self) -> &'a [NaiveDate] {
        self.dates
    }

    /// Asset universe of the window.
    pub fn assets(&self) -> &'a [String] {
        self.assets
    }

    /// Returns for scenario `t`.
    pub fn row(&self, t: usize) -> &'a [f64] {
        let n = self.assets.len();
        &self.values[t * n..(t + 1) * n]
    }

    /// Cross-sectional mean return per scenario, used as the synthetic
    /// benchmark when none is supplied.
    pub fn cross_sectional_mean(&self) -> Vec<f64> {
        let n = self.assets.len() as f64;
        (0..self.n_scenarios())
            .map(|t| self.row(t).iter().sum::<f64>() / n)
            .collect()
    }
}

/// Equal weights over `n` assets: the seed portfolio before the first rebalance.
pub fn equal_weights(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

/// What yesterday's weights become today purely from price movement:
/// `w * (1 + r)` renormalized to sum to 1. Falls back to the input weights
/// when the renormalization denominator is not usable.
pub fn drifted_weights(weights: &[f64], returns: &[f64]) -> Vec<f64> {
    let drifted: Vec<f64> = weights
        .iter()
        .zip(returns.iter())
        .map(|(w, r)| w * (1.0 + r))
        .collect();
    let total: f64 = drifted.iter().sum();
    if total.abs() < 1e-12 || !total.is_finite() {
        return weights.to_vec();
    }
    drifted.iter().map(|w| w / total).collect()
}

/// Turnover between two weight vectors: the sum of absolute weight changes.
pub fn turnover(new_weights: &[f64], old_weights: &[f64]) -> f64 {
    new_weights
        .iter()
        .zip(old_weights.iter())
        .map(|(a, b)| (a - b).abs())
        .sum()
}

/// Count of non-trivial positions in a weight vector.
pub fn count_positions(weights: &[f64]) -> usize {
    weights.iter().filter(|w| **w > POSITION_THRESHOLD).count()
}

/// Per-asset alpha scores snapshotted over time.
///
/// Lookups are as-of: the latest snapshot on or before the requested date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlphaScores {
    snapshots: BTreeMap<NaiveDate, HashMap<String, f64>>,
}

impl AlphaScores {
    /// Create an empty score set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the snapshot for a date.
    pub fn insert(&mut self, date: NaiveDate, scores: HashMap<String, f64>) {
        self.snapshots.insert(date, scores);
    }

    /// The latest snapshot on or before `date`.
    pub fn as_of(&self, date: NaiveDate) -> Option<&HashMap<String, f64>> {
        self.snapshots.range(..=date).next_back().map(|(_, s)| s)
    }

    /// The as-of snapshot aligned to an asset universe, missing entries as 0.
    pub fn aligned_as_of(&self, date: NaiveDate, universe: &[String]) -> Option<Vec<f64>> {
        self.as_of(date).map(|scores| {
            universe
                .iter()
                .map(|a| scores.get(a).copied().unwrap_or(0.0))
                .collect()
        })
    }

    /// Whether any snapshot exists.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// A per-date risk-off probability series produced by the regime detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegimeSignal {
    dates: Vec<NaiveDate>,
    risk_off: Vec<f64>,
}

impl RegimeSignal {
    /// Create a signal from aligned dates and risk-off probabilities.
    pub fn new(dates: Vec<NaiveDate>, risk_off: Vec<f64>) -> Result<Self> {
        if dates.len() != risk_off.len() {
            return Err(QuantoroError::InvalidInput(
                "Regime signal dates and probabilities must have equal length".to_string(),
            ));
        }
        if risk_off.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(QuantoroError::InvalidInput(
                "Regime probabilities must lie in [0, 1]".to_string(),
            ));
        }
        Ok(Self { dates, risk_off })
    }

    /// Dates the signal is defined on.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Risk-off probabilities aligned to [`Self::dates`].
    pub fn risk_off(&self) -> &[f64] {
        &self.risk_off
    }

    /// Risk-on probabilities (complement of risk-off).
    pub fn risk_on(&self) -> Vec<f64> {
        self.risk_off.iter().map(|p| 1.0 - p).collect()
    }

    /// The risk-off probability as of `date` (latest value on or before it).
    pub fn as_of(&self, date: NaiveDate) -> Option<f64> {
        let loc = self.dates.partition_point(|d| *d <= date);
        loc.checked_sub(1).map(|i| self.risk_off[i])
    }

    /// Number of dated observations.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Whether the signal is empty.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// One realized daily portfolio return, net of transaction costs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyReturn {
    /// Trading date.
    pub date: NaiveDate,
    /// Net portfolio return for the date.
    pub value: f64,
}

/// The forward-filled step function of rebalance weights, one row per date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightPanel {
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    values: Vec<f64>,
}

impl WeightPanel {
    pub(crate) fn new(dates: Vec<NaiveDate>, assets: Vec<String>, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), dates.len() * assets.len());
        Self {
            dates,
            assets,
            values,
        }
    }

    /// Trading dates covered by the panel.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Asset identifiers (column order).
    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// Held weights on one trading date.
    pub fn row(&self, idx: usize) -> &[f64] {
        let n = self.assets.len();
        &self.values[idx * n..(idx + 1) * n]
    }

    /// Number of dates.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Whether the panel is empty.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}
