//! End-to-end tests for the full optimize-and-backtest pipeline.

use chrono::NaiveDate;
use quantoro::{
    equal_weights, turnover, AlphaScores, BacktestConfig, CvarOptimizer, ObjectiveTerm,
    OptimizerConfig, PortfolioMetrics, QuantoroError, RebalanceFrequency, RegimeParams,
    RegimeSignal, ReturnMatrix, RiskParams, RollingBacktest, WeightConcentration,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

fn consecutive_dates(start: &str, count: usize) -> Vec<NaiveDate> {
    let start: NaiveDate = start.parse().unwrap();
    (0..count)
        .map(|i| start + chrono::Duration::days(i as i64))
        .collect()
}

/// A seeded 5-asset, 300-day return panel of consecutive calendar days.
fn seeded_panel(seed: u64) -> ReturnMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let assets: Vec<String> = ["AAA", "BBB", "CCC", "DDD", "EEE"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut values = Vec::with_capacity(300 * 5);
    for _ in 0..300 {
        for j in 0..5 {
            // Mildly heterogeneous drift and dispersion per asset.
            let drift = 0.0002 * j as f64;
            values.push(drift + rng.gen_range(-0.015..0.015));
        }
    }
    ReturnMatrix::new(consecutive_dates("2020-01-01", 300), assets, values).unwrap()
}

fn quarterly_engine(max_weight: f64, regime_params: Option<RegimeParams>) -> RollingBacktest {
    let optimizer = CvarOptimizer::new(OptimizerConfig {
        params: RiskParams {
            max_weight,
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap();
    RollingBacktest::new(
        BacktestConfig {
            lookback_window: 120,
            rebalance_frequency: RebalanceFrequency::Quarterly,
            regime_params,
        },
        optimizer,
    )
    .unwrap()
}

#[test]
fn quarterly_backtest_over_300_days() {
    let panel = seeded_panel(42);
    let engine = quarterly_engine(0.4, None);
    let output = engine.run(&panel, None, None, None).unwrap();

    // Quarter ends at indices 90 (Mar 31, inside the lookback warm-up),
    // 181 (Jun 30), and 273 (Sep 30): exactly two eligible rebalances.
    assert_eq!(output.rebalances.len(), 2);
    assert_eq!(
        output.rebalances[0].date,
        "2020-06-30".parse::<NaiveDate>().unwrap()
    );
    assert_eq!(
        output.rebalances[1].date,
        "2020-09-30".parse::<NaiveDate>().unwrap()
    );

    for event in &output.rebalances {
        assert_eq!(event.status, "optimal");
        let sum: f64 = event.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "weights sum to {}", sum);
        for &w in &event.weights {
            assert!(w >= -1e-6, "negative weight {}", w);
            assert!(w <= 0.4 + 1e-4, "weight {} above cap", w);
        }
        assert!(event.cvar.is_some());
        assert!(event.n_positions > 0);
    }

    // First rebalance turnover is measured against the equal-weight seed.
    let first = &output.rebalances[0];
    let expected = turnover(&first.weights, &equal_weights(5));
    assert!((first.turnover - expected).abs() < 1e-9);

    // Daily record spans the full horizon, seed period included.
    assert_eq!(output.daily_returns.len(), 300);
    assert_eq!(output.weight_panel.len(), 300);
    assert_eq!(output.weight_panel.row(0), equal_weights(5).as_slice());
}

#[test]
fn backtest_is_deterministic() {
    let panel = seeded_panel(7);
    let a = quarterly_engine(0.4, None).run(&panel, None, None, None).unwrap();
    let b = quarterly_engine(0.4, None).run(&panel, None, None, None).unwrap();

    assert_eq!(a.rebalances.len(), b.rebalances.len());
    for (ea, eb) in a.rebalances.iter().zip(b.rebalances.iter()) {
        assert_eq!(ea.date, eb.date);
        assert_eq!(ea.weights, eb.weights);
        assert_eq!(ea.status, eb.status);
    }
    for (ra, rb) in a.daily_returns.iter().zip(b.daily_returns.iter()) {
        assert_eq!(ra.value, rb.value);
    }
}

#[test]
fn regime_aware_backtest_tightens_exposure() {
    let panel = seeded_panel(11);
    let regime_params = RegimeParams {
        risk_on: RiskParams {
            max_weight: 0.4,
            ..Default::default()
        },
        risk_off: RiskParams {
            confidence_level: 0.99,
            lasso_penalty: 0.05,
            max_weight: 0.25,
        },
    };
    let engine = quarterly_engine(0.4, Some(regime_params));

    // Permanently risk-off: every rebalance uses the tightened cap.
    let signal =
        RegimeSignal::new(panel.dates().to_vec(), vec![1.0; panel.n_dates()]).unwrap();
    let output = engine.run(&panel, None, None, Some(&signal)).unwrap();

    assert!(!output.rebalances.is_empty());
    for event in &output.rebalances {
        assert_eq!(event.status, "optimal");
        for &w in &event.weights {
            assert!(w <= 0.25 + 1e-4, "weight {} above risk-off cap", w);
        }
    }
}

#[test]
fn alpha_tilt_requires_scores() {
    let panel = seeded_panel(3);
    let optimizer = CvarOptimizer::new(OptimizerConfig {
        params: RiskParams {
            max_weight: 0.4,
            ..Default::default()
        },
        tilts: vec![ObjectiveTerm::AlphaTilt { factor: 0.5 }],
        ..Default::default()
    })
    .unwrap();
    let engine = RollingBacktest::new(
        BacktestConfig {
            lookback_window: 120,
            rebalance_frequency: RebalanceFrequency::Quarterly,
            regime_params: None,
        },
        optimizer,
    )
    .unwrap();

    let err = engine.run(&panel, None, None, None).unwrap_err();
    assert!(matches!(err, QuantoroError::MissingAlphaScores));
}

#[test]
fn alpha_tilt_with_scores_runs() {
    let panel = seeded_panel(3);
    let optimizer = CvarOptimizer::new(OptimizerConfig {
        params: RiskParams {
            max_weight: 0.4,
            ..Default::default()
        },
        tilts: vec![ObjectiveTerm::AlphaTilt { factor: 0.5 }],
        ..Default::default()
    })
    .unwrap();
    let engine = RollingBacktest::new(
        BacktestConfig {
            lookback_window: 120,
            rebalance_frequency: RebalanceFrequency::Quarterly,
            regime_params: None,
        },
        optimizer,
    )
    .unwrap();

    let mut scores = AlphaScores::new();
    let mut snap = HashMap::new();
    for (j, asset) in panel.assets().iter().enumerate() {
        snap.insert(asset.clone(), j as f64 * 0.1);
    }
    scores.insert(panel.dates()[0], snap);

    let output = engine.run(&panel, None, Some(&scores), None).unwrap();
    assert_eq!(output.rebalances.len(), 2);
    for event in &output.rebalances {
        assert_eq!(event.status, "optimal");
        let sum: f64 = event.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }
}

#[test]
fn infeasible_cap_holds_seed_portfolio() {
    let panel = seeded_panel(19);
    // 5 assets, cap 0.15: sum cannot reach 1, every solve fails.
    let engine = quarterly_engine(0.15, None);
    let output = engine.run(&panel, None, None, None).unwrap();

    assert_eq!(output.rebalances.len(), 2);
    let seed = equal_weights(5);
    for event in &output.rebalances {
        assert_eq!(event.status, "failed_optimization");
        assert_eq!(event.weights, seed);
        assert_eq!(event.turnover, 0.0);
    }
    // Held at the seed portfolio throughout.
    for i in 0..output.weight_panel.len() {
        assert_eq!(output.weight_panel.row(i), seed.as_slice());
    }
}

#[test]
fn metrics_over_backtest_output() {
    let panel = seeded_panel(23);
    let engine = quarterly_engine(0.4, None);
    let output = engine.run(&panel, None, None, None).unwrap();

    let daily: Vec<f64> = output.daily_returns.iter().map(|r| r.value).collect();
    let metrics = PortfolioMetrics::calculate(&daily, None).unwrap();
    assert!(metrics.annual_volatility > 0.0);
    assert!(metrics.max_drawdown <= 0.0);
    assert!(metrics.cvar_95 > 0.0);
    assert!(metrics.cvar_99 >= metrics.cvar_95 - 1e-12);

    let last = output.rebalances.last().unwrap();
    let concentration = WeightConcentration::calculate(&last.weights);
    assert!(concentration.effective_n >= 1.0);
    assert!(concentration.max_weight <= 0.4 + 1e-4);
}
