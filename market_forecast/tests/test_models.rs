use approx::assert_relative_eq;
use chrono::{DateTime, TimeZone, Utc};
use market_forecast::cancel::CancellationFlag;
use market_forecast::config::{FeatureConfig, ModelConfig, ModelKind, TreeEnsembleConfig};
use market_forecast::data::{MetricKey, Observation, TimeSeries};
use market_forecast::error::ForecastError;
use market_forecast::features::FeatureEngine;
use market_forecast::models::{ModelAdapter, ModelInput};
use rstest::rstest;

fn month(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018 + (i / 12) as i32, (i % 12) as u32 + 1, 1, 0, 0, 0)
        .unwrap()
}

fn series_from(values: &[Option<f64>]) -> TimeSeries {
    let observations = values
        .iter()
        .enumerate()
        .map(|(i, v)| Observation::new(month(i), *v))
        .collect();
    TimeSeries::new(MetricKey::global("ai_market_revenue"), observations).unwrap()
}

fn input(values: &[f64]) -> ModelInput {
    let series = series_from(&values.iter().copied().map(Some).collect::<Vec<_>>());
    ModelInput::new(series, FeatureEngine::new(FeatureConfig::default()).unwrap()).unwrap()
}

fn adapter(kind: ModelKind) -> ModelAdapter {
    ModelAdapter::from_config(kind, &ModelConfig::default())
}

fn logistic(n: usize) -> Vec<f64> {
    (0..n)
        .map(|t| {
            let t = t as f64;
            500.0 / (1.0 + (-0.5 * (t - 10.0)).exp()) + 2.0 * t.sin()
        })
        .collect()
}

#[rstest]
#[case(ModelKind::Statistical, 3)]
#[case(ModelKind::GrowthCurve, 6)]
#[case(ModelKind::TreeEnsemble, 12)]
fn test_minimum_data_points(#[case] kind: ModelKind, #[case] minimum: usize) {
    let adapter = adapter(kind);
    assert_eq!(adapter.minimum_data_points(), minimum);
    assert_eq!(adapter.id(), kind.as_str());

    let values: Vec<f64> = (0..minimum - 1).map(|i| 10.0 + i as f64).collect();
    let result = adapter.fit(&input(&values), &CancellationFlag::new());
    match result {
        Err(ForecastError::InsufficientData {
            required,
            available,
            ..
        }) => {
            assert_eq!(required, minimum);
            assert_eq!(available, minimum - 1);
        }
        other => panic!("expected InsufficientData, got {:?}", other.map(|m| m.kind())),
    }
}

#[test]
fn test_statistical_extrapolates_linear_trend() {
    let values: Vec<f64> = (0..12).map(|t| 10.0 + 2.0 * t as f64).collect();
    let fitted = adapter(ModelKind::Statistical)
        .fit(&input(&values), &CancellationFlag::new())
        .unwrap();

    let forecast = fitted.predict(3).unwrap();
    assert_eq!(forecast.horizon(), 3);
    assert_eq!(forecast.model, ModelKind::Statistical);
    for (h, point) in forecast.points.iter().enumerate() {
        assert_relative_eq!(point.value, 32.0 + 2.0 * (h as f64 + 1.0), epsilon = 1e-9);
        assert_eq!(point.timestamp, month(12 + h));
    }
}

#[test]
fn test_statistical_variance_grows_with_horizon() {
    let values = [10.0, 13.0, 11.0, 15.0, 14.0, 18.0, 16.0, 20.0];
    let fitted = adapter(ModelKind::Statistical)
        .fit(&input(&values), &CancellationFlag::new())
        .unwrap();

    let forecast = fitted.predict(4).unwrap();
    let variances: Vec<f64> = forecast.points.iter().map(|p| p.variance.unwrap()).collect();
    assert!(fitted.residual_variance() > 0.0);
    assert!(variances.windows(2).all(|w| w[1] >= w[0]));
}

#[test]
fn test_statistical_is_deterministic() {
    let values = [5.0, 7.0, 6.0, 9.0, 8.0, 11.0];
    let a = adapter(ModelKind::Statistical)
        .fit(&input(&values), &CancellationFlag::new())
        .unwrap()
        .predict(5)
        .unwrap();
    let b = adapter(ModelKind::Statistical)
        .fit(&input(&values), &CancellationFlag::new())
        .unwrap()
        .predict(5)
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_predict_requires_positive_horizon() {
    let fitted = adapter(ModelKind::Statistical)
        .fit(&input(&[1.0, 2.0, 3.0]), &CancellationFlag::new())
        .unwrap();
    assert!(matches!(fitted.predict(0), Err(ForecastError::InvalidHorizon(0))));
}

#[test]
fn test_forecast_starts_after_trailing_gap() {
    let series = series_from(&[Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), None, None]);
    let input = ModelInput::new(series, FeatureEngine::new(FeatureConfig::default()).unwrap())
        .unwrap();

    let forecast = adapter(ModelKind::Statistical)
        .fit(&input, &CancellationFlag::new())
        .unwrap()
        .predict(2)
        .unwrap();

    assert_eq!(forecast.timestamps(), vec![month(7), month(8)]);
}

#[test]
fn test_growth_curve_fits_s_curve() {
    let values = logistic(24);
    let fitted = adapter(ModelKind::GrowthCurve)
        .fit(&input(&values), &CancellationFlag::new())
        .unwrap();

    let forecast = fitted.predict(6).unwrap();
    let last = values[values.len() - 1];
    for point in &forecast.points {
        // saturating: close to the observed plateau, never far above it
        assert!(point.value > last * 0.9);
        assert!(point.value < 560.0);
        assert!(point.variance.unwrap() >= 0.0);
    }
}

#[test]
fn test_growth_curve_rejects_non_positive_series() {
    let values: Vec<f64> = (0..10).map(|t| -1.0 - t as f64).collect();
    let result = adapter(ModelKind::GrowthCurve).fit(&input(&values), &CancellationFlag::new());

    assert!(matches!(result, Err(ForecastError::FitNonConvergence { .. })));
    assert!(result.unwrap_err().is_recoverable());
}

#[test]
fn test_tree_ensemble_follows_trend() {
    let values: Vec<f64> = (0..30)
        .map(|t| 100.0 + 3.0 * t as f64 + (t as f64).sin())
        .collect();
    let fitted = adapter(ModelKind::TreeEnsemble)
        .fit(&input(&values), &CancellationFlag::new())
        .unwrap();

    let forecast = fitted.predict(3).unwrap();
    let last = values[29];
    assert_eq!(forecast.horizon(), 3);
    assert!(forecast.points[0].value > last);
    for (h, point) in forecast.points.iter().enumerate() {
        let linear = 100.0 + 3.0 * (30 + h) as f64;
        assert!((point.value - linear).abs() / linear < 0.15);
        assert!(point.variance.unwrap() > 0.0);
    }
}

#[test]
fn test_tree_ensemble_is_reproducible_with_seed() {
    let values: Vec<f64> = (0..20).map(|t| 50.0 + (t as f64 * 0.7).sin() * 5.0 + t as f64).collect();
    let config = ModelConfig {
        tree_ensemble: TreeEnsembleConfig {
            seed: 7,
            ..TreeEnsembleConfig::default()
        },
        ..ModelConfig::default()
    };
    let adapter = ModelAdapter::from_config(ModelKind::TreeEnsemble, &config);

    let a = adapter
        .fit(&input(&values), &CancellationFlag::new())
        .unwrap()
        .predict(4)
        .unwrap();
    let b = adapter
        .fit(&input(&values), &CancellationFlag::new())
        .unwrap()
        .predict(4)
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_cancelled_fit_returns_cancelled() {
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let values: Vec<f64> = (0..20).map(|t| t as f64 + 1.0).collect();
    for kind in [ModelKind::Statistical, ModelKind::TreeEnsemble, ModelKind::GrowthCurve] {
        let result = adapter(kind).fit(&input(&values), &cancel);
        assert!(matches!(result, Err(ForecastError::Cancelled)));
    }
}

#[test]
fn test_child_flag_follows_parent() {
    let parent = CancellationFlag::new();
    let child = parent.child();
    let sibling = parent.child();

    child.cancel();
    assert!(child.is_cancelled());
    assert!(!sibling.is_cancelled());
    assert!(!parent.is_cancelled());

    parent.cancel();
    assert!(sibling.is_cancelled());
}

#[test]
fn test_fitting_leaves_input_untouched() {
    let input = input(&logistic(20));
    let before = input.series.clone();

    for kind in [ModelKind::Statistical, ModelKind::TreeEnsemble, ModelKind::GrowthCurve] {
        let _ = adapter(kind).fit(&input, &CancellationFlag::new());
    }
    assert_eq!(input.series, before);
}

#[test]
fn test_tree_ensemble_fits_negative_series() {
    let values: Vec<f64> = (0..24)
        .map(|t| -50.0 + 2.0 * t as f64 + (t as f64).cos())
        .collect();
    let fitted = adapter(ModelKind::TreeEnsemble)
        .fit(&input(&values), &CancellationFlag::new())
        .unwrap();

    let forecast = fitted.predict(3).unwrap();
    assert_eq!(forecast.horizon(), 3);
    for (h, point) in forecast.points.iter().enumerate() {
        let linear = -50.0 + 2.0 * (24 + h) as f64;
        assert!((point.value - linear).abs() < 6.0);
        assert!(point.variance.unwrap() > 0.0);
    }
}

#[test]
fn test_growth_curve_rejects_flat_series() {
    let values = vec![40.0; 12];
    let result = adapter(ModelKind::GrowthCurve).fit(&input(&values), &CancellationFlag::new());

    match result {
        Err(ForecastError::FitNonConvergence { model, .. }) => {
            assert_eq!(model, ModelKind::GrowthCurve.to_string());
        }
        other => panic!("expected FitNonConvergence, got {:?}", other.map(|m| m.kind())),
    }
}
