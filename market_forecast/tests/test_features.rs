use approx::assert_relative_eq;
use chrono::{TimeZone, Utc};
use market_forecast::config::FeatureConfig;
use market_forecast::data::{MetricKey, Observation, TimeSeries};
use market_forecast::error::ForecastError;
use market_forecast::features::FeatureEngine;
use rstest::rstest;

fn yearly(values: &[Option<f64>]) -> TimeSeries {
    let observations = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            Observation::new(Utc.with_ymd_and_hms(2000 + i as i32, 1, 1, 0, 0, 0).unwrap(), *v)
        })
        .collect();
    TimeSeries::new(MetricKey::global("ai_market_revenue"), observations).unwrap()
}

fn observed(values: &[f64]) -> TimeSeries {
    yearly(&values.iter().copied().map(Some).collect::<Vec<_>>())
}

fn engine() -> FeatureEngine {
    FeatureEngine::new(FeatureConfig::default()).unwrap()
}

#[test]
fn test_single_point_is_insufficient_history() {
    let result = engine().compute(&observed(&[1.0]));
    assert!(matches!(result, Err(ForecastError::InsufficientHistory { points: 1 })));
}

#[test]
fn test_short_history_yields_no_rows() {
    // default windows need four points before the first anchor
    let rows = engine().compute(&observed(&[1.0, 2.0, 3.0])).unwrap();
    assert!(rows.is_empty());
}

#[rstest]
#[case(2)]
#[case(5)]
#[case(12)]
#[case(30)]
fn test_row_count_is_bounded(#[case] n: usize) {
    let values: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
    let config = FeatureConfig::default();
    let rows = engine().compute(&observed(&values)).unwrap();

    assert!(rows.len() <= n);
    if n > config.largest_window() {
        assert!(!rows.is_empty());
    }
}

#[test]
fn test_feature_values() {
    let rows = engine()
        .compute(&observed(&[100.0, 110.0, 121.0, 133.1, 146.41]))
        .unwrap();

    assert_eq!(rows.len(), 2);
    let row = &rows[0];
    assert_eq!(row.index, 3);
    assert_eq!(row.anchor, Utc.with_ymd_and_hms(2003, 1, 1, 0, 0, 0).unwrap());

    assert_relative_eq!(row.get("value").unwrap(), 133.1);
    assert_relative_eq!(row.get("growth_rate_1").unwrap(), 0.1, epsilon = 1e-12);
    assert_relative_eq!(
        row.get("moving_average_3").unwrap(),
        (110.0 + 121.0 + 133.1) / 3.0,
        epsilon = 1e-9
    );
    assert_relative_eq!(row.get("lag_1").unwrap(), 121.0);
    assert_relative_eq!(row.get("lag_3").unwrap(), 100.0);
    // constant 10% growth has no volatility
    assert_relative_eq!(row.get("volatility_3").unwrap(), 0.0, epsilon = 1e-12);
    assert!(row.is_complete());
}

#[test]
fn test_growth_rate_guards_denominator() {
    let config = FeatureConfig {
        lag: vec![1],
        ..FeatureConfig::default()
    };
    let engine = FeatureEngine::new(config).unwrap();
    let rows = engine
        .compute(&observed(&[5.0, 0.0, 4.0, -2.0, 3.0, 6.0]))
        .unwrap();

    for row in &rows {
        let growth = row.get("growth_rate_1");
        assert!(growth.map_or(true, f64::is_finite));
    }
    // -2 -> 3 has no defined growth
    let by_index = |i: usize| rows.iter().find(|r| r.index == i).unwrap();
    assert_relative_eq!(by_index(3).get("growth_rate_1").unwrap(), -1.5);
    assert_eq!(by_index(4).get("growth_rate_1"), None);
    assert_relative_eq!(by_index(5).get("growth_rate_1").unwrap(), 1.0);
}

#[test]
fn test_gaps_produce_missing_features() {
    let rows = engine()
        .compute(&yearly(&[
            Some(1.0),
            Some(2.0),
            Some(3.0),
            Some(4.0),
            None,
            Some(6.0),
            Some(7.0),
            Some(8.0),
            Some(9.0),
        ]))
        .unwrap();

    let at_gap = rows.iter().find(|r| r.index == 4).unwrap();
    assert_eq!(at_gap.get("value"), None);
    assert_eq!(at_gap.get("moving_average_3"), None);
    assert!(!at_gap.is_complete());

    let after = rows.iter().find(|r| r.index == 5).unwrap();
    assert_eq!(after.get("lag_1"), None);
    assert_relative_eq!(after.get("lag_2").unwrap(), 4.0);

    // windows are whole again once the gap leaves them
    let clear = rows.iter().find(|r| r.index == 8).unwrap();
    assert!(clear.is_complete());
}

#[test]
fn test_features_never_look_ahead() {
    let full = observed(&[10.0, 12.0, 11.0, 15.0, 14.0, 18.0, 40.0, 20.0]);
    let truncated = full.prefix(6);

    let engine = engine();
    let full_rows = engine.compute(&full).unwrap();
    let truncated_rows = engine.compute(&truncated).unwrap();

    for row in &truncated_rows {
        let same = full_rows.iter().find(|r| r.index == row.index).unwrap();
        assert_eq!(same.features, row.features);
    }
}

#[test]
fn test_vector_at_matches_rows() {
    let series = observed(&[3.0, 4.0, 6.0, 5.0, 7.0, 9.0, 8.0]);
    let engine = engine();
    let rows = engine.compute(&series).unwrap();
    let names = engine.feature_names();

    let last = rows.last().unwrap();
    let vector = engine.vector_at(&series.values(), last.index).unwrap();
    let expected: Vec<Option<f64>> = names.iter().map(|n| last.get(n)).collect();

    assert_eq!(vector, expected);
    assert!(engine.vector_at(&series.values(), 99).is_err());
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = FeatureConfig {
        moving_average: 0,
        ..FeatureConfig::default()
    };
    assert!(FeatureEngine::new(config).is_err());
}
