use approx::assert_relative_eq;
use chrono::{DateTime, TimeZone, Utc};
use market_forecast::config::{MaturityConfig, SignalConfig};
use market_forecast::data::{MetricKey, MetricTable, Observation, TimeSeries};
use market_forecast::ensemble::{EnsembleForecast, EnsemblePoint};
use market_forecast::error::ForecastError;
use market_forecast::signals::{
    AnomalyFlag, AnomalyKind, MaturityComponents, MaturitySources, Reliability, SignalContext,
    SignalDetector,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn year(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015 + i as i32, 1, 1, 0, 0, 0).unwrap()
}

fn series(metric: &str, values: &[f64]) -> TimeSeries {
    let observations = values
        .iter()
        .enumerate()
        .map(|(i, &v)| Observation::new(year(i), Some(v)))
        .collect();
    TimeSeries::new(MetricKey::new(metric, Some("EU")), observations).unwrap()
}

fn detector() -> SignalDetector {
    SignalDetector::new(SignalConfig::default())
}

fn ensemble(points: &[(f64, f64)]) -> EnsembleForecast {
    EnsembleForecast {
        id: "run-1:ai_adoption_rate@EU".to_string(),
        key: MetricKey::new("ai_adoption_rate", Some("EU")),
        confidence_level: 0.95,
        points: points
            .iter()
            .enumerate()
            .map(|(i, &(point, half))| EnsemblePoint {
                timestamp: year(20 + i),
                point,
                lower: point - half,
                upper: point + half,
            })
            .collect(),
        contributors: Vec::new(),
        excluded: Vec::new(),
        degraded: false,
    }
}

#[test]
fn test_maturity_index_weights_available_components() {
    let detector = detector();
    let all = MaturityComponents {
        adoption: Some(1.0),
        revenue_growth: Some(0.0),
        job_impact: Some(0.5),
    };
    assert_relative_eq!(detector.maturity_index(&all), 0.4 + 0.125, epsilon = 1e-12);

    // missing components drop out and the rest are renormalized
    let partial = MaturityComponents {
        adoption: Some(1.0),
        revenue_growth: Some(0.0),
        job_impact: None,
    };
    assert_relative_eq!(detector.maturity_index(&partial), 0.4 / 0.75, epsilon = 1e-12);

    assert_eq!(detector.maturity_index(&MaturityComponents::default()), 0.5);
}

#[test]
fn test_maturity_components_use_history_up_to_point() {
    let sources = MaturitySources {
        adoption: Some(series("ai_adoption_rate", &[10.0, 20.0, 5.0, 15.0])),
        revenue: Some(series("ai_market_revenue", &[100.0, 110.0, 121.0, 100.0])),
        job_impact: Some(series("ai_job_impact", &[-5.0, -10.0, -2.0, -6.0])),
    };
    let detector = detector();

    let first = detector.maturity_components(&sources, year(0)).unwrap();
    assert_eq!(first.adoption, Some(0.5));
    assert_eq!(first.revenue_growth, None);

    let second = detector.maturity_components(&sources, year(1)).unwrap();
    assert_eq!(second.adoption, Some(1.0));
    assert_eq!(second.job_impact, Some(1.0));

    // a new low moves the range, so the same level normalizes differently
    let last = detector.maturity_components(&sources, year(3)).unwrap();
    assert_relative_eq!(last.adoption.unwrap(), 10.0 / 15.0, epsilon = 1e-12);
    assert_eq!(last.revenue_growth, Some(0.0));
    assert_relative_eq!(last.job_impact.unwrap(), 0.5, epsilon = 1e-12);
}

#[test]
fn test_single_point_maturity_is_midpoint() {
    let sources = MaturitySources {
        adoption: Some(series("ai_adoption_rate", &[42.0])),
        ..MaturitySources::default()
    };
    let detector = detector();
    let components = detector.maturity_components(&sources, year(0)).unwrap();

    assert_eq!(detector.maturity_index(&components), 0.5);
}

#[test]
fn test_maturity_series_stays_in_unit_interval() {
    let sources = MaturitySources {
        adoption: Some(series("ai_adoption_rate", &[3.0, 9.0, 1.0, 12.0, 7.0, 15.0])),
        revenue: Some(series("ai_market_revenue", &[50.0, 40.0, 80.0, 60.0, 90.0, 95.0])),
        job_impact: None,
    };
    let timestamps: Vec<_> = (0..6).map(year).collect();
    let points = detector().maturity_series(&sources, &timestamps).unwrap();

    assert_eq!(points.len(), 6);
    assert!(points.iter().all(|p| (0.0..=1.0).contains(&p.value)));
}

#[test]
fn test_sources_fall_back_to_own_metric() {
    let own = series("custom_metric", &[1.0, 2.0, 3.0]);
    let table = MetricTable::from_series(vec![own.clone()]).unwrap();
    let sources = MaturitySources::from_table(&table, own.key(), &MaturityConfig::default());

    assert_eq!(sources.keys(), vec![own.key().clone()]);

    let revenue = series("ai_market_revenue", &[10.0, 12.0, 15.0]);
    let table = MetricTable::from_series(vec![own.clone(), revenue.clone()]).unwrap();
    let sources = MaturitySources::from_table(&table, own.key(), &MaturityConfig::default());

    assert!(sources.adoption.is_none());
    assert_eq!(sources.keys(), vec![revenue.key().clone()]);
}

#[test]
fn test_risk_score_from_interval_width() {
    let forecast = ensemble(&[(100.0, 10.0), (100.0, 10.0)]);
    let detector = detector();

    let (score, r, v) = detector.risk_score(&forecast, None);
    assert_relative_eq!(r, 0.2, epsilon = 1e-12);
    assert_relative_eq!(v, 0.2 / 1.2, epsilon = 1e-12);
    assert_relative_eq!(score, v);

    let (with_jobs, _, _) = detector.risk_score(&forecast, Some(1.0));
    assert_relative_eq!(with_jobs, 0.7 * v + 0.3, epsilon = 1e-12);
}

#[rstest]
#[case(&[(0.0, 1.0)], 1.0)]
#[case(&[(5.0, 1e9)], 1.0)]
#[case(&[(50.0, 0.0)], 0.0)]
fn test_risk_score_is_bounded(#[case] points: &[(f64, f64)], #[case] expected: f64) {
    let (score, _, _) = detector().risk_score(&ensemble(points), Some(1.0));
    assert!((0.0..=1.0).contains(&score));

    let (volatility_only, _, _) = detector().risk_score(&ensemble(points), None);
    assert_relative_eq!(volatility_only, expected, epsilon = 1e-6);
}

#[test]
fn test_interval_breach_threshold() {
    let detector = detector();
    assert_eq!(detector.interval_breach(100.0, 90.0, 110.0), None);
    // outside, but by less than one interval width
    assert_eq!(detector.interval_breach(125.0, 90.0, 110.0), None);
    assert_eq!(detector.interval_breach(135.0, 90.0, 110.0), Some(25.0));
    assert_eq!(detector.interval_breach(60.0, 90.0, 110.0), Some(30.0));
}

#[test]
fn test_trend_reversal_needs_sustained_rise() {
    let detector = detector();
    let rise_then_fall: Vec<Option<f64>> = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 6.0, 5.0, 4.0]
        .iter()
        .copied()
        .map(Some)
        .collect();
    assert_eq!(detector.trend_reversals(&rise_then_fall), vec![9]);

    let short_rise: Vec<Option<f64>> = [2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 6.0, 5.0, 4.0]
        .iter()
        .copied()
        .map(Some)
        .collect();
    assert!(detector.trend_reversals(&short_rise).is_empty());

    let mut gapped = rise_then_fall.clone();
    gapped[8] = None;
    assert!(detector.trend_reversals(&gapped).is_empty());
}

#[test]
fn test_detect_builds_all_signals() {
    let history = series("ai_adoption_rate", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 6.0, 5.0, 4.0]);
    let sources = MaturitySources {
        adoption: Some(history.clone()),
        ..MaturitySources::default()
    };
    let forecast = ensemble(&[(4.0, 1.0)]);
    let breach = AnomalyFlag {
        timestamp: year(2),
        index: 2,
        kind: AnomalyKind::IntervalBreach {
            observed: 3.0,
            expected: 1.0,
            lower: 0.5,
            upper: 1.5,
            distance: 1.5,
        },
    };

    let signals = detector()
        .detect(SignalContext {
            series: &history,
            modeled: &history,
            forecast: &forecast,
            sources: &sources,
            breaches: vec![breach],
            reliability: Reliability::Degraded,
        })
        .unwrap();

    assert_eq!(signals.maturity.meta.as_of, year(9));
    assert_eq!(signals.maturity.meta.forecast_id, forecast.id);
    assert_eq!(signals.risk.meta.reliability, Reliability::Degraded);
    assert_eq!(signals.maturity.series.len(), history.len());
    assert_eq!(signals.risk.automation_component, None);

    assert!(signals.anomaly.flagged);
    let indices: Vec<usize> = signals.anomaly.flags.iter().map(|f| f.index).collect();
    assert_eq!(indices, vec![2, 9]);
}

#[test]
fn test_detect_rejects_empty_series() {
    let empty = TimeSeries::new(MetricKey::global("ai_adoption_rate"), Vec::new()).unwrap();
    let forecast = ensemble(&[(1.0, 0.1)]);
    let sources = MaturitySources::default();

    let result = detector().detect(SignalContext {
        series: &empty,
        modeled: &empty,
        forecast: &forecast,
        sources: &sources,
        breaches: Vec::new(),
        reliability: Reliability::Nominal,
    });
    assert!(matches!(result, Err(ForecastError::DataError(_))));
}

#[test]
fn test_reliability_serializes_kebab_case() {
    let json = serde_json::to_string(&Reliability::RunCancelled).unwrap();
    assert_eq!(json, "\"run-cancelled\"");
    assert_eq!(Reliability::Degraded.to_string(), "degraded");
}
