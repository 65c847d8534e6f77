use market_forecast::summary::SeriesSummary;
use market_forecast::{
    CancellationFlag, EngineConfig, MetricKey, MetricTable, Orchestrator, Reliability, TableLayout,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

// Yearly AI metrics for two regions in the long layout
fn create_sample_data() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "metric,region,timestamp,value").unwrap();

    for (i, year) in (2008..2024).enumerate() {
        let t = i as f64;
        let adoption = 80.0 / (1.0 + (-0.45 * (t - 9.0)).exp()) + 0.5 * (2.0 * t).sin();
        let revenue = 20.0 * 1.18_f64.powf(t) + (1.3 * t).cos();
        let jobs = -(0.8 * t + 0.3 * (t * 0.9).sin());

        writeln!(file, "ai_adoption_rate,NA,{},{:.4}", year, adoption).unwrap();
        writeln!(file, "ai_market_revenue,NA,{},{:.4}", year, revenue).unwrap();
        writeln!(file, "ai_job_impact,NA,{},{:.4}", year, jobs).unwrap();
    }
    writeln!(file, "ai_adoption_rate,APAC,2021,12.0").unwrap();
    writeln!(file, "ai_adoption_rate,APAC,2022,").unwrap();
    writeln!(file, "ai_adoption_rate,APAC,2023,19.5").unwrap();

    file
}

#[tokio::test]
async fn test_csv_to_report() {
    let file = create_sample_data();
    let table = MetricTable::from_csv(file.path(), TableLayout::Long).unwrap();
    assert_eq!(table.len(), 4);

    let orchestrator = Orchestrator::new(EngineConfig::default()).unwrap();
    let report = orchestrator
        .run(Arc::new(table), "integration", &CancellationFlag::new())
        .await;
    assert_eq!(report.records.len(), 4);

    let adoption = report
        .record(&MetricKey::new("ai_adoption_rate", Some("NA")))
        .unwrap();
    assert!(adoption.is_completed());
    let signals = adoption.signals.as_ref().unwrap();
    assert_eq!(signals.maturity.meta.derived_from.len(), 3);
    assert!(signals.risk.automation_component.is_some());
    assert!((0.0..=1.0).contains(&signals.risk.score));
    assert_eq!(signals.maturity.series.len(), 16);

    // two observed points are below every adapter's minimum
    let sparse = report
        .record(&MetricKey::new("ai_adoption_rate", Some("APAC")))
        .unwrap();
    assert!(!sparse.is_completed());
    assert_eq!(sparse.reliability, Reliability::RunCancelled);
    assert!(sparse.forecast.is_none());
    assert_eq!(sparse.diagnostics.len(), 3);
    assert!(sparse.diagnostics.iter().all(|d| !d.succeeded));

    let summary = sparse.summary.as_ref().unwrap();
    assert_eq!(summary.points, 3);
    assert_eq!(summary.missing, 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["records"].as_array().unwrap().len(), 4);
}

#[test]
fn test_series_summary() {
    let csv = "Year,AI_Revenue\n2019,100\n2020,\n2021,121\n2022,133.1\n";
    let table = MetricTable::from_reader(csv.as_bytes(), TableLayout::Wide).unwrap();
    let series = table.get(&MetricKey::global("AI_Revenue")).unwrap();

    let summary = SeriesSummary::from_series(series).unwrap();
    assert_eq!(summary.points, 4);
    assert_eq!(summary.observed, 3);
    assert_eq!(summary.min, Some(100.0));
    assert_eq!(summary.max, Some(133.1));
    assert!(summary.trend_slope.unwrap() > 0.0);

    // three periods from the first to the last observation
    let growth = summary.compound_growth_rate.unwrap();
    assert!((growth - 0.1).abs() < 1e-9);
}
