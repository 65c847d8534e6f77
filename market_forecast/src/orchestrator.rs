//! Runs the feature → model → ensemble → signal pipeline for every metric
//!
//! Metrics are independent tasks bounded by one semaphore. Inside a
//! pipeline the adapters fit on blocking threads, bounded by a second
//! semaphore, and the ensemble waits for all of them. Each pipeline has its
//! own timeout and cancellation flag.

use crate::cancel::CancellationFlag;
use crate::config::{EngineConfig, ModelKind};
use crate::data::{MetricKey, MetricTable, TimeSeries};
use crate::ensemble::{EnsembleCombiner, EnsembleForecast, ModelRun};
use crate::error::{ForecastError, Result};
use crate::features::FeatureEngine;
use crate::metrics::{forecast_accuracy, ModelDiagnostics};
use crate::models::{ModelAdapter, ModelForecast, ModelInput};
use crate::signals::{
    AnomalyFlag, AnomalyKind, MaturitySources, Reliability, SignalContext, SignalDetector,
    SignalSet,
};
use crate::summary::SeriesSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Terminal state of one metric pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricOutcome {
    Completed,
    Failed { error: String },
    Cancelled { reason: String },
}

/// Output record keyed by metric, region and run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub key: MetricKey,
    pub run_id: String,
    pub reliability: Reliability,
    pub outcome: MetricOutcome,
    pub forecast: Option<EnsembleForecast>,
    pub signals: Option<SignalSet>,
    pub diagnostics: Vec<ModelDiagnostics>,
    pub summary: Option<SeriesSummary>,
}

impl MetricRecord {
    fn terminated(key: MetricKey, run_id: &str, outcome: MetricOutcome) -> Self {
        Self {
            key,
            run_id: run_id.to_string(),
            reliability: Reliability::RunCancelled,
            outcome,
            forecast: None,
            signals: None,
            diagnostics: Vec::new(),
            summary: None,
        }
    }

    pub fn cancelled(key: MetricKey, run_id: &str, reason: impl Into<String>) -> Self {
        Self::terminated(key, run_id, MetricOutcome::Cancelled { reason: reason.into() })
    }

    pub fn failed(key: MetricKey, run_id: &str, error: impl Into<String>) -> Self {
        Self::terminated(key, run_id, MetricOutcome::Failed { error: error.into() })
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == MetricOutcome::Completed
    }
}

/// Every record of one orchestration run, sorted by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub records: Vec<MetricRecord>,
}

impl RunReport {
    pub fn record(&self, key: &MetricKey) -> Option<&MetricRecord> {
        self.records.iter().find(|r| &r.key == key)
    }
}

/// One-step predictions and the observations they were scored against
#[derive(Debug, Clone, Default)]
struct BacktestErrors {
    predicted: Vec<f64>,
    actual: Vec<f64>,
}

impl BacktestErrors {
    fn rmse(&self) -> f64 {
        let n = self.predicted.len().max(1) as f64;
        let sse: f64 = self
            .predicted
            .iter()
            .zip(&self.actual)
            .map(|(p, a)| (p - a).powi(2))
            .sum();
        (sse / n).sqrt()
    }
}

/// Walk-forward result for one metric
struct Backtest {
    /// History with breaching observations replaced by ensemble estimates
    modeled: TimeSeries,
    errors: BTreeMap<ModelKind, BacktestErrors>,
    breaches: Vec<AnomalyFlag>,
}

type FitOutput = Result<(ModelForecast, f64)>;

struct Pipeline {
    forecast: Option<EnsembleForecast>,
    signals: Option<SignalSet>,
    diagnostics: Vec<ModelDiagnostics>,
    reliability: Reliability,
    outcome: MetricOutcome,
}

struct Engine {
    config: EngineConfig,
    features: FeatureEngine,
    adapters: Vec<ModelAdapter>,
    combiner: EnsembleCombiner,
    detector: SignalDetector,
}

/// Schedules metric pipelines
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<Engine>,
}

impl Orchestrator {
    /// Validate `config` and build every component from it
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let engine = Engine {
            features: FeatureEngine::new(config.features.clone())?,
            adapters: ModelAdapter::enabled(&config.models),
            combiner: EnsembleCombiner::new(&config)?,
            detector: SignalDetector::new(config.signals.clone()),
            config,
        };

        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    /// Run every metric of `table`.
    ///
    /// A failing or timed-out metric yields its own record; the others are
    /// unaffected.
    pub async fn run(
        &self,
        table: Arc<MetricTable>,
        run_id: &str,
        cancel: &CancellationFlag,
    ) -> RunReport {
        let metric_pool = Arc::new(Semaphore::new(
            self.engine.config.runtime.max_concurrent_metrics,
        ));
        info!("Run {} started with {} metrics", run_id, table.len());

        let mut handles = Vec::with_capacity(table.len());
        for key in table.keys().cloned() {
            let this = self.clone();
            let table = Arc::clone(&table);
            let pool = Arc::clone(&metric_pool);
            let cancel = cancel.clone();
            let run_id = run_id.to_string();
            let task_key = key.clone();

            let handle = tokio::spawn(async move {
                let _permit = match pool.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return MetricRecord::cancelled(task_key, &run_id, "worker pool closed")
                    }
                };
                this.run_metric(table, &task_key, &run_id, &cancel).await
            });
            handles.push((key, handle));
        }

        let mut records = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            match handle.await {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!("Pipeline task for {} aborted: {}", key, e);
                    records.push(MetricRecord::failed(
                        key,
                        run_id,
                        format!("pipeline task aborted: {}", e),
                    ));
                }
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));

        info!("Run {} finished", run_id);
        RunReport {
            run_id: run_id.to_string(),
            records,
        }
    }

    /// Run one metric under its own timeout and cancellation flag
    pub async fn run_metric(
        &self,
        table: Arc<MetricTable>,
        key: &MetricKey,
        run_id: &str,
        cancel: &CancellationFlag,
    ) -> MetricRecord {
        let cancel = cancel.child();
        let timeout = self.engine.config.runtime.pipeline_timeout();

        if cancel.is_cancelled() {
            warn!("Skipping {}: run cancelled", key);
            return MetricRecord::cancelled(key.clone(), run_id, "run cancelled before start");
        }

        let summary = table
            .get(key)
            .and_then(|s| SeriesSummary::from_series(s).ok());

        debug!("Pipeline for {} started", key);
        let result = tokio::time::timeout(timeout, self.pipeline(&table, key, run_id, &cancel)).await;

        let mut record = match result {
            Ok(Ok(p)) => MetricRecord {
                key: key.clone(),
                run_id: run_id.to_string(),
                reliability: p.reliability,
                outcome: p.outcome,
                forecast: p.forecast,
                signals: p.signals,
                diagnostics: p.diagnostics,
                summary: None,
            },
            Ok(Err(ForecastError::Cancelled)) => {
                warn!("Pipeline for {} cancelled", key);
                MetricRecord::cancelled(key.clone(), run_id, "cancelled")
            }
            Ok(Err(e)) => {
                warn!("Pipeline for {} failed: {}", key, e);
                MetricRecord::failed(key.clone(), run_id, e.to_string())
            }
            Err(_) => {
                cancel.cancel();
                warn!("Pipeline for {} timed out after {:?}", key, timeout);
                MetricRecord::cancelled(
                    key.clone(),
                    run_id,
                    format!("timed out after {} ms", timeout.as_millis()),
                )
            }
        };

        record.summary = summary;
        info!("Pipeline for {} finished: {}", key, record.reliability);
        record
    }

    async fn pipeline(
        &self,
        table: &MetricTable,
        key: &MetricKey,
        run_id: &str,
        cancel: &CancellationFlag,
    ) -> Result<Pipeline> {
        let engine = &self.engine;
        let series = table
            .get(key)
            .ok_or_else(|| ForecastError::DataError(format!("No series for {}", key)))?;
        let fit_pool = Arc::new(Semaphore::new(engine.config.runtime.max_concurrent_fits));

        let backtest = self.backtest(series, &fit_pool, cancel).await?;

        let input = Arc::new(ModelInput::new(
            backtest.modeled.clone(),
            engine.features.clone(),
        )?);
        let fits = self
            .fit_all(input, engine.config.horizon, &fit_pool, cancel)
            .await?;

        let mut runs = Vec::with_capacity(fits.len());
        let mut diagnostics = Vec::with_capacity(fits.len());
        for (kind, result) in fits {
            match result {
                Ok((forecast, residual_variance)) => {
                    let scored = backtest.errors.get(&kind);
                    let error = self.weighting_error(scored, residual_variance);
                    diagnostics.push(ModelDiagnostics {
                        model: kind,
                        succeeded: true,
                        weight: 0.0,
                        weighting_error: Some(error),
                        backtest: scored
                            .filter(|e| !e.predicted.is_empty())
                            .and_then(|e| forecast_accuracy(&e.predicted, &e.actual).ok()),
                        backtest_points: scored.map_or(0, |e| e.predicted.len()),
                        error: None,
                    });
                    runs.push(ModelRun::succeeded(kind, forecast, error));
                }
                Err(e) => {
                    warn!("Model {} excluded for {}: {}", kind, key, e);
                    diagnostics.push(ModelDiagnostics::failed(kind, &e));
                    runs.push(ModelRun::failed(kind, e));
                }
            }
        }

        let any_failed = runs.iter().any(|r| r.outcome.is_err());
        let forecast_id = format!("{}:{}", run_id, key);

        let forecast = match engine.combiner.combine(forecast_id, key, runs) {
            Ok(forecast) => forecast,
            Err(e @ ForecastError::NoViableModels { .. }) => {
                warn!("{}", e);
                return Ok(Pipeline {
                    forecast: None,
                    signals: None,
                    diagnostics,
                    reliability: Reliability::RunCancelled,
                    outcome: MetricOutcome::Failed {
                        error: e.to_string(),
                    },
                });
            }
            Err(e) => return Err(e),
        };

        for d in &mut diagnostics {
            d.weight = forecast.weight_of(d.model).unwrap_or(0.0);
        }

        let reliability = if any_failed || forecast.degraded {
            Reliability::Degraded
        } else {
            Reliability::Nominal
        };

        cancel.check()?;
        let sources = MaturitySources::from_table(table, key, &engine.config.signals.maturity);
        let signals = engine.detector.detect(SignalContext {
            series,
            modeled: &backtest.modeled,
            forecast: &forecast,
            sources: &sources,
            breaches: backtest.breaches,
            reliability,
        })?;

        Ok(Pipeline {
            forecast: Some(forecast),
            signals: Some(signals),
            diagnostics,
            reliability,
            outcome: MetricOutcome::Completed,
        })
    }

    /// Walk-forward out-of-sample RMSE once enough points were scored,
    /// in-sample residual RMSE before that
    fn weighting_error(&self, scored: Option<&BacktestErrors>, residual_variance: f64) -> f64 {
        match scored {
            Some(e) if e.predicted.len() >= self.engine.config.ensemble.min_cv_points => e.rmse(),
            _ => residual_variance.max(0.0).sqrt(),
        }
    }

    /// Fit every assigned adapter on `input` and wait for all of them
    async fn fit_all(
        &self,
        input: Arc<ModelInput>,
        horizon: usize,
        pool: &Arc<Semaphore>,
        cancel: &CancellationFlag,
    ) -> Result<Vec<(ModelKind, FitOutput)>> {
        let mut handles = Vec::with_capacity(self.engine.adapters.len());

        for adapter in &self.engine.adapters {
            let permit = Arc::clone(pool)
                .acquire_owned()
                .await
                .map_err(|_| ForecastError::Cancelled)?;
            let adapter = adapter.clone();
            let input = Arc::clone(&input);
            let cancel = cancel.clone();
            let kind = adapter.kind();

            let handle = tokio::task::spawn_blocking(move || -> FitOutput {
                let _permit = permit;
                let fitted = adapter.fit(&input, &cancel)?;
                let forecast = fitted.predict(horizon)?;
                Ok((forecast, fitted.residual_variance()))
            });
            handles.push((kind, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (kind, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ForecastError::AdapterFailed {
                    model: kind.to_string(),
                    reason: format!("fit task panicked: {}", e),
                }),
            };
            outcomes.push((kind, outcome));
        }

        // nothing partial leaves a cancelled pipeline
        cancel.check()?;
        Ok(outcomes)
    }

    /// One-step-ahead ensemble over the history.
    ///
    /// Starting at the warmup point, every observation is predicted from
    /// the data before it. Observations outside the ensemble interval by
    /// more than the configured number of widths are flagged and replaced
    /// by the ensemble estimate for all later fits.
    async fn backtest(
        &self,
        series: &TimeSeries,
        pool: &Arc<Semaphore>,
        cancel: &CancellationFlag,
    ) -> Result<Backtest> {
        let engine = &self.engine;
        let key = series.key();
        let warmup = engine.config.signals.anomaly.warmup_points;

        let mut modeled = series.clone();
        let mut errors: BTreeMap<ModelKind, BacktestErrors> = BTreeMap::new();
        let mut breaches = Vec::new();

        for (t, obs) in series.observations().iter().enumerate().skip(warmup) {
            cancel.check()?;
            let observed = match obs.value {
                Some(v) => v,
                None => continue,
            };

            let input = Arc::new(ModelInput::new(modeled.prefix(t), engine.features.clone())?);
            let fits = self.fit_all(input, 1, pool, cancel).await?;

            let mut runs = Vec::with_capacity(fits.len());
            let mut predictions = Vec::with_capacity(fits.len());
            for (kind, result) in fits {
                match result {
                    Ok((forecast, residual_variance)) => {
                        let error = self.weighting_error(errors.get(&kind), residual_variance);
                        if let Some(p) = forecast.points.first() {
                            predictions.push((kind, p.value));
                        }
                        runs.push(ModelRun::succeeded(kind, forecast, error));
                    }
                    Err(ForecastError::Cancelled) => return Err(ForecastError::Cancelled),
                    Err(e) => runs.push(ModelRun::failed(kind, e)),
                }
            }

            let step = match engine
                .combiner
                .combine(format!("{}#{}", key, t), key, runs)
            {
                Ok(forecast) => forecast,
                Err(ForecastError::NoViableModels { .. }) => {
                    debug!("No viable backtest models for {} at {}", key, obs.timestamp);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let point = match step.points.first() {
                Some(p) => *p,
                None => continue,
            };

            match engine.detector.interval_breach(observed, point.lower, point.upper) {
                Some(distance) => {
                    info!(
                        "Anomaly in {} at {}: observed {:.4} outside [{:.4}, {:.4}]",
                        key, obs.timestamp, observed, point.lower, point.upper
                    );
                    breaches.push(AnomalyFlag {
                        timestamp: obs.timestamp,
                        index: t,
                        kind: AnomalyKind::IntervalBreach {
                            observed,
                            expected: point.point,
                            lower: point.lower,
                            upper: point.upper,
                            distance,
                        },
                    });

                    let mut values = modeled.values();
                    values[t] = Some(point.point);
                    modeled = modeled.with_values(&values)?;
                }
                None => {
                    for (kind, predicted) in predictions {
                        let e = errors.entry(kind).or_default();
                        e.predicted.push(predicted);
                        e.actual.push(observed);
                    }
                }
            }
        }

        Ok(Backtest {
            modeled,
            errors,
            breaches,
        })
    }
}
