//! Combination of adapter forecasts into one forecast with an interval
//!
//! Weights are inverse to each adapter's error and renormalized over the
//! adapters that succeeded. The interval uses a pooled variance
//!
//! ```text
//! V = sum_i w_i * var_i + sum_i w_i * (mu_i - mu)^2
//! ```
//!
//! inflated by `assigned / succeeded`, with half-width `z * sqrt(V)`. A run
//! with fewer than two survivors is widened again by the configured
//! degraded multiplier.
//!
//! Dropping an adapter always raises the inflation factor, but it can also
//! shrink the between-model term. The interval only widens reliably when
//! the surviving adapters agree with each other.

use crate::config::{EngineConfig, ModelKind};
use crate::data::MetricKey;
use crate::error::{ForecastError, Result};
use crate::models::ModelForecast;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Errors below this are treated as equal when weighting
const MIN_WEIGHTING_ERROR: f64 = 1e-9;

/// Forecast of one adapter along with the error used to weight it
#[derive(Debug, Clone)]
pub struct ScoredForecast {
    pub forecast: ModelForecast,
    pub error: f64,
}

/// Outcome of one assigned adapter
#[derive(Debug)]
pub struct ModelRun {
    pub model: ModelKind,
    pub outcome: std::result::Result<ScoredForecast, ForecastError>,
}

impl ModelRun {
    pub fn succeeded(model: ModelKind, forecast: ModelForecast, error: f64) -> Self {
        Self {
            model,
            outcome: Ok(ScoredForecast { forecast, error }),
        }
    }

    pub fn failed(model: ModelKind, error: ForecastError) -> Self {
        Self {
            model,
            outcome: Err(error),
        }
    }
}

/// Contributing adapter and its normalized weight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelWeight {
    pub model: ModelKind,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePoint {
    pub timestamp: DateTime<Utc>,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

impl EnsemblePoint {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Combined forecast; never modified after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleForecast {
    pub id: String,
    pub key: MetricKey,
    pub confidence_level: f64,
    pub points: Vec<EnsemblePoint>,
    pub contributors: Vec<ModelWeight>,
    pub excluded: Vec<ModelKind>,
    /// Fewer than two adapters succeeded
    pub degraded: bool,
}

impl EnsembleForecast {
    pub fn horizon(&self) -> usize {
        self.points.len()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.points.iter().map(|p| p.timestamp).collect()
    }

    pub fn weight_of(&self, model: ModelKind) -> Option<f64> {
        self.contributors
            .iter()
            .find(|c| c.model == model)
            .map(|c| c.weight)
    }
}

/// Weighted combination with a pooled-variance interval
#[derive(Debug, Clone)]
pub struct EnsembleCombiner {
    confidence_level: f64,
    z: f64,
    degraded_multiplier: f64,
}

impl EnsembleCombiner {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| ForecastError::InvalidParameter(format!("normal distribution: {}", e)))?;
        let z = normal.inverse_cdf((1.0 + config.confidence_level) / 2.0);

        if !z.is_finite() {
            return Err(ForecastError::InvalidParameter(format!(
                "No critical value for confidence level {}",
                config.confidence_level
            )));
        }

        Ok(Self {
            confidence_level: config.confidence_level,
            z,
            degraded_multiplier: config.ensemble.degraded_interval_multiplier,
        })
    }

    /// Critical value for the configured confidence level
    pub fn z(&self) -> f64 {
        self.z
    }

    /// Normalized weights for errors `errors`
    pub fn weights(errors: &[f64]) -> Vec<f64> {
        let raw: Vec<f64> = errors
            .iter()
            .map(|e| {
                let e = if e.is_finite() { *e } else { f64::MAX };
                1.0 / e.max(MIN_WEIGHTING_ERROR)
            })
            .collect();
        let total: f64 = raw.iter().sum();
        raw.iter().map(|w| w / total).collect()
    }

    /// Combine every assigned adapter's outcome.
    ///
    /// Failed adapters are excluded and the weights renormalized over the
    /// rest. Fails with `NoViableModels` when nothing succeeded and with
    /// `AlignmentMismatch` when survivors disagree on timestamps.
    pub fn combine(&self, id: String, key: &MetricKey, runs: Vec<ModelRun>) -> Result<EnsembleForecast> {
        let assigned = runs.len();
        let mut survivors = Vec::new();
        let mut excluded = Vec::new();

        for run in runs {
            match run.outcome {
                Ok(scored) => survivors.push(scored),
                Err(_) => excluded.push(run.model),
            }
        }

        let first = survivors.first().ok_or_else(|| ForecastError::NoViableModels {
            metric: key.to_string(),
        })?;
        let timestamps = first.forecast.timestamps();

        for s in &survivors[1..] {
            let other = s.forecast.timestamps();
            if other != timestamps {
                return Err(ForecastError::AlignmentMismatch {
                    expected: format!("{:?}", timestamps),
                    found: format!("{:?} from {}", other, s.forecast.model),
                });
            }
        }

        let errors: Vec<f64> = survivors.iter().map(|s| s.error).collect();
        let weights = Self::weights(&errors);
        let succeeded = survivors.len();

        let inflation = assigned as f64 / succeeded as f64;
        let multiplier = if succeeded < 2 {
            self.degraded_multiplier
        } else {
            1.0
        };

        let points = timestamps
            .iter()
            .enumerate()
            .map(|(h, &timestamp)| {
                let mean: f64 = survivors
                    .iter()
                    .zip(&weights)
                    .map(|(s, w)| w * s.forecast.points[h].value)
                    .sum();
                let within: f64 = survivors
                    .iter()
                    .zip(&weights)
                    .map(|(s, w)| w * s.forecast.points[h].variance.unwrap_or(0.0))
                    .sum();
                let between: f64 = survivors
                    .iter()
                    .zip(&weights)
                    .map(|(s, w)| w * (s.forecast.points[h].value - mean).powi(2))
                    .sum();

                let half_width = self.z * ((within + between) * inflation).sqrt() * multiplier;
                EnsemblePoint {
                    timestamp,
                    point: mean,
                    lower: mean - half_width,
                    upper: mean + half_width,
                }
            })
            .collect();

        let contributors = survivors
            .iter()
            .zip(&weights)
            .map(|(s, &weight)| ModelWeight {
                model: s.forecast.model,
                weight,
            })
            .collect();

        Ok(EnsembleForecast {
            id,
            key: key.clone(),
            confidence_level: self.confidence_level,
            points,
            contributors,
            excluded,
            degraded: succeeded < 2,
        })
    }
}
