//! Forecasting models for time series data
//!
//! Every adapter follows the same contract: `fit` consumes a read-only
//! [`ModelInput`] and returns a [`FittedModel`], which can then `predict`
//! any horizon of at least one step.

pub mod growth_curve;
pub mod statistical;
pub mod tree_ensemble;

use crate::cancel::CancellationFlag;
use crate::config::{ModelConfig, ModelKind};
use crate::data::{Cadence, ModelSeries, TimeSeries};
use crate::error::{ForecastError, Result};
use crate::features::{FeatureEngine, FeatureRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use growth_curve::GrowthCurveAdapter;
pub use statistical::StatisticalAdapter;
pub use tree_ensemble::TreeEnsembleAdapter;

/// Everything an adapter may read while fitting
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub series: TimeSeries,
    pub view: ModelSeries,
    pub rows: Vec<FeatureRow>,
    pub engine: FeatureEngine,
}

impl ModelInput {
    /// Derive the modeling view and feature rows of `series`.
    ///
    /// A history too short for features simply yields no rows.
    pub fn new(series: TimeSeries, engine: FeatureEngine) -> Result<Self> {
        let rows = match engine.compute(&series) {
            Ok(rows) => rows,
            Err(ForecastError::InsufficientHistory { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            view: series.model_view(),
            series,
            rows,
            engine,
        })
    }

    /// Observed points available to the adapters
    pub fn available_points(&self) -> usize {
        self.series.observed_count()
    }

    fn require(&self, model: ModelKind, required: usize) -> Result<()> {
        let available = self.available_points();
        if available < required {
            return Err(ForecastError::InsufficientData {
                model: model.to_string(),
                required,
                available,
            });
        }
        Ok(())
    }
}

/// One forecast step of a single model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub variance: Option<f64>,
}

/// Forecast produced by one adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelForecast {
    pub model: ModelKind,
    pub points: Vec<ModelPoint>,
}

impl ModelForecast {
    pub fn horizon(&self) -> usize {
        self.points.len()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.points.iter().map(|p| p.timestamp).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }
}

/// Adapter-specific fitted state
pub(crate) trait Projection {
    /// `(value, variance)` for each of the next `steps` positions after the
    /// last modeled value
    fn project(&self, steps: usize) -> Result<Vec<(f64, f64)>>;

    /// Variance of the in-sample residuals
    fn residual_variance(&self) -> f64;
}

#[derive(Debug, Clone)]
enum FittedState {
    Statistical(statistical::FittedStatistical),
    TreeEnsemble(tree_ensemble::FittedTreeEnsemble),
    GrowthCurve(growth_curve::FittedGrowthCurve),
}

impl FittedState {
    fn projection(&self) -> &dyn Projection {
        match self {
            FittedState::Statistical(s) => s as &dyn Projection,
            FittedState::TreeEnsemble(s) => s as &dyn Projection,
            FittedState::GrowthCurve(s) => s as &dyn Projection,
        }
    }
}

/// A fitted adapter, ready to forecast
#[derive(Debug, Clone)]
pub struct FittedModel {
    kind: ModelKind,
    last_timestamp: DateTime<Utc>,
    cadence: Cadence,
    trailing_gap: usize,
    state: FittedState,
}

impl FittedModel {
    fn new(input: &ModelInput, kind: ModelKind, state: FittedState) -> Result<Self> {
        let last_timestamp = input.series.last_timestamp().ok_or_else(|| {
            ForecastError::DataError(format!("Series {} is empty", input.series.key()))
        })?;

        Ok(Self {
            kind,
            last_timestamp,
            cadence: input.series.cadence()?,
            trailing_gap: input.view.trailing_gap,
            state,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn residual_variance(&self) -> f64 {
        self.state.projection().residual_variance()
    }

    /// Forecast exactly `horizon` steps after the series' last timestamp
    pub fn predict(&self, horizon: usize) -> Result<ModelForecast> {
        if horizon == 0 {
            return Err(ForecastError::InvalidHorizon(horizon));
        }

        let projected = self
            .state
            .projection()
            .project(self.trailing_gap + horizon)?;

        let points = projected
            .into_iter()
            .skip(self.trailing_gap)
            .enumerate()
            .map(|(i, (value, variance))| {
                if !value.is_finite() || !variance.is_finite() {
                    return Err(ForecastError::FitNonConvergence {
                        model: self.kind.to_string(),
                        reason: format!("non-finite forecast at step {}", i + 1),
                    });
                }
                Ok(ModelPoint {
                    timestamp: self.cadence.advance(self.last_timestamp, i + 1)?,
                    value,
                    variance: Some(variance.max(0.0)),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ModelForecast {
            model: self.kind,
            points,
        })
    }
}

/// The forecasting techniques the engine can combine
#[derive(Debug, Clone)]
pub enum ModelAdapter {
    Statistical(StatisticalAdapter),
    TreeEnsemble(TreeEnsembleAdapter),
    GrowthCurve(GrowthCurveAdapter),
}

impl ModelAdapter {
    pub fn from_config(kind: ModelKind, config: &ModelConfig) -> Self {
        match kind {
            ModelKind::Statistical => {
                ModelAdapter::Statistical(StatisticalAdapter::new(config.statistical.clone()))
            }
            ModelKind::TreeEnsemble => {
                ModelAdapter::TreeEnsemble(TreeEnsembleAdapter::new(config.tree_ensemble.clone()))
            }
            ModelKind::GrowthCurve => {
                ModelAdapter::GrowthCurve(GrowthCurveAdapter::new(config.growth_curve.clone()))
            }
        }
    }

    /// Adapters for every enabled kind, in configuration order
    pub fn enabled(config: &ModelConfig) -> Vec<Self> {
        config
            .enabled
            .iter()
            .map(|&kind| Self::from_config(kind, config))
            .collect()
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            ModelAdapter::Statistical(_) => ModelKind::Statistical,
            ModelAdapter::TreeEnsemble(_) => ModelKind::TreeEnsemble,
            ModelAdapter::GrowthCurve(_) => ModelKind::GrowthCurve,
        }
    }

    pub fn id(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Fixed minimum of observed points needed to fit
    pub fn minimum_data_points(&self) -> usize {
        match self {
            ModelAdapter::Statistical(_) => StatisticalAdapter::MIN_DATA_POINTS,
            ModelAdapter::TreeEnsemble(_) => TreeEnsembleAdapter::MIN_DATA_POINTS,
            ModelAdapter::GrowthCurve(_) => GrowthCurveAdapter::MIN_DATA_POINTS,
        }
    }

    pub fn fit(&self, input: &ModelInput, cancel: &CancellationFlag) -> Result<FittedModel> {
        cancel.check()?;
        input.require(self.kind(), self.minimum_data_points())?;

        let state = match self {
            ModelAdapter::Statistical(a) => FittedState::Statistical(a.fit(&input.view)?),
            ModelAdapter::TreeEnsemble(a) => FittedState::TreeEnsemble(a.fit(input, cancel)?),
            ModelAdapter::GrowthCurve(a) => FittedState::GrowthCurve(a.fit(&input.view)?),
        };

        cancel.check()?;
        FittedModel::new(input, self.kind(), state)
    }
}
