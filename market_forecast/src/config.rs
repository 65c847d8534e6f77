//! Engine configuration
//!
//! One explicit, validated record is handed to every component at
//! construction. All defaults live in the `Default` impls below; model and
//! signal code never falls back to values of its own.
//!
//! | key | default |
//! |-----|---------|
//! | `horizon` | 5 |
//! | `confidence_level` | 0.95 |
//! | `features.growth_rate` / `moving_average` / `volatility` | 1 / 3 / 3 |
//! | `features.lag` | `[1, 2, 3]` |
//! | `models.enabled` | statistical, tree_ensemble, growth_curve |
//! | `models.statistical.season_length` | 12 |
//! | `models.tree_ensemble` | 40 trees, depth 5, leaf 2, seed 42 |
//! | `models.growth_curve.patience` | 100 |
//! | `ensemble.degraded_interval_multiplier` | 2.0 |
//! | `ensemble.min_cv_points` | 3 |
//! | `signals.automation_risk_weight` | 0.3 |
//! | `signals.anomaly.interval_width_threshold` | 1.0 |
//! | `signals.anomaly.reversal_min_run` / `sustained_positive_run` | 3 / 6 |
//! | `signals.anomaly.warmup_points` | 6 |
//! | `runtime` | 4 metrics, 4 fits, 30 s per pipeline |

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Identifies one model adapter variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Statistical,
    TreeEnsemble,
    GrowthCurve,
}

impl ModelKind {
    /// Stable identifier used in output records
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Statistical => "statistical",
            ModelKind::TreeEnsemble => "tree_ensemble",
            ModelKind::GrowthCurve => "growth_curve",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level configuration record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Forecast steps ahead
    pub horizon: usize,
    /// Confidence level of the ensemble interval, in (0, 1)
    pub confidence_level: f64,
    pub features: FeatureConfig,
    pub models: ModelConfig,
    pub ensemble: EnsembleConfig,
    pub signals: SignalConfig,
    pub runtime: RuntimeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon: 5,
            confidence_level: 0.95,
            features: FeatureConfig::default(),
            models: ModelConfig::default(),
            ensemble: EnsembleConfig::default(),
            signals: SignalConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Feature windows, all in number of observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub growth_rate: usize,
    pub moving_average: usize,
    pub lag: Vec<usize>,
    pub volatility: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            growth_rate: 1,
            moving_average: 3,
            lag: vec![1, 2, 3],
            volatility: 3,
        }
    }
}

impl FeatureConfig {
    /// Largest configured window or lag
    pub fn largest_window(&self) -> usize {
        let max_lag = self.lag.iter().copied().max().unwrap_or(0);
        self.growth_rate
            .max(self.moving_average)
            .max(self.volatility)
            .max(max_lag)
    }

    /// Index of the first anchor with enough history for every feature
    pub fn first_anchor(&self) -> usize {
        let max_lag = self.lag.iter().copied().max().unwrap_or(0);
        self.growth_rate
            .max(self.moving_average.saturating_sub(1))
            .max(self.volatility)
            .max(max_lag)
    }

    pub fn validate(&self) -> Result<()> {
        if self.growth_rate == 0 || self.moving_average == 0 || self.volatility == 0 {
            return Err(ForecastError::InvalidParameter(
                "Feature windows must be greater than zero".to_string(),
            ));
        }
        if self.lag.iter().any(|&l| l == 0) {
            return Err(ForecastError::InvalidParameter(
                "Lag offsets must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which adapters run and how each is parameterised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub enabled: Vec<ModelKind>,
    pub statistical: StatisticalConfig,
    pub tree_ensemble: TreeEnsembleConfig,
    pub growth_curve: GrowthCurveConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: vec![
                ModelKind::Statistical,
                ModelKind::TreeEnsemble,
                ModelKind::GrowthCurve,
            ],
            statistical: StatisticalConfig::default(),
            tree_ensemble: TreeEnsembleConfig::default(),
            growth_curve: GrowthCurveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticalConfig {
    /// Seasonal period; seasonality is used once two full seasons exist
    pub season_length: usize,
}

impl Default for StatisticalConfig {
    fn default() -> Self {
        Self { season_length: 12 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeEnsembleConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Seed for bootstrap and feature sampling
    pub seed: u64,
}

impl Default for TreeEnsembleConfig {
    fn default() -> Self {
        Self {
            n_trees: 40,
            max_depth: 5,
            min_samples_leaf: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthCurveConfig {
    /// Levenberg-Marquardt patience factor (evaluations per parameter)
    pub patience: usize,
}

impl Default for GrowthCurveConfig {
    fn default() -> Self {
        Self { patience: 100 }
    }
}

/// Ensemble combination settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Interval half-width multiplier applied when fewer than two adapters succeed
    pub degraded_interval_multiplier: f64,
    /// Backtest errors required before an adapter is weighted by them
    pub min_cv_points: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            degraded_interval_multiplier: 2.0,
            min_cv_points: 3,
        }
    }
}

/// Signal detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub maturity: MaturityConfig,
    /// Share of the risk score taken by automation exposure, in [0, 1]
    pub automation_risk_weight: f64,
    pub anomaly: AnomalyConfig,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            maturity: MaturityConfig::default(),
            automation_risk_weight: 0.3,
            anomaly: AnomalyConfig::default(),
        }
    }
}

/// Maturity index components and the metrics that feed them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaturityConfig {
    pub adoption_weight: f64,
    pub revenue_growth_weight: f64,
    pub job_impact_weight: f64,
    pub adoption_metric: String,
    pub revenue_metric: String,
    pub job_impact_metric: String,
}

impl Default for MaturityConfig {
    fn default() -> Self {
        Self {
            adoption_weight: 0.4,
            revenue_growth_weight: 0.35,
            job_impact_weight: 0.25,
            adoption_metric: "ai_adoption_rate".to_string(),
            revenue_metric: "ai_market_revenue".to_string(),
            job_impact_metric: "ai_job_impact".to_string(),
        }
    }
}

/// Anomaly ("AI winter") thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Distance outside the interval, in interval widths, that counts as a breach
    pub interval_width_threshold: f64,
    /// Consecutive declines that make a reversal
    pub reversal_min_run: usize,
    /// Consecutive rises that must precede the declines
    pub sustained_positive_run: usize,
    /// Observations before the walk-forward check starts
    pub warmup_points: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            interval_width_threshold: 1.0,
            reversal_min_run: 3,
            sustained_positive_run: 6,
            warmup_points: 6,
        }
    }
}

/// Worker pool sizes and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Metric pipelines in flight at once
    pub max_concurrent_metrics: usize,
    /// Adapter fits in flight within one pipeline
    pub max_concurrent_fits: usize,
    /// Wall-clock budget of one metric pipeline
    pub pipeline_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_metrics: 4,
            max_concurrent_fits: 4,
            pipeline_timeout_ms: 30_000,
        }
    }
}

impl RuntimeConfig {
    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline_timeout_ms)
    }
}

impl EngineConfig {
    /// Parse a TOML document; absent keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check every value against its documented range
    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(ForecastError::InvalidHorizon(self.horizon));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "Confidence level must be between 0 and 1, got {}",
                self.confidence_level
            )));
        }

        self.features.validate()?;

        let models = &self.models;
        if models.enabled.is_empty() {
            return Err(ForecastError::InvalidParameter(
                "At least one model adapter must be enabled".to_string(),
            ));
        }
        let mut kinds = models.enabled.clone();
        kinds.sort();
        kinds.dedup();
        if kinds.len() != models.enabled.len() {
            return Err(ForecastError::InvalidParameter(
                "Model adapters may only be enabled once".to_string(),
            ));
        }
        if models.statistical.season_length < 2 {
            return Err(ForecastError::InvalidParameter(
                "Season length must be at least 2".to_string(),
            ));
        }
        let trees = &models.tree_ensemble;
        if trees.n_trees == 0 || trees.max_depth == 0 || trees.min_samples_leaf == 0 {
            return Err(ForecastError::InvalidParameter(
                "Tree ensemble sizes must be greater than zero".to_string(),
            ));
        }
        if models.growth_curve.patience == 0 {
            return Err(ForecastError::InvalidParameter(
                "Growth curve patience must be greater than zero".to_string(),
            ));
        }

        if self.ensemble.degraded_interval_multiplier < 1.0 {
            return Err(ForecastError::InvalidParameter(
                "Degraded interval multiplier must be at least 1".to_string(),
            ));
        }
        if self.ensemble.min_cv_points == 0 {
            return Err(ForecastError::InvalidParameter(
                "min_cv_points must be greater than zero".to_string(),
            ));
        }

        let maturity = &self.signals.maturity;
        let weights = [
            maturity.adoption_weight,
            maturity.revenue_growth_weight,
            maturity.job_impact_weight,
        ];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) || weights.iter().sum::<f64>() <= 0.0
        {
            return Err(ForecastError::InvalidParameter(
                "Maturity weights must be non-negative with a positive sum".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.signals.automation_risk_weight) {
            return Err(ForecastError::InvalidParameter(
                "Automation risk weight must be within [0, 1]".to_string(),
            ));
        }

        let anomaly = &self.signals.anomaly;
        if anomaly.interval_width_threshold < 0.0 || !anomaly.interval_width_threshold.is_finite() {
            return Err(ForecastError::InvalidParameter(
                "Interval width threshold must be non-negative".to_string(),
            ));
        }
        if anomaly.reversal_min_run == 0 || anomaly.sustained_positive_run == 0 {
            return Err(ForecastError::InvalidParameter(
                "Trend reversal run lengths must be greater than zero".to_string(),
            ));
        }
        if anomaly.warmup_points < 3 {
            return Err(ForecastError::InvalidParameter(
                "Anomaly warmup needs at least 3 points".to_string(),
            ));
        }

        let runtime = &self.runtime;
        if runtime.max_concurrent_metrics == 0 || runtime.max_concurrent_fits == 0 {
            return Err(ForecastError::InvalidParameter(
                "Worker pool sizes must be greater than zero".to_string(),
            ));
        }
        if runtime.pipeline_timeout_ms == 0 {
            return Err(ForecastError::InvalidParameter(
                "Pipeline timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
