//! Feature engineering over a single time series
//!
//! Every feature at an anchor uses only observations at or before that
//! anchor. Missing inputs produce missing features, never NaN or infinity.

use crate::config::FeatureConfig;
use crate::data::{MetricKey, TimeSeries};
use crate::error::{ForecastError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trend_math::moving_averages::rolling_mean;
use trend_math::volatility::{relative_change, rolling_volatility};

/// Feature values anchored to one timestamp of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub key: MetricKey,
    pub anchor: DateTime<Utc>,
    /// Position of the anchor in the source series
    pub index: usize,
    pub features: BTreeMap<String, Option<f64>>,
}

impl FeatureRow {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied().flatten()
    }

    /// True when no feature is missing
    pub fn is_complete(&self) -> bool {
        self.features.values().all(Option::is_some)
    }
}

/// Derives growth, moving-average, lag and volatility features
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    config: FeatureConfig,
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Column names, in the order used by [`FeatureEngine::columns`]
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = vec![
            "value".to_string(),
            format!("growth_rate_{}", self.config.growth_rate),
            format!("moving_average_{}", self.config.moving_average),
        ];
        names.extend(self.config.lag.iter().map(|k| format!("lag_{}", k)));
        names.push(format!("volatility_{}", self.config.volatility));
        names
    }

    /// Every feature column over the full length of `values`
    pub fn columns(&self, values: &[Option<f64>]) -> Result<Vec<Vec<Option<f64>>>> {
        let n = values.len();
        let mut columns = Vec::with_capacity(4 + self.config.lag.len());

        columns.push(values.to_vec());

        let w = self.config.growth_rate;
        let growth = (0..n)
            .map(|i| match (i.checked_sub(w).and_then(|j| values[j]), values[i]) {
                (Some(prev), Some(curr)) => relative_change(prev, curr),
                _ => None,
            })
            .collect();
        columns.push(growth);

        columns.push(rolling_mean(values, self.config.moving_average)?);

        for &k in &self.config.lag {
            columns.push(
                (0..n)
                    .map(|i| i.checked_sub(k).and_then(|j| values[j]))
                    .collect(),
            );
        }

        columns.push(rolling_volatility(values, self.config.volatility)?);

        Ok(columns)
    }

    /// Feature values at position `index`, in column order
    pub fn vector_at(&self, values: &[Option<f64>], index: usize) -> Result<Vec<Option<f64>>> {
        if index >= values.len() {
            return Err(ForecastError::InvalidParameter(format!(
                "Feature index {} out of range for {} values",
                index,
                values.len()
            )));
        }
        // only the trailing window matters for the last anchor
        let start = index.saturating_sub(self.config.first_anchor() + 1);
        let window = &values[start..=index];
        let columns = self.columns(window)?;
        let local = window.len() - 1;
        Ok(columns.iter().map(|c| c[local]).collect())
    }

    /// One row per anchor with enough history to fill every window.
    ///
    /// Fails with `InsufficientHistory` below two points; shorter histories
    /// otherwise just produce fewer rows.
    pub fn compute(&self, series: &TimeSeries) -> Result<Vec<FeatureRow>> {
        if series.len() < 2 {
            return Err(ForecastError::InsufficientHistory {
                points: series.len(),
            });
        }

        let values = series.values();
        let names = self.feature_names();
        let columns = self.columns(&values)?;
        let first = self.config.first_anchor();

        let rows = series
            .observations()
            .iter()
            .enumerate()
            .skip(first)
            .map(|(i, obs)| FeatureRow {
                key: series.key().clone(),
                anchor: obs.timestamp,
                index: i,
                features: names
                    .iter()
                    .zip(&columns)
                    .map(|(name, column)| (name.clone(), column[i]))
                    .collect(),
            })
            .collect();

        Ok(rows)
    }
}
