//! Descriptive statistics for a metric's history

use crate::data::TimeSeries;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trend_math::forecasting::LinearRegression;
use trend_math::statistics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub points: usize,
    pub observed: usize,
    pub missing: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Least-squares slope per observed step
    pub trend_slope: Option<f64>,
    pub trend_r_squared: Option<f64>,
    /// Compound growth per period between the first and last observation
    pub compound_growth_rate: Option<f64>,
}

impl SeriesSummary {
    pub fn from_series(series: &TimeSeries) -> Result<Self> {
        let values = series.observed_values();

        let (mean, std_dev, min, max) = if values.is_empty() {
            (None, None, None, None)
        } else {
            let (lo, hi) = statistics::min_max(&values)?;
            (
                Some(statistics::mean(&values)?),
                Some(statistics::std_dev(&values)?),
                Some(lo),
                Some(hi),
            )
        };

        let (trend_slope, trend_r_squared) = if values.len() >= 2 {
            match LinearRegression::from_values(&values) {
                Ok(lr) => (lr.slope().ok(), lr.r_squared().ok()),
                Err(_) => (None, None),
            }
        } else {
            (None, None)
        };

        Ok(Self {
            points: series.len(),
            observed: values.len(),
            missing: series.len() - values.len(),
            start: series.first_timestamp(),
            end: series.last_timestamp(),
            mean,
            std_dev,
            min,
            max,
            trend_slope,
            trend_r_squared,
            compound_growth_rate: compound_growth_rate(series),
        })
    }
}

fn compound_growth_rate(series: &TimeSeries) -> Option<f64> {
    let values = series.values();
    let first = values.iter().position(Option::is_some)?;
    let last = values.iter().rposition(Option::is_some)?;
    let (v0, v1) = (values[first]?, values[last]?);

    if last == first || v0 <= 0.0 || v1 <= 0.0 {
        return None;
    }
    Some((v1 / v0).powf(1.0 / (last - first) as f64) - 1.0)
}
