//! Trend and seasonality smoothing model
//!
//! Holt's linear trend method with smoothing parameters chosen by grid
//! search on the one-step-ahead squared error. Once two full seasons are
//! available an additive Holt-Winters fit is tried as well and kept when
//! its mean squared error is lower.

use crate::config::StatisticalConfig;
use crate::data::ModelSeries;
use crate::error::{ForecastError, Result};
use crate::models::Projection;
use trend_math::forecasting::{DoubleExponentialSmoothing, SeasonalSmoothing};

const ALPHAS: [f64; 9] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];
const BETAS: [f64; 6] = [0.05, 0.1, 0.2, 0.3, 0.5, 0.7];
const GAMMAS: [f64; 3] = [0.1, 0.3, 0.5];

/// Deterministic smoothing adapter
#[derive(Debug, Clone)]
pub struct StatisticalAdapter {
    config: StatisticalConfig,
}

#[derive(Debug, Clone)]
enum Smoother {
    Holt(DoubleExponentialSmoothing),
    Seasonal(SeasonalSmoothing),
}

/// Fitted smoothing state
#[derive(Debug, Clone)]
pub struct FittedStatistical {
    smoother: Smoother,
    residual_variance: f64,
}

impl FittedStatistical {
    /// Whether the seasonal variant was selected
    pub fn is_seasonal(&self) -> bool {
        matches!(self.smoother, Smoother::Seasonal(_))
    }
}

fn mean_square(residuals: &[f64]) -> f64 {
    if residuals.is_empty() {
        return 0.0;
    }
    residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64
}

impl StatisticalAdapter {
    pub const MIN_DATA_POINTS: usize = 3;

    pub fn new(config: StatisticalConfig) -> Self {
        Self { config }
    }

    pub(crate) fn fit(&self, view: &ModelSeries) -> Result<FittedStatistical> {
        let values = &view.values;

        let mut best: Option<DoubleExponentialSmoothing> = None;
        for &alpha in &ALPHAS {
            for &beta in &BETAS {
                let candidate = DoubleExponentialSmoothing::fit(alpha, beta, values)?;
                if best.as_ref().map_or(true, |b| candidate.sse() < b.sse()) {
                    best = Some(candidate);
                }
            }
        }
        let holt = best.ok_or_else(|| {
            ForecastError::InvalidParameter("empty smoothing grid".to_string())
        })?;
        let holt_mse = mean_square(holt.residuals());

        let m = self.config.season_length;
        if values.len() >= 2 * m {
            let mut best_seasonal: Option<SeasonalSmoothing> = None;
            for &alpha in &ALPHAS {
                for &beta in &BETAS {
                    for &gamma in &GAMMAS {
                        let candidate = SeasonalSmoothing::fit(values, m, alpha, beta, gamma)?;
                        if best_seasonal
                            .as_ref()
                            .map_or(true, |b| candidate.sse() < b.sse())
                        {
                            best_seasonal = Some(candidate);
                        }
                    }
                }
            }

            if let Some(seasonal) = best_seasonal {
                let seasonal_mse = mean_square(seasonal.residuals());
                if seasonal_mse < holt_mse {
                    return Ok(FittedStatistical {
                        smoother: Smoother::Seasonal(seasonal),
                        residual_variance: seasonal_mse,
                    });
                }
            }
        }

        Ok(FittedStatistical {
            smoother: Smoother::Holt(holt),
            residual_variance: holt_mse,
        })
    }
}

impl Projection for FittedStatistical {
    fn project(&self, steps: usize) -> Result<Vec<(f64, f64)>> {
        (1..=steps)
            .map(|h| {
                let value = match &self.smoother {
                    Smoother::Holt(holt) => holt.forecast(h)?,
                    Smoother::Seasonal(seasonal) => seasonal.forecast(h),
                };
                Ok((value, self.residual_variance * h as f64))
            })
            .collect()
    }

    fn residual_variance(&self) -> f64 {
        self.residual_variance
    }
}
