//! Forecasting primitives for trend extrapolation
//!
//! Contains:
//! - Linear Regression over an index axis
//! - Double Exponential Smoothing (Holt's linear trend method)
//! - Additive Seasonal Smoothing (Holt-Winters)

use crate::{MathError, Result};
use std::collections::VecDeque;

/// Linear Regression implementation for trend forecasting
#[derive(Debug, Clone)]
pub struct LinearRegression {
    period: usize,
    values: VecDeque<f64>,
    slope: Option<f64>,
    intercept: Option<f64>,
}

impl LinearRegression {
    /// Create a new Linear Regression with the specified period
    pub fn new(period: usize) -> Result<Self> {
        if period < 2 {
            return Err(MathError::InvalidInput(
                "Period must be at least 2 for linear regression".to_string(),
            ));
        }

        Ok(Self {
            period,
            values: VecDeque::with_capacity(period),
            slope: None,
            intercept: None,
        })
    }

    /// Fit a regression over a whole slice, using every value as the window
    pub fn from_values(values: &[f64]) -> Result<Self> {
        let mut lr = Self::new(values.len().max(2))?;
        for &v in values {
            lr.update(v)?;
        }
        Ok(lr)
    }

    /// Update the Linear Regression with a new value
    pub fn update(&mut self, value: f64) -> Result<()> {
        self.values.push_back(value);

        // Keep only the required number of values
        if self.values.len() > self.period {
            self.values.pop_front();
        }

        if self.values.len() >= 2 {
            self.calculate_regression()?;
        }

        Ok(())
    }

    /// Calculate the linear regression parameters (slope and intercept)
    fn calculate_regression(&mut self) -> Result<()> {
        let n = self.values.len() as f64;

        let x_mean = (0..self.values.len()).map(|i| i as f64).sum::<f64>() / n;
        let y_mean = self.values.iter().sum::<f64>() / n;

        let mut numerator = 0.0;
        let mut denominator = 0.0;

        for (i, &y) in self.values.iter().enumerate() {
            let x = i as f64;
            numerator += (x - x_mean) * (y - y_mean);
            denominator += (x - x_mean) * (x - x_mean);
        }

        if denominator.abs() < 1e-10 {
            return Err(MathError::CalculationError(
                "Cannot calculate slope: x values are too similar".to_string(),
            ));
        }

        let slope = numerator / denominator;
        let intercept = y_mean - slope * x_mean;

        self.slope = Some(slope);
        self.intercept = Some(intercept);

        Ok(())
    }

    /// Predict the value n periods past the last observation
    pub fn forecast(&self, periods_ahead: usize) -> Result<f64> {
        if self.values.len() < 2 {
            return Err(MathError::InsufficientData(
                "Not enough data for forecasting. Need at least 2 points.".to_string(),
            ));
        }

        match (self.slope, self.intercept) {
            (Some(slope), Some(intercept)) => {
                let x = (self.values.len() + periods_ahead - 1) as f64;
                Ok(slope * x + intercept)
            }
            _ => Err(MathError::CalculationError(
                "Regression parameters not calculated".to_string(),
            )),
        }
    }

    /// Get the current slope (trend direction and strength)
    pub fn slope(&self) -> Result<f64> {
        self.slope.ok_or_else(|| {
            MathError::InsufficientData("Not enough data to calculate slope".to_string())
        })
    }

    /// Get the current intercept
    pub fn intercept(&self) -> Result<f64> {
        self.intercept.ok_or_else(|| {
            MathError::InsufficientData("Not enough data to calculate intercept".to_string())
        })
    }

    /// Get the R-squared value (coefficient of determination)
    pub fn r_squared(&self) -> Result<f64> {
        let slope = self.slope()?;
        let intercept = self.intercept()?;

        let y_mean = self.values.iter().sum::<f64>() / self.values.len() as f64;

        let mut ss_total = 0.0;
        let mut ss_residual = 0.0;

        for (i, &y) in self.values.iter().enumerate() {
            let y_pred = slope * i as f64 + intercept;
            ss_total += (y - y_mean).powi(2);
            ss_residual += (y - y_pred).powi(2);
        }

        if ss_total.abs() < 1e-10 {
            return Err(MathError::CalculationError(
                "Cannot calculate R-squared: total sum of squares is too small".to_string(),
            ));
        }

        Ok(1.0 - (ss_residual / ss_total))
    }

    /// Get the current period
    pub fn period(&self) -> usize {
        self.period
    }
}

/// Double Exponential Smoothing (Holt's Method) implementation
///
/// The trend is seeded from the first difference rather than zero, which
/// keeps very short series from lagging their own slope.
#[derive(Debug, Clone)]
pub struct DoubleExponentialSmoothing {
    alpha: f64,
    beta: f64,
    level: Option<f64>,
    trend: Option<f64>,
    residuals: Vec<f64>,
}

impl DoubleExponentialSmoothing {
    /// Create a new Double Exponential Smoothing with the specified parameters
    pub fn new(alpha: f64, beta: f64) -> Result<Self> {
        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(MathError::InvalidInput(
                "Alpha must be between 0 and 1 (exclusive)".to_string(),
            ));
        }
        if beta <= 0.0 || beta >= 1.0 {
            return Err(MathError::InvalidInput(
                "Beta must be between 0 and 1 (exclusive)".to_string(),
            ));
        }

        Ok(Self {
            alpha,
            beta,
            level: None,
            trend: None,
            residuals: Vec::new(),
        })
    }

    /// Fit over a whole slice
    pub fn fit(alpha: f64, beta: f64, values: &[f64]) -> Result<Self> {
        let mut des = Self::new(alpha, beta)?;
        for &v in values {
            des.update(v)?;
        }
        Ok(des)
    }

    /// Update the Double Exponential Smoothing with a new value
    pub fn update(&mut self, value: f64) -> Result<()> {
        match (self.level, self.trend) {
            (None, _) => {
                self.level = Some(value);
            }
            (Some(prev_level), None) => {
                self.trend = Some(value - prev_level);
                self.level = Some(value);
            }
            (Some(prev_level), Some(prev_trend)) => {
                self.residuals.push(value - (prev_level + prev_trend));

                let new_level = self.alpha * value + (1.0 - self.alpha) * (prev_level + prev_trend);
                let new_trend =
                    self.beta * (new_level - prev_level) + (1.0 - self.beta) * prev_trend;

                self.level = Some(new_level);
                self.trend = Some(new_trend);
            }
        }

        Ok(())
    }

    /// Forecast h steps ahead
    pub fn forecast(&self, h: usize) -> Result<f64> {
        match (self.level, self.trend) {
            (Some(level), Some(trend)) => Ok(level + (h as f64) * trend),
            _ => Err(MathError::InsufficientData(
                "Not enough data to make a forecast".to_string(),
            )),
        }
    }

    /// Get the current level
    pub fn level(&self) -> Result<f64> {
        self.level
            .ok_or_else(|| MathError::InsufficientData("Level not calculated yet".to_string()))
    }

    /// Get the current trend
    pub fn trend(&self) -> Result<f64> {
        self.trend
            .ok_or_else(|| MathError::InsufficientData("Trend not calculated yet".to_string()))
    }

    /// One-step-ahead errors observed while fitting
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Sum of squared one-step-ahead errors
    pub fn sse(&self) -> f64 {
        self.residuals.iter().map(|r| r * r).sum()
    }
}

/// Additive seasonal smoothing (Holt-Winters)
#[derive(Debug, Clone)]
pub struct SeasonalSmoothing {
    season_length: usize,
    level: f64,
    trend: f64,
    seasonals: Vec<f64>,
    observed: usize,
    residuals: Vec<f64>,
}

impl SeasonalSmoothing {
    /// Fit over a whole slice.
    ///
    /// Requires at least two full seasons; level, trend and seasonal indices
    /// are initialised from the first two seasons.
    pub fn fit(
        values: &[f64],
        season_length: usize,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Result<Self> {
        if season_length < 2 {
            return Err(MathError::InvalidInput(
                "Season length must be at least 2".to_string(),
            ));
        }
        for (name, p) in [("Alpha", alpha), ("Beta", beta), ("Gamma", gamma)] {
            if p <= 0.0 || p >= 1.0 {
                return Err(MathError::InvalidInput(format!(
                    "{} must be between 0 and 1 (exclusive)",
                    name
                )));
            }
        }
        if values.len() < 2 * season_length {
            return Err(MathError::InsufficientData(format!(
                "Seasonal smoothing needs two full seasons ({} values), have {}",
                2 * season_length,
                values.len()
            )));
        }

        let m = season_length;
        let first = values[..m].iter().sum::<f64>() / m as f64;
        let second = values[m..2 * m].iter().sum::<f64>() / m as f64;

        let mut level = first;
        let mut trend = (second - first) / m as f64;
        let mut seasonals: Vec<f64> = values[..m].iter().map(|v| v - first).collect();
        let mut residuals = Vec::with_capacity(values.len() - m);

        for (t, &value) in values.iter().enumerate().skip(m) {
            let idx = t % m;
            residuals.push(value - (level + trend + seasonals[idx]));

            let new_level = alpha * (value - seasonals[idx]) + (1.0 - alpha) * (level + trend);
            trend = beta * (new_level - level) + (1.0 - beta) * trend;
            seasonals[idx] = gamma * (value - new_level) + (1.0 - gamma) * seasonals[idx];
            level = new_level;
        }

        Ok(Self {
            season_length,
            level,
            trend,
            seasonals,
            observed: values.len(),
            residuals,
        })
    }

    /// Forecast h steps past the last fitted value
    pub fn forecast(&self, h: usize) -> f64 {
        let idx = (self.observed + h - 1) % self.season_length;
        self.level + h as f64 * self.trend + self.seasonals[idx]
    }

    /// One-step-ahead errors observed while fitting
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Sum of squared one-step-ahead errors
    pub fn sse(&self) -> f64 {
        self.residuals.iter().map(|r| r * r).sum()
    }

    /// Get the season length
    pub fn season_length(&self) -> usize {
        self.season_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_regression() {
        let mut lr = LinearRegression::new(3).unwrap();

        // Add test data with perfect linear relationship
        lr.update(10.0).unwrap();
        lr.update(20.0).unwrap();
        lr.update(30.0).unwrap();

        assert!((lr.slope().unwrap() - 10.0).abs() < 0.001);

        let forecast = lr.forecast(1).unwrap();
        assert!((forecast - 40.0).abs() < 0.001);

        // R-squared should be 1.0 for perfect linear data
        assert!(lr.r_squared().unwrap() > 0.999);
    }

    #[test]
    fn test_linear_regression_from_values() {
        let lr = LinearRegression::from_values(&[1.0, 3.0, 5.0, 7.0]).unwrap();
        assert!((lr.slope().unwrap() - 2.0).abs() < 1e-12);
        assert!((lr.intercept().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_double_exponential_smoothing_tracks_linear_trend() {
        let des = DoubleExponentialSmoothing::fit(0.5, 0.3, &[10.0, 20.0, 30.0, 40.0]).unwrap();

        // a perfect line is tracked without error
        assert!((des.level().unwrap() - 40.0).abs() < 1e-9);
        assert!((des.trend().unwrap() - 10.0).abs() < 1e-9);
        assert!((des.forecast(2).unwrap() - 60.0).abs() < 1e-9);
        assert_eq!(des.residuals().len(), 2);
        assert!(des.sse() < 1e-12);
    }

    #[test]
    fn test_double_exponential_smoothing_needs_two_points() {
        let des = DoubleExponentialSmoothing::fit(0.5, 0.3, &[10.0]).unwrap();
        assert!(des.forecast(1).is_err());
        assert!(DoubleExponentialSmoothing::new(1.0, 0.3).is_err());
    }

    #[test]
    fn test_seasonal_smoothing_repeats_pattern() {
        let pattern = [10.0, 20.0, 30.0, 20.0];
        let values: Vec<f64> = pattern.iter().cycle().take(12).copied().collect();

        let hw = SeasonalSmoothing::fit(&values, 4, 0.3, 0.1, 0.3).unwrap();

        for h in 1..=4 {
            assert!((hw.forecast(h) - pattern[(h - 1) % 4]).abs() < 1e-9);
        }
        assert!(hw.sse() < 1e-12);
    }

    #[test]
    fn test_seasonal_smoothing_needs_two_seasons() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(SeasonalSmoothing::fit(&values, 4, 0.3, 0.1, 0.3).is_err());
    }
}
