//! Moving average calculations
//!
//! Contains:
//! - Simple Moving Average (SMA) as a streaming window
//! - Gap-aware rolling mean over series with missing values

use crate::{MathError, Result};
use std::collections::VecDeque;

/// Simple Moving Average (SMA) implementation
#[derive(Debug, Clone)]
pub struct SimpleMovingAverage {
    period: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl SimpleMovingAverage {
    /// Create a new Simple Moving Average with the specified period
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(MathError::InvalidInput(
                "Period must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            period,
            values: VecDeque::with_capacity(period),
            sum: 0.0,
        })
    }

    /// Update the SMA with a new value
    pub fn update(&mut self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(MathError::InvalidInput(format!(
                "SMA input must be finite, got {}",
                value
            )));
        }

        self.values.push_back(value);
        self.sum += value;

        // Remove oldest value if we have more than period values
        if self.values.len() > self.period {
            if let Some(old_value) = self.values.pop_front() {
                self.sum -= old_value;
            }
        }

        Ok(())
    }

    /// Get the current SMA value
    pub fn value(&self) -> Result<f64> {
        if self.values.len() < self.period {
            return Err(MathError::InsufficientData(format!(
                "Not enough data for SMA calculation. Need {} values, have {}.",
                self.period,
                self.values.len()
            )));
        }

        Ok(self.sum / self.period as f64)
    }

    /// Whether the window is full
    pub fn is_ready(&self) -> bool {
        self.values.len() >= self.period
    }

    /// Get the current period
    pub fn period(&self) -> usize {
        self.period
    }

    /// Reset the SMA, clearing all values
    pub fn reset(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }
}

/// Trailing simple mean for every position of a gap-aware series.
///
/// Position `i` holds the mean of `values[i + 1 - period..=i]`, or `None`
/// when that window is incomplete or contains a missing value. A gap
/// restarts the window, so no mean ever spans a missing observation.
pub fn rolling_mean(values: &[Option<f64>], period: usize) -> Result<Vec<Option<f64>>> {
    let mut sma = SimpleMovingAverage::new(period)?;
    let mut out = Vec::with_capacity(values.len());

    for value in values {
        match value {
            Some(v) => {
                sma.update(*v)?;
                out.push(if sma.is_ready() { Some(sma.value()?) } else { None });
            }
            None => {
                sma.reset();
                out.push(None);
            }
        }
    }

    Ok(out)
}
