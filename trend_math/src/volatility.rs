//! Volatility calculations
//!
//! Contains:
//! - Period-over-period returns with a defined missing result
//! - Rolling (population) standard deviation
//! - Gap-aware rolling volatility of returns

use crate::{MathError, Result};
use std::collections::VecDeque;

/// Relative change from `previous` to `current`.
///
/// Returns `None` when the denominator is zero or negative, so callers never
/// see an infinite or NaN return.
pub fn relative_change(previous: f64, current: f64) -> Option<f64> {
    if previous <= 0.0 || !previous.is_finite() || !current.is_finite() {
        return None;
    }
    Some((current - previous) / previous)
}

/// Period-over-period returns of a gap-aware series.
///
/// Position `i` holds the return from `i - 1` to `i`; position 0 is always
/// `None`, as is any position touching a missing value.
pub fn period_returns(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut returns = Vec::with_capacity(values.len());
    returns.push(None);

    for pair in values.windows(2) {
        let r = match (pair[0], pair[1]) {
            (Some(prev), Some(curr)) => relative_change(prev, curr),
            _ => None,
        };
        returns.push(r);
    }

    returns.truncate(values.len());
    returns
}

/// Rolling standard deviation over a fixed window
#[derive(Debug, Clone)]
pub struct RollingStdDev {
    period: usize,
    values: VecDeque<f64>,
}

impl RollingStdDev {
    /// Create a new rolling standard deviation with the specified period
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(MathError::InvalidInput(
                "Period must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            period,
            values: VecDeque::with_capacity(period),
        })
    }

    /// Push a new value, dropping the oldest once the window is full
    pub fn update(&mut self, value: f64) {
        self.values.push_back(value);
        if self.values.len() > self.period {
            self.values.pop_front();
        }
    }

    /// Whether the window is full
    pub fn is_ready(&self) -> bool {
        self.values.len() >= self.period
    }

    /// Population standard deviation of the current window
    pub fn value(&self) -> Result<f64> {
        if !self.is_ready() {
            return Err(MathError::InsufficientData(format!(
                "Not enough data to calculate standard deviation. Need {} values, have {}.",
                self.period,
                self.values.len()
            )));
        }

        let n = self.values.len() as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let variance = self
            .values
            .iter()
            .map(|&v| {
                let diff = v - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;

        Ok(variance.sqrt())
    }

    /// Get the current period
    pub fn period(&self) -> usize {
        self.period
    }

    /// Clear the window
    pub fn reset(&mut self) {
        self.values.clear();
    }
}

/// Trailing standard deviation of period-over-period returns.
///
/// Position `i` is the standard deviation of the `period` returns ending at
/// `i`. Any missing return inside the window yields `None`.
pub fn rolling_volatility(values: &[Option<f64>], period: usize) -> Result<Vec<Option<f64>>> {
    let mut window = RollingStdDev::new(period)?;
    let returns = period_returns(values);
    let mut out = Vec::with_capacity(values.len());

    for r in returns {
        match r {
            Some(r) => {
                window.update(r);
                out.push(if window.is_ready() {
                    Some(window.value()?)
                } else {
                    None
                });
            }
            None => {
                window.reset();
                out.push(None);
            }
        }
    }

    Ok(out)
}
