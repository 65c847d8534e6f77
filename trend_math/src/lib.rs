//! # Trend Math
//!
//! Numeric building blocks for trend forecasting on sparse, gap-aware
//! metric series. The crate has no knowledge of metrics or models; it only
//! provides the calculations the forecasting engine is assembled from.

use thiserror::Error;

// Calculation modules
pub mod forecasting;
pub mod moving_averages;
pub mod normalization;
pub mod statistics;
pub mod volatility;

/// Errors that can occur in trend calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for trend math operations
pub type Result<T> = std::result::Result<T, MathError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_context() {
        let err = MathError::InsufficientData("need 3 values".to_string());
        assert_eq!(
            err.to_string(),
            "Insufficient data for calculation: need 3 values"
        );
    }
}
