//! Error types for the market_forecast crate

use thiserror::Error;

/// Custom error types for the market_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// The feature engine needs at least two points
    #[error("Insufficient history: need at least 2 points, got {points}")]
    InsufficientHistory { points: usize },

    /// A model adapter was given fewer points than its fixed minimum
    #[error("Insufficient data for {model}: need at least {required} points, got {available}")]
    InsufficientData {
        model: String,
        required: usize,
        available: usize,
    },

    /// Too few usable training rows after feature assembly
    #[error("Insufficient training rows for {model}: need at least {required}, got {available}")]
    InsufficientTrainingRows {
        model: String,
        required: usize,
        available: usize,
    },

    /// The growth-curve solver did not reach a usable fit
    #[error("{model} failed to converge: {reason}")]
    FitNonConvergence { model: String, reason: String },

    /// An adapter's fit task ended abnormally
    #[error("{model} failed: {reason}")]
    AdapterFailed { model: String, reason: String },

    /// Every adapter assigned to a metric failed
    #[error("No viable models for metric {metric}")]
    NoViableModels { metric: String },

    /// Adapter forecasts disagree on their timestamps
    #[error("Forecast alignment mismatch: expected {expected} timestamps, found {found}")]
    AlignmentMismatch { expected: String, found: String },

    /// Horizon must be at least one step
    #[error("Invalid horizon: {0} (must be at least 1)")]
    InvalidHorizon(usize),

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// The run or pipeline was cancelled before this step finished
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration could not be parsed
    #[error("Config error: {0}")]
    Config(String),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from CSV parsing
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Error from the numeric primitives
    #[error("Math error: {0}")]
    Math(#[from] trend_math::MathError),
}

impl ForecastError {
    /// Whether the failure only removes one contributor from a metric run.
    ///
    /// Feature and adapter errors are recoverable: the run continues with
    /// fewer rows or fewer models. Everything else ends the metric's run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ForecastError::InsufficientHistory { .. }
                | ForecastError::InsufficientData { .. }
                | ForecastError::InsufficientTrainingRows { .. }
                | ForecastError::FitNonConvergence { .. }
                | ForecastError::AdapterFailed { .. }
        )
    }
}

impl From<toml::de::Error> for ForecastError {
    fn from(err: toml::de::Error) -> Self {
        ForecastError::Config(err.to_string())
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;
