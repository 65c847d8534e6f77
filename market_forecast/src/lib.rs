//! # Market Forecast
//!
//! A multi-model forecasting and signal engine for AI market metrics.
//!
//! ## Features
//!
//! - Time series loading from cleaned tables (long or wide CSV layout)
//! - Feature engineering: growth rates, moving averages, lags, volatility
//! - Model adapters: smoothing, bagged regression trees, logistic growth curve
//! - Inverse-error ensemble with pooled-variance confidence intervals
//! - Signals: market maturity index, investment risk score, "AI winter" anomalies
//! - Concurrent per-metric pipelines with timeouts and reliability flags
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use market_forecast::{CancellationFlag, EngineConfig, MetricTable, Orchestrator, TableLayout};
//! use std::sync::Arc;
//!
//! # async fn run() -> market_forecast::Result<()> {
//! let table = MetricTable::from_csv("metrics.csv", TableLayout::Long)?;
//! let orchestrator = Orchestrator::new(EngineConfig::default())?;
//!
//! let report = orchestrator
//!     .run(Arc::new(table), "run-1", &CancellationFlag::new())
//!     .await;
//!
//! for record in &report.records {
//!     println!("{} {}", record.key, record.reliability);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod data;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod signals;
pub mod summary;

// Re-export commonly used types
pub use crate::cancel::CancellationFlag;
pub use crate::config::{EngineConfig, ModelKind};
pub use crate::data::{MetricKey, MetricTable, Observation, TableLayout, TimeSeries};
pub use crate::ensemble::{EnsembleCombiner, EnsembleForecast};
pub use crate::error::{ForecastError, Result};
pub use crate::features::{FeatureEngine, FeatureRow};
pub use crate::models::{FittedModel, ModelAdapter, ModelForecast, ModelInput};
pub use crate::orchestrator::{MetricOutcome, MetricRecord, Orchestrator, RunReport};
pub use crate::signals::{Reliability, SignalDetector, SignalSet};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
