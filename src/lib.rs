//! # AI Tracker
//!
//! Workspace facade for the AI market forecasting engine.
//!
//! - [`trend_math`]: rolling windows, smoothing, regression and normalization
//! - [`market_forecast`]: feature engine, model adapters, ensemble, signals
//!   and the concurrent orchestrator
//!
//! ## Example
//!
//! ```
//! use ai_tracker_workspace::market_forecast::EngineConfig;
//!
//! let config = EngineConfig::default();
//! assert_eq!(config.horizon, 5);
//! assert!(config.validate().is_ok());
//! ```

pub use market_forecast;
pub use trend_math;
