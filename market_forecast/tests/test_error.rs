use market_forecast::error::ForecastError;
use market_forecast::ModelKind;
use rstest::rstest;
use std::io;

fn insufficient() -> ForecastError {
    ForecastError::InsufficientData {
        model: ModelKind::TreeEnsemble.to_string(),
        required: 12,
        available: 5,
    }
}

#[test]
fn test_error_conversion() {
    let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
    assert!(matches!(ForecastError::from(io_error), ForecastError::IoError(_)));

    let math_error = trend_math::MathError::InvalidInput("period must be positive".to_string());
    assert!(matches!(ForecastError::from(math_error), ForecastError::Math(_)));

    let toml_error = toml::from_str::<toml::Value>("horizon = ").unwrap_err();
    assert!(matches!(ForecastError::from(toml_error), ForecastError::Config(_)));
}

#[test]
fn test_error_display() {
    assert_eq!(
        insufficient().to_string(),
        "Insufficient data for tree_ensemble: need at least 12 points, got 5"
    );
    assert_eq!(
        ForecastError::InsufficientTrainingRows {
            model: "tree_ensemble".to_string(),
            required: 4,
            available: 2,
        }
        .to_string(),
        "Insufficient training rows for tree_ensemble: need at least 4, got 2"
    );
    assert_eq!(
        ForecastError::InvalidHorizon(0).to_string(),
        "Invalid horizon: 0 (must be at least 1)"
    );

    let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "permission denied");
    let message = ForecastError::from(io_error).to_string();
    assert!(message.contains("IO error"));
    assert!(message.contains("permission denied"));
}

#[rstest]
#[case(ForecastError::InsufficientHistory { points: 1 }, true)]
#[case(insufficient(), true)]
#[case(ForecastError::InsufficientTrainingRows { model: "tree_ensemble".to_string(), required: 4, available: 0 }, true)]
#[case(ForecastError::FitNonConvergence { model: "growth_curve".to_string(), reason: "flat".to_string() }, true)]
#[case(ForecastError::AdapterFailed { model: "statistical".to_string(), reason: "panicked".to_string() }, true)]
#[case(ForecastError::NoViableModels { metric: "m".to_string() }, false)]
#[case(ForecastError::AlignmentMismatch { expected: "a".to_string(), found: "b".to_string() }, false)]
#[case(ForecastError::Cancelled, false)]
#[case(ForecastError::DataError("empty".to_string()), false)]
fn test_recoverable_classification(#[case] error: ForecastError, #[case] recoverable: bool) {
    assert_eq!(error.is_recoverable(), recoverable);
}
