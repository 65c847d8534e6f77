//! Logistic growth-curve model
//!
//! Fits `y = L / (1 + exp(-k (x - x0)))` with Levenberg-Marquardt on values
//! scaled by their maximum. The capacity is reparameterized as
//! `L = y_max + exp(alpha)` so the optimizer can never place the asymptote
//! below the observed maximum.

use crate::config::{GrowthCurveConfig, ModelKind};
use crate::data::ModelSeries;
use crate::error::{ForecastError, Result};
use crate::models::Projection;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{Dyn, Matrix3, OMatrix, OVector, Owned, Vector3, U3};

/// How far outside the data the inflection point may sit, in multiples of
/// the series length
const MAX_INFLECTION_SPAN: f64 = 5.0;
const MIN_GROWTH_RATE: f64 = 1e-9;

struct LogisticProblem {
    /// `[alpha, k, x0]`
    params: Vector3<f64>,
    y_max: f64,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl LogisticProblem {
    fn capacity(&self) -> f64 {
        self.y_max + self.params[0].exp()
    }
}

impl LeastSquaresProblem<f64, Dyn, U3> for LogisticProblem {
    type ParameterStorage = Owned<f64, U3>;
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U3>;

    fn set_params(&mut self, p: &Vector3<f64>) {
        self.params.copy_from(p);
    }

    fn params(&self) -> Vector3<f64> {
        self.params
    }

    fn residuals(&self) -> Option<OVector<f64, Dyn>> {
        let l = self.capacity();
        let (k, x0) = (self.params[1], self.params[2]);

        let mut residuals = OVector::<f64, Dyn>::zeros(self.x.len());
        for (i, (&xi, &yi)) in self.x.iter().zip(&self.y).enumerate() {
            residuals[i] = yi - l / (1.0 + (-k * (xi - x0)).exp());
        }
        Some(residuals)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U3>> {
        let l = self.capacity();
        let exp_alpha = self.params[0].exp();
        let (k, x0) = (self.params[1], self.params[2]);

        let mut jac = OMatrix::<f64, Dyn, U3>::zeros(self.x.len());
        for (i, &xi) in self.x.iter().enumerate() {
            let e = (-k * (xi - x0)).exp();
            let denom = 1.0 + e;
            let denom_sq = denom * denom;

            // residual is y - f, so each column is -df/dp
            jac[(i, 0)] = -exp_alpha / denom;
            jac[(i, 1)] = -l * (xi - x0) * e / denom_sq;
            jac[(i, 2)] = l * k * e / denom_sq;
        }
        Some(jac)
    }
}

/// Gradient of the curve with respect to `[L, k, x0]`
fn curve_gradient(l: f64, k: f64, x0: f64, x: f64) -> (f64, Vector3<f64>) {
    let e = (-k * (x - x0)).exp();
    let denom = 1.0 + e;
    let denom_sq = denom * denom;
    (
        l / denom,
        Vector3::new(1.0 / denom, l * (x - x0) * e / denom_sq, -l * k * e / denom_sq),
    )
}

/// S-curve adapter
#[derive(Debug, Clone)]
pub struct GrowthCurveAdapter {
    config: GrowthCurveConfig,
}

/// Fitted logistic parameters, in original units
#[derive(Debug, Clone)]
pub struct FittedGrowthCurve {
    capacity: f64,
    growth_rate: f64,
    inflection: f64,
    observed: usize,
    residual_variance: f64,
    covariance: Option<Matrix3<f64>>,
}

impl FittedGrowthCurve {
    /// Fitted asymptote `L`
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn growth_rate(&self) -> f64 {
        self.growth_rate
    }

    /// Index of the inflection point `x0`
    pub fn inflection(&self) -> f64 {
        self.inflection
    }
}

impl GrowthCurveAdapter {
    pub const MIN_DATA_POINTS: usize = 6;

    pub fn new(config: GrowthCurveConfig) -> Self {
        Self { config }
    }

    fn non_convergence(reason: String) -> ForecastError {
        ForecastError::FitNonConvergence {
            model: ModelKind::GrowthCurve.to_string(),
            reason,
        }
    }

    pub(crate) fn fit(&self, view: &ModelSeries) -> Result<FittedGrowthCurve> {
        let n = view.values.len();
        let scale = view.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(scale > 0.0) {
            return Err(Self::non_convergence(
                "logistic growth needs positive values".to_string(),
            ));
        }

        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let y: Vec<f64> = view.values.iter().map(|v| v / scale).collect();
        let x_range = ((n - 1) as f64).max(1.0);

        let initial = Vector3::new((0.1f64).ln(), 4.0 / x_range, x_range / 2.0);
        let problem = LogisticProblem {
            params: initial,
            y_max: 1.0,
            x: x.clone(),
            y: y.clone(),
        };

        let (result, report) = LevenbergMarquardt::new()
            .with_patience(self.config.patience)
            .minimize(problem);

        if !report.termination.was_successful() {
            return Err(Self::non_convergence(format!(
                "solver stopped with {:?}",
                report.termination
            )));
        }

        let l = result.capacity();
        let k = result.params[1];
        let x0 = result.params[2];

        if !(l.is_finite() && k.is_finite() && x0.is_finite()) {
            return Err(Self::non_convergence("non-finite parameters".to_string()));
        }
        if k.abs() < MIN_GROWTH_RATE {
            return Err(Self::non_convergence(format!("flat growth rate {:e}", k)));
        }
        let span = MAX_INFLECTION_SPAN * n as f64;
        if x0 < -span || x0 > x_range + span {
            return Err(Self::non_convergence(format!(
                "inflection point {:.1} is implausibly far from the data",
                x0
            )));
        }

        let df = n.saturating_sub(3).max(1) as f64;
        let ss_res: f64 = x
            .iter()
            .zip(&y)
            .map(|(&xi, &yi)| (yi - curve_gradient(l, k, x0, xi).0).powi(2))
            .sum();
        let s_sq = ss_res / df;

        // Parameter covariance on [L, k, x0]; singular designs fall back to
        // residual-only variance
        let mut design = OMatrix::<f64, Dyn, U3>::zeros(n);
        for (i, &xi) in x.iter().enumerate() {
            let (_, grad) = curve_gradient(l, k, x0, xi);
            design.set_row(i, &grad.transpose());
        }
        let covariance = (design.transpose() * &design)
            .try_inverse()
            .map(|inv| inv * s_sq)
            .filter(|cov| cov.iter().all(|c| c.is_finite()));

        Ok(FittedGrowthCurve {
            capacity: l * scale,
            growth_rate: k,
            inflection: x0,
            observed: n,
            residual_variance: s_sq * scale * scale,
            covariance: covariance.map(|c| {
                // rescale the L row and column back to original units
                let s = Matrix3::from_diagonal(&Vector3::new(scale, 1.0, 1.0));
                s * c * s
            }),
        })
    }
}

impl Projection for FittedGrowthCurve {
    fn project(&self, steps: usize) -> Result<Vec<(f64, f64)>> {
        Ok((1..=steps)
            .map(|h| {
                let x = (self.observed - 1 + h) as f64;
                let (value, grad) =
                    curve_gradient(self.capacity, self.growth_rate, self.inflection, x);
                let parameter_var = self
                    .covariance
                    .as_ref()
                    .map_or(0.0, |cov| (grad.transpose() * cov * grad)[(0, 0)].max(0.0));
                (value, parameter_var + self.residual_variance)
            })
            .collect())
    }

    fn residual_variance(&self) -> f64 {
        self.residual_variance
    }
}
