//! Noise models: per-sample variances, chi-square and LMA weighting terms.
//!
//! For every model except `Mle` the objective is
//!
//! ```text
//! χ² = Σ (y_k - f_k)² / s_k²
//! ```
//!
//! `Mle` replaces it by the Poisson deviance `2 Σ (f_k - y_k) - 2 Σ y_k ln(f_k / y_k)`,
//! which is zero for a perfect fit and reduces to χ² for large counts. The
//! deviance is only defined for a positive mean, so a curve that dips to zero or
//! below scores `+∞`.

use crate::domain::{NoiseModel, Transient};
use crate::error::{FitError, FitResult};

/// Variance floor for Poisson statistics (low counts are far from Gaussian).
const POISSON_FLOOR: f64 = 15.0;
/// Variance floor when the variance tracks the fitted curve.
const GAUSSIAN_FLOOR: f64 = 1.0;
/// Smallest fitted value used in the MLE curvature weight `1 / f`.
const MLE_FIT_FLOOR: f64 = 1e-10;

/// Noise model resolved against a fit window.
#[derive(Debug, Clone)]
pub struct Noise {
    model: NoiseModel,
    /// Fixed variances (window-relative) for models that do not depend on the fit.
    fixed_var: Option<Vec<f64>>,
}

impl Noise {
    /// Validate `sig` for `model` and precompute what does not depend on the fit.
    ///
    /// `sig` is indexed like the transient (absolute sample index).
    pub fn new(model: NoiseModel, sig: Option<&[f64]>, transient: &Transient<'_>) -> FitResult<Self> {
        let n = transient.len();
        let fixed_var = match model {
            NoiseModel::Const => {
                let s = match sig.and_then(|s| s.first()) {
                    Some(&s) => s,
                    None => 1.0,
                };
                if !(s.is_finite() && s > 0.0) {
                    return Err(FitError::InvalidNoise(format!(
                        "constant sigma must be finite and > 0, got {s}"
                    )));
                }
                Some(vec![s * s; n])
            }
            NoiseModel::Given => {
                let Some(sig) = sig else {
                    return Err(FitError::InvalidNoise(
                        "per-sample sigma required for the given noise model".into(),
                    ));
                };
                if sig.len() < transient.fit_end {
                    return Err(FitError::InvalidNoise(format!(
                        "sigma has {} samples, fit window ends at {}",
                        sig.len(),
                        transient.fit_end
                    )));
                }
                let window = &sig[transient.fit_start..transient.fit_end];
                if let Some(k) = window.iter().position(|s| !(s.is_finite() && *s > 0.0)) {
                    return Err(FitError::InvalidNoise(format!(
                        "sigma at index {} must be finite and > 0",
                        transient.fit_start + k
                    )));
                }
                Some(window.iter().map(|s| s * s).collect())
            }
            NoiseModel::PoissonData => Some(
                transient
                    .window()
                    .iter()
                    .map(|&y| y.max(POISSON_FLOOR))
                    .collect(),
            ),
            NoiseModel::PoissonFit | NoiseModel::GaussianFit | NoiseModel::Mle => None,
        };

        Ok(Self { model, fixed_var })
    }

    /// Variance of window sample `k`, given the current fitted value `f`.
    pub fn variance(&self, k: usize, y: f64, f: f64) -> f64 {
        if let Some(var) = &self.fixed_var {
            return var[k];
        }
        match self.model {
            NoiseModel::PoissonFit => f.max(POISSON_FLOOR),
            NoiseModel::GaussianFit => f.max(GAUSSIAN_FLOOR),
            // Neyman-style variance; only used where a quadratic weight is needed.
            _ => y.max(GAUSSIAN_FLOOR),
        }
    }

    /// Least-squares weights `1 / s_k²` for the given fitted curve.
    pub fn weights(&self, y: &[f64], fitted: &[f64]) -> Vec<f64> {
        y.iter()
            .zip(fitted.iter())
            .enumerate()
            .map(|(k, (&yk, &fk))| 1.0 / self.variance(k, yk, fk))
            .collect()
    }

    /// Objective value for `fitted` against the window samples `y`.
    pub fn chi_square(&self, y: &[f64], fitted: &[f64]) -> f64 {
        match self.model {
            NoiseModel::Mle => y
                .iter()
                .zip(fitted.iter())
                .map(|(&yk, &fk)| poisson_deviance(yk, fk))
                .sum(),
            _ => y
                .iter()
                .zip(fitted.iter())
                .enumerate()
                .map(|(k, (&yk, &fk))| {
                    let r = yk - fk;
                    r * r / self.variance(k, yk, fk)
                })
                .sum(),
        }
    }

    /// LMA terms for sample `k`: `(w, g)` such that the curvature gains
    /// `w · J_k J_kᵀ` and the gradient gains `g · J_k`.
    pub fn lm_terms(&self, k: usize, y: f64, f: f64) -> (f64, f64) {
        match self.model {
            // Expected (Fisher) information.
            NoiseModel::Mle => {
                let f = f.max(MLE_FIT_FLOOR);
                (1.0 / f, (y.max(0.0) - f) / f)
            }
            _ => {
                let inv_var = 1.0 / self.variance(k, y, f);
                (inv_var, (y - f) * inv_var)
            }
        }
    }
}

/// Deviance contribution of one sample; `+∞` outside the Poisson domain.
fn poisson_deviance(y: f64, f: f64) -> f64 {
    if f < 0.0 || (f == 0.0 && y > 0.0) || !f.is_finite() {
        return f64::INFINITY;
    }
    let log_term = if y > 0.0 { y * (f / y).ln() } else { 0.0 };
    2.0 * (f - y) - 2.0 * log_term
}

/// Reduced chi-square `χ² / (n - n_free)`; `None` without degrees of freedom.
pub fn reduced_chi_square(chi_square: f64, n: usize, n_free: usize) -> Option<f64> {
    (n > n_free).then(|| chi_square / (n - n_free) as f64)
}
