//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be:
//!
//! - built cheaply at the C boundary from borrowed buffers
//! - passed through the engines without copying sample data
//! - exported to JSON (`FitSummary`) and reloaded later for plotting

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{FitError, FitResult};

/// How per-sample uncertainty is obtained.
///
/// The discriminants are the integer selectors used by C callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[repr(i32)]
pub enum NoiseModel {
    /// One sigma shared by every sample (`sig[0]`, or 1 when absent).
    Const = 0,
    /// Caller supplies a sigma per sample.
    Given = 1,
    /// Poisson statistics estimated from the data: `s^2 = max(y, 15)`.
    PoissonData = 2,
    /// Poisson statistics estimated from the fit: `s^2 = max(f, 15)`.
    PoissonFit = 3,
    /// Gaussian variance equal to the fit: `s^2 = max(f, 1)`.
    GaussianFit = 4,
    /// Poisson maximum likelihood (deviance instead of chi-square).
    Mle = 5,
}

impl NoiseModel {
    pub const ALL: [NoiseModel; 6] = [
        NoiseModel::Const,
        NoiseModel::Given,
        NoiseModel::PoissonData,
        NoiseModel::PoissonFit,
        NoiseModel::GaussianFit,
        NoiseModel::Mle,
    ];

    /// Resolve a C-side selector.
    pub fn from_code(code: i32) -> FitResult<Self> {
        NoiseModel::ALL
            .into_iter()
            .find(|m| m.code() == code)
            .ok_or_else(|| FitError::InvalidNoise(format!("unknown noise selector {code}")))
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn display_name(self) -> &'static str {
        match self {
            NoiseModel::Const => "constant",
            NoiseModel::Given => "given",
            NoiseModel::PoissonData => "poisson (data)",
            NoiseModel::PoissonFit => "poisson (fit)",
            NoiseModel::GaussianFit => "gaussian (fit)",
            NoiseModel::Mle => "poisson MLE",
        }
    }
}

/// Decay model fitted by the engines.
///
/// Parameter layouts:
/// - `Exp1`: `[Z, A1, T1]`
/// - `Exp2`: `[Z, A1, T1, A2, T2]`
/// - `Exp3`: `[Z, A1, T1, A2, T2, A3, T3]`
/// - `Stretched`: `[Z, A, T, H]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Exp1,
    Exp2,
    Exp3,
    Stretched,
}

impl ModelKind {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Exp1 => "single exponential",
            ModelKind::Exp2 => "double exponential",
            ModelKind::Exp3 => "triple exponential",
            ModelKind::Stretched => "stretched exponential",
        }
    }

    /// Length of the parameter vector.
    pub fn param_len(self) -> usize {
        match self {
            ModelKind::Exp1 => 3,
            ModelKind::Exp2 => 5,
            ModelKind::Exp3 => 7,
            ModelKind::Stretched => 4,
        }
    }

    /// Model implied by a parameter vector length (`n_param` at the C boundary).
    pub fn from_param_len(n: usize) -> Option<Self> {
        match n {
            3 => Some(ModelKind::Exp1),
            4 => Some(ModelKind::Stretched),
            5 => Some(ModelKind::Exp2),
            7 => Some(ModelKind::Exp3),
            _ => None,
        }
    }

    /// Number of exponential components (the stretched model counts as one).
    pub fn components(self) -> usize {
        match self {
            ModelKind::Exp1 | ModelKind::Stretched => 1,
            ModelKind::Exp2 => 2,
            ModelKind::Exp3 => 3,
        }
    }

    pub fn param_names(self) -> Vec<&'static str> {
        match self {
            ModelKind::Exp1 => vec!["Z", "A1", "T1"],
            ModelKind::Exp2 => vec!["Z", "A1", "T1", "A2", "T2"],
            ModelKind::Exp3 => vec!["Z", "A1", "T1", "A2", "T2", "A3", "T3"],
            ModelKind::Stretched => vec!["Z", "A", "T", "H"],
        }
    }
}

/// A measured transient plus the window to fit.
///
/// `y` is the whole transient; the window is `y[fit_start..fit_end]` and window
/// sample `k` sits at `t = k * x_inc`.
#[derive(Debug, Clone, Copy)]
pub struct Transient<'a> {
    pub x_inc: f64,
    pub y: &'a [f64],
    pub fit_start: usize,
    pub fit_end: usize,
}

impl<'a> Transient<'a> {
    pub fn new(x_inc: f64, y: &'a [f64], fit_start: usize, fit_end: usize) -> FitResult<Self> {
        if !(x_inc.is_finite() && x_inc > 0.0) {
            return Err(FitError::InvalidWindow(format!(
                "x_inc must be finite and > 0, got {x_inc}"
            )));
        }
        if fit_start >= fit_end {
            return Err(FitError::InvalidWindow(format!(
                "fit_start ({fit_start}) must be < fit_end ({fit_end})"
            )));
        }
        if fit_end > y.len() {
            return Err(FitError::InvalidWindow(format!(
                "fit_end ({fit_end}) exceeds transient length ({})",
                y.len()
            )));
        }
        if let Some(k) = y[fit_start..fit_end].iter().position(|v| !v.is_finite()) {
            return Err(FitError::InvalidInput(format!(
                "non-finite sample at index {}",
                fit_start + k
            )));
        }
        Ok(Self {
            x_inc,
            y,
            fit_start,
            fit_end,
        })
    }

    /// Samples inside the fit window.
    pub fn window(&self) -> &'a [f64] {
        &self.y[self.fit_start..self.fit_end]
    }

    pub fn len(&self) -> usize {
        self.fit_end - self.fit_start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Window-relative sample times.
    pub fn times(&self) -> Vec<f64> {
        (0..self.len()).map(|k| k as f64 * self.x_inc).collect()
    }
}

/// Engine stopping rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitSettings {
    /// Stop once chi-square drops to or below this value.
    pub chi_square_target: f64,
    /// LMA: stop after two consecutive accepted steps that each improve chi-square by less than this.
    pub chi_square_delta: f64,
    /// LMA iteration cap.
    pub max_iterations: usize,
    /// RLD refinement pass cap.
    pub max_refits: usize,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            chi_square_target: 0.0,
            chi_square_delta: 1e-6,
            max_iterations: 100,
            max_refits: 10,
        }
    }
}

/// Outcome of the RLD estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RldFit {
    pub z: f64,
    pub a: f64,
    pub tau: f64,
    pub chi_square: f64,
    /// Lifetime refinement passes performed after the closed-form estimate.
    pub refits: usize,
}

impl RldFit {
    /// Parameters in `Exp1` layout, handy as an LMA starting point.
    pub fn params(&self) -> [f64; 3] {
        [self.z, self.a, self.tau]
    }
}

/// Why the LMA loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Convergence {
    TargetReached,
    DeltaReached,
    /// No downhill step left after a negligible last improvement.
    Converged,
    Stalled,
    MaxIterations,
    NoFreeParameters,
}

/// Outcome of the LMA engine. Refined parameters are written back in place.
#[derive(Debug, Clone, PartialEq)]
pub struct LmaFit {
    pub chi_square: f64,
    pub reduced_chi_square: Option<f64>,
    pub iterations: usize,
    pub status: Convergence,
    /// Standard errors per parameter (0 for fixed ones); `None` when the curvature matrix is singular.
    pub errors: Option<Vec<f64>>,
}

/// Which engine produced a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Rld,
    Lma,
}

/// Fit quality diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub chi_square: f64,
    pub reduced_chi_square: Option<f64>,
    pub n: usize,
    pub n_free: usize,
    pub iterations: usize,
    pub status: Option<Convergence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitCurve {
    pub t: Vec<f64>,
    pub y: Vec<f64>,
    pub fitted: Vec<f64>,
}

impl FitCurve {
    pub fn residuals(&self) -> Vec<f64> {
        self.y
            .iter()
            .zip(self.fitted.iter())
            .map(|(y, f)| y - f)
            .collect()
    }
}

/// A saved fit (JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub tool: String,
    pub generated: DateTime<Utc>,
    pub engine: Engine,
    pub model: ModelKind,
    pub noise: NoiseModel,
    pub x_inc: f64,
    pub fit_start: usize,
    pub fit_end: usize,
    pub param_names: Vec<String>,
    pub params: Vec<f64>,
    pub free: Vec<bool>,
    pub errors: Option<Vec<f64>>,
    pub quality: FitQuality,
    pub curve: FitCurve,
}
