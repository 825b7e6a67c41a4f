//! Model selection (1 vs 2 vs 3 exponential components) using BIC with guardrails.
//!
//! Each candidate is fitted with LMA starting from the RLD estimate, then scored:
//! - BIC = χ² + k · ln(n)   (χ² stands in for -2 ln L up to a constant)
//!
//! Selection rules:
//! 1. Exclude underdetermined models: require `n >= k + 5`
//! 2. Choose the model with minimum BIC
//! 3. If a simpler model is within 2 BIC units of the best, pick the simpler model

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::domain::{FitSettings, LmaFit, ModelKind, RldFit, Transient};
use crate::error::{FitError, FitResult};
use crate::fit::lma::lma_fit;
use crate::fit::noise::Noise;
use crate::fit::rld::rld_fit;
use crate::math::Instrument;

/// Minimum number of extra observations beyond parameter count.
const MIN_N_BUFFER: usize = 5;

/// Candidate models in order of increasing complexity.
const CANDIDATES: [ModelKind; 3] = [ModelKind::Exp1, ModelKind::Exp2, ModelKind::Exp3];

/// One fitted candidate.
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub kind: ModelKind,
    pub params: Vec<f64>,
    pub fitted: Vec<f64>,
    pub lma: LmaFit,
    pub bic: f64,
}

/// Output of fitting + selection.
#[derive(Debug, Clone)]
pub struct FitSelection {
    pub rld: RldFit,
    pub best: ModelFit,
    /// Fits for all attempted models (after guardrails), simplest first.
    pub fits: Vec<ModelFit>,
    /// Any models that were skipped and why (for diagnostics).
    pub skipped: Vec<(ModelKind, String)>,
}

/// Fit every candidate model and select the best one.
pub fn fit_and_select(
    transient: &Transient<'_>,
    irf: Option<&Instrument>,
    noise: &Noise,
    settings: &FitSettings,
) -> FitResult<FitSelection> {
    let n = transient.len();
    let mut rld_curve = vec![0.0; n];
    let rld = rld_fit(transient, irf, noise, settings, &mut rld_curve)?;

    let outcomes: Vec<(ModelKind, Result<ModelFit, String>)> = CANDIDATES
        .par_iter()
        .map(|&kind| {
            let k = kind.param_len();
            if n < k + MIN_N_BUFFER {
                return (
                    kind,
                    Err(format!(
                        "Underdetermined: n={n} < k+{MIN_N_BUFFER}={}",
                        k + MIN_N_BUFFER
                    )),
                );
            }

            let mut params = initial_guess(kind, &rld);
            let free = vec![true; params.len()];
            let mut fitted = vec![0.0; n];
            let outcome = lma_fit(transient, irf, noise, &mut params, &free, settings, &mut fitted)
                .map(|lma| ModelFit {
                    kind,
                    bic: bic(n, lma.chi_square, k),
                    params,
                    fitted,
                    lma,
                })
                .map_err(|e| e.to_string());
            (kind, outcome)
        })
        .collect();

    let mut fits = Vec::new();
    let mut skipped = Vec::new();
    for (kind, outcome) in outcomes {
        match outcome {
            Ok(fit) => {
                debug!(model = kind.display_name(), chi_square = fit.lma.chi_square, bic = fit.bic, "candidate fitted");
                fits.push(fit);
            }
            Err(reason) => {
                warn!(model = kind.display_name(), %reason, "candidate skipped");
                skipped.push((kind, reason));
            }
        }
    }

    if fits.is_empty() {
        return Err(FitError::InsufficientData(
            "no candidate model could be fitted".into(),
        ));
    }

    let best = select_by_bic(&fits);
    Ok(FitSelection {
        rld,
        best,
        fits,
        skipped,
    })
}

/// LMA starting point for `kind` derived from an RLD estimate.
///
/// Multi-component guesses split the amplitude evenly and spread the lifetimes
/// around the RLD lifetime.
pub fn initial_guess(kind: ModelKind, rld: &RldFit) -> Vec<f64> {
    let (z, a, tau) = (rld.z, rld.a, rld.tau);
    match kind {
        ModelKind::Exp1 => vec![z, a, tau],
        ModelKind::Exp2 => vec![z, a / 2.0, tau / 2.0, a / 2.0, tau * 2.0],
        ModelKind::Exp3 => vec![z, a / 3.0, tau / 3.0, a / 3.0, tau, a / 3.0, tau * 3.0],
        ModelKind::Stretched => vec![z, a, tau, 1.0],
    }
}

fn bic(n: usize, chi_square: f64, k: usize) -> f64 {
    chi_square + (k as f64) * (n as f64).ln()
}

fn select_by_bic(fits: &[ModelFit]) -> ModelFit {
    // Find minimum BIC.
    let mut best = &fits[0];
    for f in &fits[1..] {
        if f.bic < best.bic {
            best = f;
        }
    }

    let best_bic = best.bic;

    // Prefer simplicity if within 2 BIC points.
    for kind in CANDIDATES {
        if let Some(f) = fits.iter().find(|f| f.kind == kind) {
            if f.bic <= best_bic + 2.0 {
                return f.clone();
            }
        }
    }

    best.clone()
}
