//! Levenberg-Marquardt fitting over an arbitrary parameter vector.
//!
//! Given a model (selected by the parameter count), the noise model and a
//! free/fixed mask, we iterate:
//!
//! - build the curvature `α = Σ w_k J_k J_kᵀ` and gradient `β = Σ g_k J_k`
//!   over the free parameters (`w`, `g` come from `Noise::lm_terms`)
//! - solve `(α + λ diag(α)) δ = β`
//! - accept the step iff the objective decreases (`λ /= 10`), otherwise `λ *= 10`
//!
//! Fixed parameters are never touched. The loop ends on the chi-square target,
//! on two consecutive accepted steps smaller than the chi-square delta, when `λ`
//! blows up, or at the iteration cap. A `λ` blow-up after a small last
//! improvement means no downhill step is left and is reported as `Converged`;
//! otherwise (or when the damped system cannot be solved) it is `Stalled`.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace};

use crate::domain::{Convergence, FitSettings, LmaFit, ModelKind, Transient};
use crate::error::{FitError, FitResult};
use crate::fit::noise::{Noise, reduced_chi_square};
use crate::math::Instrument;
use crate::models::DecayModel;

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e10;
/// Consecutive sub-delta improvements required to declare convergence.
const QUIET_STEPS: usize = 2;
/// Relative improvement below which a `λ` blow-up counts as convergence.
const MINIMUM_REL_IMPROVEMENT: f64 = 1e-6;

/// Refine `params` in place (free entries only) and write the fitted window into `fitted`.
pub fn lma_fit(
    transient: &Transient<'_>,
    irf: Option<&Instrument>,
    noise: &Noise,
    params: &mut [f64],
    free: &[bool],
    settings: &FitSettings,
    fitted: &mut [f64],
) -> FitResult<LmaFit> {
    let Some(kind) = ModelKind::from_param_len(params.len()) else {
        return Err(FitError::InvalidParameters(format!(
            "{} parameters do not match any model (expected 3, 4, 5 or 7)",
            params.len()
        )));
    };
    if free.len() != params.len() {
        return Err(FitError::InvalidParameters(format!(
            "free mask has {} entries, parameter vector has {}",
            free.len(),
            params.len()
        )));
    }
    let n = transient.len();
    if fitted.len() != n {
        return Err(FitError::InvalidInput(format!(
            "fitted buffer has {} samples, fit window has {n}",
            fitted.len()
        )));
    }

    let free_idx: Vec<usize> = (0..params.len()).filter(|&i| free[i]).collect();
    if n < free_idx.len() {
        return Err(FitError::InsufficientData(format!(
            "{n} samples cannot determine {} free parameters",
            free_idx.len()
        )));
    }

    let y = transient.window();
    let times = transient.times();
    let model = DecayModel::new(kind, &times, irf);

    if !model.eval(params, fitted) {
        return Err(FitError::InvalidParameters(format!(
            "initial parameters {params:?} do not describe a valid {}",
            kind.display_name()
        )));
    }
    let mut chi_square = noise.chi_square(y, fitted);
    if !chi_square.is_finite() {
        return Err(FitError::InvalidParameters(
            "initial parameters give a non-finite chi-square".into(),
        ));
    }

    if free_idx.is_empty() {
        return Ok(LmaFit {
            chi_square,
            reduced_chi_square: reduced_chi_square(chi_square, n, 0),
            iterations: 0,
            status: Convergence::NoFreeParameters,
            errors: Some(vec![0.0; params.len()]),
        });
    }

    let mut scratch = vec![0.0; n];
    let mut jac = vec![vec![0.0; n]; params.len()];
    let (mut alpha, mut beta) =
        normal_equations(&model, noise, y, params, &free_idx, &mut scratch, &mut jac).ok_or_else(
            || FitError::InvalidParameters("non-finite Jacobian at initial parameters".into()),
        )?;

    let mut trial = params.to_vec();
    let mut trial_fit = vec![0.0; n];
    let mut lambda = LAMBDA_INIT;
    let mut iterations = 0;
    let mut quiet = 0;
    let mut last_improvement: Option<f64> = None;
    let mut status = Convergence::MaxIterations;

    loop {
        if chi_square <= settings.chi_square_target {
            status = Convergence::TargetReached;
            break;
        }
        if iterations >= settings.max_iterations {
            break;
        }
        iterations += 1;

        let Some(step) = solve_damped(&alpha, &beta, lambda) else {
            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                status = Convergence::Stalled;
                break;
            }
            continue;
        };

        trial.copy_from_slice(params);
        for (j, &p) in free_idx.iter().enumerate() {
            trial[p] += step[j];
        }
        let trial_chi = if model.eval(&trial, &mut trial_fit) {
            noise.chi_square(y, &trial_fit)
        } else {
            f64::INFINITY
        };

        if trial_chi.is_finite() && trial_chi < chi_square {
            let improvement = chi_square - trial_chi;
            last_improvement = Some(improvement);
            params.copy_from_slice(&trial);
            fitted.copy_from_slice(&trial_fit);
            chi_square = trial_chi;
            lambda = (lambda * 0.1).max(LAMBDA_MIN);
            trace!(iterations, chi_square, lambda, "accepted step");

            (alpha, beta) =
                normal_equations(&model, noise, y, params, &free_idx, &mut scratch, &mut jac)
                    .ok_or_else(|| FitError::Singular("non-finite Jacobian during fit".into()))?;

            if improvement < settings.chi_square_delta {
                quiet += 1;
                if quiet >= QUIET_STEPS {
                    status = Convergence::DeltaReached;
                    break;
                }
            } else {
                quiet = 0;
            }
        } else {
            lambda *= 10.0;
            trace!(iterations, trial_chi, lambda, "rejected step");
            if lambda > LAMBDA_MAX {
                let tolerance = settings
                    .chi_square_delta
                    .max(chi_square * MINIMUM_REL_IMPROVEMENT);
                status = match last_improvement {
                    Some(improvement) if improvement > tolerance => Convergence::Stalled,
                    _ => Convergence::Converged,
                };
                break;
            }
        }
    }

    let errors = standard_errors(&alpha, &free_idx, params.len());
    debug!(
        model = kind.display_name(),
        chi_square, iterations, ?status, "LMA fit done"
    );

    Ok(LmaFit {
        chi_square,
        reduced_chi_square: reduced_chi_square(chi_square, n, free_idx.len()),
        iterations,
        status,
        errors,
    })
}

fn normal_equations(
    model: &DecayModel<'_>,
    noise: &Noise,
    y: &[f64],
    params: &[f64],
    free_idx: &[usize],
    fitted: &mut [f64],
    jac: &mut [Vec<f64>],
) -> Option<(DMatrix<f64>, DVector<f64>)> {
    if !model.eval_with_jacobian(params, fitted, jac) {
        return None;
    }

    let m = free_idx.len();
    let mut alpha = DMatrix::<f64>::zeros(m, m);
    let mut beta = DVector::<f64>::zeros(m);
    for k in 0..y.len() {
        let (w, g) = noise.lm_terms(k, y[k], fitted[k]);
        for (a, &pa) in free_idx.iter().enumerate() {
            let ja = jac[pa][k];
            beta[a] += g * ja;
            for (b, &pb) in free_idx.iter().enumerate().take(a + 1) {
                alpha[(a, b)] += w * ja * jac[pb][k];
            }
        }
    }
    for a in 0..m {
        for b in 0..a {
            alpha[(b, a)] = alpha[(a, b)];
        }
    }

    (alpha.iter().all(|v| v.is_finite()) && beta.iter().all(|v| v.is_finite()))
        .then_some((alpha, beta))
}

/// Solve the damped normal equations; Cholesky first, LU as a fallback.
fn solve_damped(alpha: &DMatrix<f64>, beta: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let mut damped = alpha.clone();
    for i in 0..damped.nrows() {
        damped[(i, i)] *= 1.0 + lambda;
    }

    if let Some(chol) = damped.clone().cholesky() {
        let step = chol.solve(beta);
        if step.iter().all(|v| v.is_finite()) {
            return Some(step);
        }
    }
    damped
        .lu()
        .solve(beta)
        .filter(|step| step.iter().all(|v| v.is_finite()))
}

/// Square roots of the covariance diagonal, expanded to the full parameter vector.
fn standard_errors(alpha: &DMatrix<f64>, free_idx: &[usize], n_param: usize) -> Option<Vec<f64>> {
    let covariance = alpha.clone().try_inverse()?;
    let mut errors = vec![0.0; n_param];
    for (j, &p) in free_idx.iter().enumerate() {
        let var = covariance[(j, j)];
        if !(var.is_finite() && var >= 0.0) {
            return None;
        }
        errors[p] = var.sqrt();
    }
    Some(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SimulationConfig, simulate};
    use crate::domain::NoiseModel;
    use crate::fit::rld_fit;

    const DT: f64 = 0.05;

    fn synth(kind: ModelKind, params: &[f64], n: usize) -> Vec<f64> {
        let times: Vec<f64> = (0..n).map(|k| k as f64 * DT).collect();
        DecayModel::new(kind, &times, None).curve(params).unwrap()
    }

    fn settings() -> FitSettings {
        FitSettings {
            chi_square_target: 0.0,
            chi_square_delta: 1e-12,
            max_iterations: 200,
            max_refits: 0,
        }
    }

    fn assert_close(got: &[f64], want: &[f64], rel: f64) {
        for (i, (g, w)) in got.iter().zip(want.iter()).enumerate() {
            assert!(
                (g - w).abs() <= rel * w.abs().max(1.0),
                "param {i}: got {g}, want {w} (all: {got:?})"
            );
        }
    }

    #[test]
    fn converges_on_single_exponential() {
        let truth = [20.0, 1000.0, 2.0];
        let y = synth(ModelKind::Exp1, &truth, 200);
        let t = Transient::new(DT, &y, 0, y.len()).unwrap();
        let noise = Noise::new(NoiseModel::PoissonData, None, &t).unwrap();
        let mut params = [0.0, 700.0, 3.0];
        let mut fitted = vec![0.0; t.len()];

        let fit = lma_fit(&t, None, &noise, &mut params, &[true; 3], &settings(), &mut fitted).unwrap();
        assert_close(&params, &truth, 1e-6);
        assert!(fit.iterations > 0);
        assert!(fit.chi_square < 1e-6);
        let errors = fit.errors.unwrap();
        assert!(errors.iter().all(|e| *e > 0.0));
    }

    #[test]
    fn fixed_parameters_are_left_alone() {
        let truth = [20.0, 1000.0, 2.0];
        let y = synth(ModelKind::Exp1, &truth, 200);
        let t = Transient::new(DT, &y, 0, y.len()).unwrap();
        let noise = Noise::new(NoiseModel::Const, None, &t).unwrap();
        let mut params = [20.0, 800.0, 2.5];
        let mut fitted = vec![0.0; t.len()];

        let fit = lma_fit(
            &t,
            None,
            &noise,
            &mut params,
            &[false, true, true],
            &settings(),
            &mut fitted,
        )
        .unwrap();
        assert_eq!(params[0], 20.0);
        assert_close(&params, &truth, 1e-6);
        assert_eq!(fit.errors.unwrap()[0], 0.0);
    }

    #[test]
    fn converges_on_double_exponential() {
        let truth = [10.0, 600.0, 0.8, 400.0, 3.0];
        let y = synth(ModelKind::Exp2, &truth, 250);
        let t = Transient::new(DT, &y, 0, y.len()).unwrap();
        let noise = Noise::new(NoiseModel::PoissonData, None, &t).unwrap();
        let mut params = [0.0, 500.0, 0.5, 500.0, 4.0];
        let mut fitted = vec![0.0; t.len()];

        lma_fit(&t, None, &noise, &mut params, &[true; 5], &settings(), &mut fitted).unwrap();
        assert_close(&params, &truth, 1e-4);
    }

    #[test]
    fn mle_converges_on_stretched_exponential() {
        let truth = [5.0, 800.0, 1.2, 1.3];
        let y = synth(ModelKind::Stretched, &truth, 200);
        let t = Transient::new(DT, &y, 0, y.len()).unwrap();
        let noise = Noise::new(NoiseModel::Mle, None, &t).unwrap();
        let mut params = [0.0, 700.0, 1.0, 1.1];
        let mut fitted = vec![0.0; t.len()];

        let fit = lma_fit(&t, None, &noise, &mut params, &[true; 4], &settings(), &mut fitted).unwrap();
        assert_close(&params, &truth, 1e-3);
        assert!(fit.chi_square < 1e-6, "deviance {}", fit.chi_square);
    }

    #[test]
    fn no_free_parameters_only_evaluates() {
        let truth = [0.0, 100.0, 1.0];
        let y = synth(ModelKind::Exp1, &truth, 20);
        let t = Transient::new(DT, &y, 0, y.len()).unwrap();
        let noise = Noise::new(NoiseModel::Const, None, &t).unwrap();
        let mut params = truth;
        let mut fitted = vec![0.0; 20];

        let fit = lma_fit(&t, None, &noise, &mut params, &[false; 3], &settings(), &mut fitted).unwrap();
        assert_eq!(fit.iterations, 0);
        assert_eq!(fit.status, Convergence::NoFreeParameters);
        assert!((fitted[0] - 100.0).abs() < 1e-12);
    }

    #[test]
    fn target_already_met_skips_iterations() {
        let y = synth(ModelKind::Exp1, &[0.0, 100.0, 1.0], 20);
        let t = Transient::new(DT, &y, 0, y.len()).unwrap();
        let noise = Noise::new(NoiseModel::Const, None, &t).unwrap();
        let mut params = [0.0, 90.0, 1.1];
        let mut fitted = vec![0.0; 20];
        let settings = FitSettings {
            chi_square_target: 1e12,
            ..settings()
        };

        let fit = lma_fit(&t, None, &noise, &mut params, &[true; 3], &settings, &mut fitted).unwrap();
        assert_eq!(fit.iterations, 0);
        assert_eq!(fit.status, Convergence::TargetReached);
        assert_eq!(params, [0.0, 90.0, 1.1]);
    }

    #[test]
    fn invalid_parameter_vectors_are_rejected() {
        let y = synth(ModelKind::Exp1, &[0.0, 100.0, 1.0], 20);
        let t = Transient::new(DT, &y, 0, y.len()).unwrap();
        let noise = Noise::new(NoiseModel::Const, None, &t).unwrap();
        let mut fitted = vec![0.0; 20];

        let mut six = [1.0; 6];
        assert!(matches!(
            lma_fit(&t, None, &noise, &mut six, &[true; 6], &settings(), &mut fitted),
            Err(FitError::InvalidParameters(_))
        ));
        let mut negative_tau = [0.0, 100.0, -1.0];
        assert!(matches!(
            lma_fit(&t, None, &noise, &mut negative_tau, &[true; 3], &settings(), &mut fitted),
            Err(FitError::InvalidParameters(_))
        ));
        let mut params = [0.0, 100.0, 1.0];
        assert!(matches!(
            lma_fit(&t, None, &noise, &mut params, &[true; 2], &settings(), &mut fitted),
            Err(FitError::InvalidParameters(_))
        ));
    }

    /// Exp1 `[10, 2000, 2]` on 256 bins with seeded Poisson counts: `(counts, clean)`.
    fn poisson_counts(seed: u64) -> (Vec<f64>, Vec<f64>) {
        let sim = simulate(&SimulationConfig {
            model: ModelKind::Exp1,
            params: vec![10.0, 2000.0, 2.0],
            bins: 256,
            x_inc: DT,
            irf_fwhm: None,
            irf_center: None,
            poisson: true,
            seed,
        })
        .unwrap();
        (sim.counts, sim.clean)
    }

    fn noisy_settings() -> FitSettings {
        FitSettings {
            max_iterations: 200,
            ..FitSettings::default()
        }
    }

    #[test]
    fn mle_reaches_the_optimum_from_a_distant_start() {
        let (y, clean) = poisson_counts(7);
        let t = Transient::new(DT, &y, 0, y.len()).unwrap();
        let noise = Noise::new(NoiseModel::Mle, None, &t).unwrap();
        let deviance_at_truth = noise.chi_square(&y, &clean);

        let mut params = [0.0, 1500.0, 3.0];
        let mut fitted = vec![0.0; t.len()];
        let fit = lma_fit(&t, None, &noise, &mut params, &[true; 3], &noisy_settings(), &mut fitted).unwrap();

        assert!(
            fit.chi_square <= deviance_at_truth + 1e-6,
            "deviance {} above the truth's {deviance_at_truth} (params {params:?})",
            fit.chi_square
        );
        assert!(fitted.iter().all(|f| *f > 0.0));
        assert!(
            matches!(fit.status, Convergence::DeltaReached | Convergence::Converged),
            "{:?}",
            fit.status
        );

        let err_tau = fit.errors.unwrap()[2];
        assert!(err_tau > 1e-4, "implausible tau error {err_tau}");
        assert!((params[2] - 2.0).abs() < 5.0 * err_tau, "tau {} +- {err_tau}", params[2]);
    }

    #[test]
    fn refining_rld_on_noisy_counts_never_worsens_the_fit() {
        let (y, _) = poisson_counts(11);
        let sig: Vec<f64> = y.iter().map(|v| v.max(1.0).sqrt()).collect();
        let t = Transient::new(DT, &y, 0, y.len()).unwrap();

        for model in NoiseModel::ALL {
            let noise = Noise::new(model, Some(&sig[..]), &t).unwrap();
            let mut fitted = vec![0.0; t.len()];
            let rld = rld_fit(&t, None, &noise, &FitSettings::default(), &mut fitted).unwrap();
            assert!(rld.chi_square.is_finite(), "{model:?}: RLD chi-square {}", rld.chi_square);

            let mut params = rld.params();
            let fit = lma_fit(&t, None, &noise, &mut params, &[true; 3], &noisy_settings(), &mut fitted)
                .unwrap();
            assert!(
                fit.chi_square <= rld.chi_square,
                "{model:?}: LMA {} worse than RLD {}",
                fit.chi_square,
                rld.chi_square
            );

            // Constant sigma is not the true noise level; rescale by the reduced chi-square.
            let scale = fit.reduced_chi_square.unwrap().sqrt();
            let err_tau = fit.errors.unwrap()[2] * scale;
            assert!(
                (params[2] - 2.0).abs() < 6.0 * err_tau,
                "{model:?}: tau {} +- {err_tau}",
                params[2]
            );
        }
    }

    #[test]
    fn damping_blow_up_at_the_minimum_is_convergence() {
        let (y, _) = poisson_counts(3);
        let t = Transient::new(DT, &y, 0, y.len()).unwrap();
        let noise = Noise::new(NoiseModel::PoissonData, None, &t).unwrap();
        let mut fitted = vec![0.0; t.len()];
        let rld = rld_fit(&t, None, &noise, &FitSettings::default(), &mut fitted).unwrap();

        // A zero delta rules out `DeltaReached`; only rejected steps can end the loop.
        let settings = FitSettings {
            chi_square_delta: 0.0,
            max_iterations: 500,
            ..FitSettings::default()
        };
        let mut params = rld.params();
        let fit = lma_fit(&t, None, &noise, &mut params, &[true; 3], &settings, &mut fitted).unwrap();
        assert_eq!(fit.status, Convergence::Converged);
        assert!(fit.errors.is_some());
    }
}
