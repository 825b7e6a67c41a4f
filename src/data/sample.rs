//! Synthetic decay generation.
//!
//! A transient is the chosen model evaluated on `bins` samples, optionally
//! convolved with a Gaussian instrument response, then optionally replaced by
//! Poisson counts. The RNG is seeded so every run is reproducible.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};

use crate::domain::ModelKind;
use crate::error::AppError;
use crate::math::Instrument;
use crate::models::DecayModel;

/// Gaussian FWHM = 2 sqrt(2 ln 2) sigma.
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_4;
/// IRF support extends this many sigmas past its centre.
const IRF_TAIL_SIGMAS: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub model: ModelKind,
    pub params: Vec<f64>,
    pub bins: usize,
    pub x_inc: f64,
    /// Gaussian IRF width; `None` disables the IRF.
    pub irf_fwhm: Option<f64>,
    /// Gaussian IRF centre (same unit as `x_inc`); defaults to two FWHM.
    pub irf_center: Option<f64>,
    /// Draw Poisson counts around the noiseless curve.
    pub poisson: bool,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct SimulatedTransient {
    pub times: Vec<f64>,
    /// Noiseless model curve (after IRF convolution).
    pub clean: Vec<f64>,
    /// What a detector would report: `clean` or Poisson counts.
    pub counts: Vec<f64>,
    /// Sampled IRF (not normalized), when one was requested.
    pub irf: Option<Vec<f64>>,
}

pub fn simulate(config: &SimulationConfig) -> Result<SimulatedTransient, AppError> {
    if config.bins < 3 {
        return Err(AppError::new(2, "Simulation needs at least 3 bins."));
    }
    if !(config.x_inc.is_finite() && config.x_inc > 0.0) {
        return Err(AppError::new(2, "x-inc must be finite and > 0."));
    }
    if config.params.len() != config.model.param_len() {
        return Err(AppError::new(
            2,
            format!(
                "{} takes {} parameters ({}), got {}.",
                config.model.display_name(),
                config.model.param_len(),
                config.model.param_names().join(","),
                config.params.len()
            ),
        ));
    }

    let irf_samples = match config.irf_fwhm {
        Some(fwhm) => {
            let center = config.irf_center.unwrap_or(2.0 * fwhm);
            Some(gaussian_irf(config.x_inc, center, fwhm, config.bins)?)
        }
        None => None,
    };
    let irf = irf_samples
        .as_deref()
        .map(Instrument::new)
        .transpose()
        .map_err(|e| AppError::new(2, format!("Invalid simulated IRF: {e}")))?;

    let times: Vec<f64> = (0..config.bins).map(|k| k as f64 * config.x_inc).collect();
    let clean = DecayModel::new(config.model, &times, irf.as_ref())
        .curve(&config.params)
        .ok_or_else(|| {
            AppError::new(
                2,
                format!(
                    "Parameters {:?} do not describe a valid {}.",
                    config.params,
                    config.model.display_name()
                ),
            )
        })?;

    let counts = if config.poisson {
        let mut rng = StdRng::seed_from_u64(config.seed);
        clean
            .iter()
            .map(|&mean| poisson_count(&mut rng, mean))
            .collect::<Result<Vec<f64>, AppError>>()?
    } else {
        clean.clone()
    };

    Ok(SimulatedTransient {
        times,
        clean,
        counts,
        irf: irf_samples,
    })
}

/// Gaussian IRF sampled on the transient's grid, truncated after its tail.
pub fn gaussian_irf(x_inc: f64, center: f64, fwhm: f64, max_len: usize) -> Result<Vec<f64>, AppError> {
    if !(fwhm.is_finite() && fwhm > 0.0) {
        return Err(AppError::new(2, "IRF FWHM must be finite and > 0."));
    }
    if !(center.is_finite() && center >= 0.0) {
        return Err(AppError::new(2, "IRF centre must be finite and >= 0."));
    }
    let sigma = fwhm / FWHM_PER_SIGMA;
    let support = ((center + IRF_TAIL_SIGMAS * sigma) / x_inc).ceil() as usize + 1;
    let len = support.clamp(1, max_len.max(1));

    Ok((0..len)
        .map(|k| {
            let u = (k as f64 * x_inc - center) / sigma;
            (-0.5 * u * u).exp()
        })
        .collect())
}

fn poisson_count(rng: &mut StdRng, mean: f64) -> Result<f64, AppError> {
    if mean <= 0.0 {
        return Ok(0.0);
    }
    let dist = Poisson::new(mean)
        .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;
    Ok(dist.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimulationConfig {
        SimulationConfig {
            model: ModelKind::Exp1,
            params: vec![10.0, 1000.0, 2.0],
            bins: 64,
            x_inc: 0.1,
            irf_fwhm: None,
            irf_center: None,
            poisson: false,
            seed: 42,
        }
    }

    #[test]
    fn noiseless_without_irf_is_the_model() {
        let sim = simulate(&config()).unwrap();
        assert_eq!(sim.counts.len(), 64);
        assert!((sim.counts[0] - 1010.0).abs() < 1e-9);
        assert!((sim.counts[20] - (10.0 + 1000.0 * (-1.0f64).exp())).abs() < 1e-9);
        assert!(sim.irf.is_none());
    }

    #[test]
    fn poisson_noise_is_reproducible_per_seed() {
        let mut cfg = config();
        cfg.poisson = true;
        let a = simulate(&cfg).unwrap();
        let b = simulate(&cfg).unwrap();
        assert_eq!(a.counts, b.counts);
        assert!(a.counts.iter().all(|c| c.fract() == 0.0 && *c >= 0.0));

        cfg.seed = 7;
        let c = simulate(&cfg).unwrap();
        assert_ne!(a.counts, c.counts);
    }

    #[test]
    fn gaussian_irf_peaks_at_centre() {
        let irf = gaussian_irf(0.1, 0.5, 0.3, 100).unwrap();
        let peak = irf
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (k, &v)| if v > acc.1 { (k, v) } else { acc });
        assert_eq!(peak.0, 5);
        assert!((peak.1 - 1.0).abs() < 1e-12);
        assert!(irf.len() < 20);
    }

    #[test]
    fn irf_delays_the_peak() {
        let mut cfg = config();
        cfg.irf_fwhm = Some(0.3);
        let sim = simulate(&cfg).unwrap();
        let peak = sim
            .clean
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (k, &v)| if v > acc.1 { (k, v) } else { acc });
        assert!(peak.0 > 0);
        assert!(sim.irf.is_some());
    }

    #[test]
    fn parameter_count_must_match_model() {
        let mut cfg = config();
        cfg.model = ModelKind::Exp2;
        let err = simulate(&cfg).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
