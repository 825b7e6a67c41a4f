//! Shared fit pipeline used by the `rld`, `lma` and `select` commands.
//!
//! load transient (+ IRF, sigma) -> resolve window/noise -> run engine -> `FitSummary`
//!
//! The command handlers can then focus on presentation (printing, plotting, exports).

use chrono::Utc;
use tracing::info;

use crate::cli::InputArgs;
use crate::domain::{
    Engine, FitCurve, FitQuality, FitSettings, FitSummary, ModelKind, NoiseModel, Transient,
};
use crate::error::AppError;
use crate::fit::{FitSelection, Noise, fit_and_select, lma_fit, reduced_chi_square, rld_fit};
use crate::io::read_transient_csv;
use crate::math::Instrument;

/// Everything read from disk for one fit.
#[derive(Debug, Clone)]
pub struct LoadedInputs {
    pub counts: Vec<f64>,
    pub x_inc: f64,
    pub fit_start: usize,
    pub fit_end: usize,
    pub irf: Option<Instrument>,
    pub noise: NoiseModel,
    /// `sig` as the engines see it: one entry for `const`, per sample for `given`.
    pub sig: Option<Vec<f64>>,
}

impl LoadedInputs {
    fn transient(&self) -> Result<Transient<'_>, AppError> {
        Ok(Transient::new(self.x_inc, &self.counts, self.fit_start, self.fit_end)?)
    }

    fn resolve_noise(&self, transient: &Transient<'_>) -> Result<Noise, AppError> {
        Ok(Noise::new(self.noise, self.sig.as_deref(), transient)?)
    }
}

/// Read the transient, IRF and sigma files named by `args`.
pub fn load_inputs(args: &InputArgs) -> Result<LoadedInputs, AppError> {
    let data = read_transient_csv(&args.input)?;
    let x_inc = args.x_inc.or(data.x_inc).ok_or_else(|| {
        AppError::new(
            2,
            "Sampling interval unknown: pass --x-inc or add a time column to the input.",
        )
    })?;
    if let (Some(flag), Some(inferred)) = (args.x_inc, data.x_inc) {
        if ((flag - inferred) / inferred).abs() > 1e-6 {
            tracing::warn!(flag, inferred, "--x-inc overrides the time column");
        }
    }

    let fit_end = args.end.unwrap_or(data.counts.len());

    let irf = match &args.irf {
        Some(path) => {
            let irf = read_transient_csv(path)?;
            Some(Instrument::new(&irf.counts)?)
        }
        None => None,
    };

    let sig = match args.noise {
        NoiseModel::Const => args.sigma.map(|s| vec![s]),
        NoiseModel::Given => {
            let path = args
                .sigma_file
                .as_ref()
                .ok_or_else(|| AppError::new(2, "--noise given needs --sigma-file."))?;
            Some(read_transient_csv(path)?.counts)
        }
        _ => None,
    };

    info!(
        samples = data.counts.len(),
        x_inc,
        fit_start = args.start,
        fit_end,
        irf = irf.as_ref().map(|i| i.kernel().len()),
        noise = args.noise.display_name(),
        "inputs loaded"
    );

    Ok(LoadedInputs {
        counts: data.counts,
        x_inc,
        fit_start: args.start,
        fit_end,
        irf,
        noise: args.noise,
        sig,
    })
}

/// RLD estimate of the window.
pub fn run_rld(inputs: &LoadedInputs, settings: &FitSettings) -> Result<FitSummary, AppError> {
    let transient = inputs.transient()?;
    let noise = inputs.resolve_noise(&transient)?;
    let mut fitted = vec![0.0; transient.len()];

    let fit = rld_fit(&transient, inputs.irf.as_ref(), &noise, settings, &mut fitted)?;
    let n = transient.len();
    Ok(build_summary(
        Engine::Rld,
        ModelKind::Exp1,
        inputs,
        &transient,
        fit.params().to_vec(),
        vec![true; 3],
        None,
        FitQuality {
            chi_square: fit.chi_square,
            reduced_chi_square: reduced_chi_square(fit.chi_square, n, 3),
            n,
            n_free: 3,
            iterations: fit.refits,
            status: None,
        },
        fitted,
    ))
}

/// LMA refinement; without `params` the RLD estimate seeds a single exponential.
pub fn run_lma(
    inputs: &LoadedInputs,
    params: Option<&[f64]>,
    fixed: &[usize],
    settings: &FitSettings,
) -> Result<FitSummary, AppError> {
    let transient = inputs.transient()?;
    let noise = inputs.resolve_noise(&transient)?;
    let n = transient.len();
    let mut fitted = vec![0.0; n];

    let mut params = match params {
        Some(p) => p.to_vec(),
        None => {
            let rld = rld_fit(&transient, inputs.irf.as_ref(), &noise, settings, &mut fitted)?;
            info!(z = rld.z, a = rld.a, tau = rld.tau, "LMA seeded from RLD");
            rld.params().to_vec()
        }
    };
    let kind = ModelKind::from_param_len(params.len()).ok_or_else(|| {
        AppError::new(
            2,
            format!(
                "--params takes 3, 4, 5 or 7 values (got {}).",
                params.len()
            ),
        )
    })?;
    let mut free = vec![true; params.len()];
    for &i in fixed {
        let slot = free.get_mut(i).ok_or_else(|| {
            AppError::new(
                2,
                format!("--fixed index {i} is out of range for {} parameters.", params.len()),
            )
        })?;
        *slot = false;
    }

    let fit = lma_fit(
        &transient,
        inputs.irf.as_ref(),
        &noise,
        &mut params,
        &free,
        settings,
        &mut fitted,
    )?;
    let n_free = free.iter().filter(|f| **f).count();
    Ok(build_summary(
        Engine::Lma,
        kind,
        inputs,
        &transient,
        params,
        free,
        fit.errors,
        FitQuality {
            chi_square: fit.chi_square,
            reduced_chi_square: fit.reduced_chi_square,
            n,
            n_free,
            iterations: fit.iterations,
            status: Some(fit.status),
        },
        fitted,
    ))
}

/// Fit 1-3 exponentials and summarize the one BIC picks.
pub fn run_select(
    inputs: &LoadedInputs,
    settings: &FitSettings,
) -> Result<(FitSelection, FitSummary), AppError> {
    let transient = inputs.transient()?;
    let noise = inputs.resolve_noise(&transient)?;
    let selection = fit_and_select(&transient, inputs.irf.as_ref(), &noise, settings)?;

    let best = &selection.best;
    let n = transient.len();
    let k = best.kind.param_len();
    let summary = build_summary(
        Engine::Lma,
        best.kind,
        inputs,
        &transient,
        best.params.clone(),
        vec![true; k],
        best.lma.errors.clone(),
        FitQuality {
            chi_square: best.lma.chi_square,
            reduced_chi_square: best.lma.reduced_chi_square,
            n,
            n_free: k,
            iterations: best.lma.iterations,
            status: Some(best.lma.status),
        },
        best.fitted.clone(),
    );
    Ok((selection, summary))
}

#[allow(clippy::too_many_arguments)]
fn build_summary(
    engine: Engine,
    model: ModelKind,
    inputs: &LoadedInputs,
    transient: &Transient<'_>,
    params: Vec<f64>,
    free: Vec<bool>,
    errors: Option<Vec<f64>>,
    quality: FitQuality,
    fitted: Vec<f64>,
) -> FitSummary {
    FitSummary {
        tool: "ecf".to_string(),
        generated: Utc::now(),
        engine,
        model,
        noise: inputs.noise,
        x_inc: transient.x_inc,
        fit_start: transient.fit_start,
        fit_end: transient.fit_end,
        param_names: model.param_names().into_iter().map(String::from).collect(),
        params,
        free,
        errors,
        quality,
        curve: FitCurve {
            t: transient.times(),
            y: transient.window().to_vec(),
            fitted,
        },
    }
}
