//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and installs the log subscriber
//! - parses CLI arguments
//! - runs the fit pipeline or the simulator
//! - prints reports/plots
//! - writes optional exports

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, LmaArgs, OutputArgs, PlotArgs, RldArgs, SelectArgs, SimulateArgs};
use crate::data::{SimulationConfig, simulate};
use crate::domain::{FitSettings, FitSummary};
use crate::error::AppError;

pub mod pipeline;

/// Environment variable holding the log filter (`tracing_subscriber::EnvFilter` syntax).
pub const LOG_ENV: &str = "ECF_LOG";

/// Entry point for the `ecf` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is fine; it only supplies defaults such as ECF_LOG.
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Rld(args) => handle_rld(args),
        Command::Lma(args) => handle_lma(args),
        Command::Select(args) => handle_select(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Plot(args) => handle_plot(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // Ignore the error if a subscriber is already installed (e.g. by an embedding host).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_rld(args: RldArgs) -> Result<(), AppError> {
    let settings = FitSettings {
        chi_square_target: args.input.target,
        max_refits: args.max_refits,
        ..FitSettings::default()
    };
    let inputs = pipeline::load_inputs(&args.input)?;
    let summary = pipeline::run_rld(&inputs, &settings)?;
    present(&summary, &args.output)
}

fn handle_lma(args: LmaArgs) -> Result<(), AppError> {
    let settings = FitSettings {
        chi_square_target: args.input.target,
        chi_square_delta: args.delta,
        max_iterations: args.max_iter,
        ..FitSettings::default()
    };
    let inputs = pipeline::load_inputs(&args.input)?;
    let summary = pipeline::run_lma(&inputs, args.params.as_deref(), &args.fixed, &settings)?;
    present(&summary, &args.output)
}

fn handle_select(args: SelectArgs) -> Result<(), AppError> {
    let settings = FitSettings {
        chi_square_target: args.input.target,
        chi_square_delta: args.delta,
        max_iterations: args.max_iter,
        ..FitSettings::default()
    };
    let inputs = pipeline::load_inputs(&args.input)?;
    let (selection, summary) = pipeline::run_select(&inputs, &settings)?;
    println!("{}", crate::report::format_selection(&selection));
    present(&summary, &args.output)
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = SimulationConfig {
        model: args.model,
        params: args.params,
        bins: args.bins,
        x_inc: args.x_inc,
        irf_fwhm: args.irf_fwhm,
        irf_center: args.irf_center,
        poisson: !args.noiseless,
        seed: args.seed,
    };
    let sim = simulate(&config)?;
    crate::io::write_transient_csv(&args.out, &sim.times, &sim.counts)?;
    info!(path = %args.out.display(), bins = sim.counts.len(), "transient written");

    if let Some(path) = &args.irf_out {
        let irf = sim
            .irf
            .as_ref()
            .ok_or_else(|| AppError::new(2, "--irf-out needs --irf-fwhm."))?;
        let times: Vec<f64> = (0..irf.len()).map(|k| k as f64 * config.x_inc).collect();
        crate::io::write_transient_csv(path, &times, irf)?;
    }

    println!(
        "Wrote {} samples of a {} to {}",
        sim.counts.len(),
        config.model.display_name(),
        args.out.display()
    );
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let summary = crate::io::read_fit_json(&args.fit)?;
    println!("{}", crate::report::format_fit_summary(&summary));
    let plot = crate::plot::render_fit_plot(&summary.curve, args.width, args.height, args.log_y);
    println!("{plot}");
    Ok(())
}

/// Print the summary and plot, then write any requested exports.
fn present(summary: &FitSummary, output: &OutputArgs) -> Result<(), AppError> {
    println!("{}", crate::report::format_fit_summary(summary));

    if output.plot_enabled() {
        let plot =
            crate::plot::render_fit_plot(&summary.curve, output.width, output.height, output.log_y);
        println!("{plot}");
    }

    if let Some(path) = &output.export {
        crate::io::write_fit_json(path, summary)?;
        info!(path = %path.display(), "fit JSON written");
    }
    if let Some(path) = &output.export_csv {
        crate::io::write_fit_csv(path, &summary.curve)?;
        info!(path = %path.display(), "fit CSV written");
    }

    Ok(())
}
