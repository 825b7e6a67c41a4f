//! Command-line parsing for the lifetime fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{FitSettings, ModelKind, NoiseModel};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "ecf", version, about = "Exponential curve fitting for fluorescence lifetime data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rapid lifetime determination (single exponential, closed form + refinement).
    Rld(RldArgs),
    /// Levenberg-Marquardt fit of a 1/2/3-exponential or stretched model.
    Lma(LmaArgs),
    /// Fit 1, 2 and 3 exponentials and pick one by BIC.
    Select(SelectArgs),
    /// Write a synthetic decay to CSV.
    Simulate(SimulateArgs),
    /// Plot a previously exported fit JSON.
    Plot(PlotArgs),
}

/// Where the transient comes from and which part of it to fit.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Transient CSV (`counts` or `time,counts`).
    #[arg(short = 'i', long, value_name = "CSV")]
    pub input: PathBuf,

    /// Instrument response CSV (same layout as the transient).
    #[arg(long, value_name = "CSV")]
    pub irf: Option<PathBuf>,

    /// Sampling interval; required when the input has no time column.
    #[arg(long)]
    pub x_inc: Option<f64>,

    /// First sample of the fit window.
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// One past the last sample of the fit window (default: end of data).
    #[arg(long)]
    pub end: Option<usize>,

    /// Noise model used for weighting.
    #[arg(long, value_enum, default_value_t = NoiseModel::PoissonFit)]
    pub noise: NoiseModel,

    /// Constant sigma for `--noise const`.
    #[arg(long)]
    pub sigma: Option<f64>,

    /// Per-sample sigma CSV for `--noise given` (indexed like the transient).
    #[arg(long, value_name = "CSV")]
    pub sigma_file: Option<PathBuf>,

    /// Stop once chi-square reaches this value.
    #[arg(long, default_value_t = 0.0)]
    pub target: f64,
}

/// Output options shared by the fitting commands.
#[derive(Debug, Args, Clone)]
pub struct OutputArgs {
    /// Export the fit (parameters, quality, curve) to JSON.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,

    /// Export `t,y,fitted,residual` rows to CSV.
    #[arg(long = "export-csv", value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Render an ASCII plot in the terminal (enabled by default).
    #[arg(long, default_value_t = true)]
    pub plot: bool,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Logarithmic y axis.
    #[arg(long)]
    pub log_y: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

impl OutputArgs {
    pub fn plot_enabled(&self) -> bool {
        self.plot && !self.no_plot
    }
}

#[derive(Debug, Parser, Clone)]
pub struct RldArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Maximum lifetime refinement passes.
    #[arg(long, default_value_t = FitSettings::default().max_refits)]
    pub max_refits: usize,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Parser, Clone)]
pub struct LmaArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Initial parameters, comma separated; the count picks the model
    /// (3: Z,A,T  4: Z,A,T,H  5: two components  7: three components).
    /// Defaults to the RLD estimate for a single exponential.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub params: Option<Vec<f64>>,

    /// Zero-based indices of parameters to hold fixed.
    #[arg(long, value_delimiter = ',')]
    pub fixed: Vec<usize>,

    /// Stop after two accepted steps each improving chi-square by less than this.
    #[arg(long, default_value_t = FitSettings::default().chi_square_delta)]
    pub delta: f64,

    /// Iteration cap.
    #[arg(long, default_value_t = FitSettings::default().max_iterations)]
    pub max_iter: usize,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Parser, Clone)]
pub struct SelectArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Stop after two accepted steps each improving chi-square by less than this.
    #[arg(long, default_value_t = FitSettings::default().chi_square_delta)]
    pub delta: f64,

    /// Iteration cap per candidate.
    #[arg(long, default_value_t = FitSettings::default().max_iterations)]
    pub max_iter: usize,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Decay model.
    #[arg(long, value_enum, default_value_t = ModelKind::Exp1)]
    pub model: ModelKind,

    /// Model parameters, comma separated (e.g. `Z,A,T` for exp1).
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub params: Vec<f64>,

    /// Number of samples.
    #[arg(long, default_value_t = 256)]
    pub bins: usize,

    /// Sampling interval.
    #[arg(long, default_value_t = 0.05)]
    pub x_inc: f64,

    /// Convolve with a Gaussian IRF of this FWHM.
    #[arg(long)]
    pub irf_fwhm: Option<f64>,

    /// Gaussian IRF centre (default: two FWHM).
    #[arg(long)]
    pub irf_center: Option<f64>,

    /// Write the sampled IRF to this CSV as well.
    #[arg(long, value_name = "CSV")]
    pub irf_out: Option<PathBuf>,

    /// Skip Poisson counting noise.
    #[arg(long)]
    pub noiseless: bool,

    /// Random seed for the counting noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output CSV (`time,counts`).
    #[arg(short = 'o', long, value_name = "CSV")]
    pub out: PathBuf,
}

/// Options for plotting a saved fit.
#[derive(Debug, Parser)]
pub struct PlotArgs {
    /// Fit JSON file produced by `--export`.
    #[arg(long, value_name = "JSON")]
    pub fit: PathBuf,

    /// Logarithmic y axis.
    #[arg(long)]
    pub log_y: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lma_arguments_parse() {
        let cli = Cli::try_parse_from([
            "ecf", "lma", "--input", "d.csv", "--x-inc", "0.05", "--params", "-1,500,2.5",
            "--fixed", "0", "--noise", "mle", "--no-plot",
        ])
        .unwrap();
        let Command::Lma(args) = cli.command else {
            panic!("expected lma");
        };
        assert_eq!(args.params, Some(vec![-1.0, 500.0, 2.5]));
        assert_eq!(args.fixed, vec![0]);
        assert_eq!(args.input.noise, NoiseModel::Mle);
        assert_eq!(args.input.x_inc, Some(0.05));
        assert!(!args.output.plot_enabled());
    }

    #[test]
    fn simulate_requires_params() {
        assert!(Cli::try_parse_from(["ecf", "simulate", "--out", "x.csv"]).is_err());
        let cli =
            Cli::try_parse_from(["ecf", "simulate", "--model", "exp2", "--params", "0,1,1,1,3", "-o", "x.csv"])
                .unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.model, ModelKind::Exp2);
        assert_eq!(args.params.len(), 5);
    }
}
