//! Formatted terminal output for fits.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized (snapshot tests live next to the formatter)

use crate::domain::{Convergence, Engine, FitSummary};
use crate::fit::selection::FitSelection;

/// Format the run summary of a single fit.
pub fn format_fit_summary(summary: &FitSummary) -> String {
    let mut out = String::new();

    let engine = match summary.engine {
        Engine::Rld => "RLD",
        Engine::Lma => "LMA",
    };
    out.push_str(&format!(
        "{engine} fit: {} | noise={} | window=[{}, {}) n={} | x_inc={}\n",
        summary.model.display_name(),
        summary.noise.display_name(),
        summary.fit_start,
        summary.fit_end,
        summary.quality.n,
        summary.x_inc
    ));

    out.push_str("\nParameters:\n");
    for (i, (name, value)) in summary.param_names.iter().zip(&summary.params).enumerate() {
        let fixed = if summary.free.get(i).copied().unwrap_or(true) {
            ""
        } else {
            " (fixed)"
        };
        let err = summary
            .errors
            .as_ref()
            .and_then(|e| e.get(i))
            .filter(|e| **e > 0.0)
            .map(|e| format!(" ± {e:.6}"))
            .unwrap_or_default();
        out.push_str(&format!("- {name:<3} = {value:.6}{err}{fixed}\n"));
    }

    let q = &summary.quality;
    out.push_str("\nQuality:\n");
    out.push_str(&format!("- chi-square         : {:.6}\n", q.chi_square));
    match q.reduced_chi_square {
        Some(r) => out.push_str(&format!("- reduced chi-square : {r:.6}\n")),
        None => out.push_str("- reduced chi-square : n/a (no degrees of freedom)\n"),
    }
    let passes = match summary.engine {
        Engine::Rld => "refinement passes",
        Engine::Lma => "iterations",
    };
    out.push_str(&format!("- {passes:<19}: {}\n", q.iterations));
    if let Some(status) = q.status {
        out.push_str(&format!("- stopped            : {}\n", convergence_label(status)));
    }

    out
}

/// Format per-model diagnostics of a selection run.
pub fn format_selection(selection: &FitSelection) -> String {
    let mut out = String::new();

    let rld = &selection.rld;
    out.push_str(&format!(
        "RLD start: Z={:.4} A={:.4} T={:.6} (chi-square {:.4}, {} refits)\n",
        rld.z, rld.a, rld.tau, rld.chi_square, rld.refits
    ));

    out.push_str("\nModel diagnostics:\n");
    for fit in &selection.fits {
        let chosen = if fit.kind == selection.best.kind { "*" } else { " " };
        out.push_str(&format!(
            "{chosen} {:<20} chi2={:.3} BIC={:.3} iters={} ({})\n",
            fit.kind.display_name(),
            fit.lma.chi_square,
            fit.bic,
            fit.lma.iterations,
            convergence_label(fit.lma.status)
        ));
    }
    for (kind, reason) in &selection.skipped {
        out.push_str(&format!("  (skipped {}) {reason}\n", kind.display_name()));
    }

    out.push_str("\nChosen model:\n");
    out.push_str(&format!(
        "- {} (kind={:?})\n",
        selection.best.kind.display_name(),
        selection.best.kind
    ));
    out.push_str(&format!("- params: {}\n", fmt_vec(&selection.best.params)));

    out
}

pub fn convergence_label(status: Convergence) -> &'static str {
    match status {
        Convergence::TargetReached => "chi-square target reached",
        Convergence::DeltaReached => "chi-square change below delta",
        Convergence::Converged => "converged (no downhill step)",
        Convergence::Stalled => "stalled (damping limit)",
        Convergence::MaxIterations => "iteration limit",
        Convergence::NoFreeParameters => "no free parameters",
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}
