//! Lifetime grid generation.
//!
//! RLD refinement searches lifetimes on a deterministic log-spaced grid around
//! the current estimate, narrowing the span on each pass. For a fixed lifetime
//! the offset and amplitude are linear, so every grid point is a cheap weighted
//! least squares solve.

use crate::error::{FitError, FitResult};

/// Points per refinement grid.
pub const REFINE_STEPS: usize = 41;
/// Initial half-span factor: the first grid covers `[τ/4, 4τ]`.
pub const REFINE_SPAN: f64 = 4.0;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> FitResult<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(FitError::InvalidParameters(format!(
            "invalid lifetime range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(FitError::InvalidParameters("grid steps must be >= 2".into()));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

/// Log-spaced grid over `[center / span, center * span]`.
pub fn tau_grid_around(center: f64, span: f64, steps: usize) -> FitResult<Vec<f64>> {
    if !(span.is_finite() && span > 1.0) {
        return Err(FitError::InvalidParameters(format!(
            "grid span must be > 1, got {span}"
        )));
    }
    log_space(center / span, center * span, steps)
}

/// Span for the next refinement pass.
pub fn narrow_span(span: f64) -> f64 {
    span.powf(0.25)
}
