//! Export a fitted window to CSV (`t, y, fitted, residual`).
//!
//! The export is meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::FitCurve;
use crate::error::AppError;

/// Write one row per window sample.
pub fn write_fit_csv(path: &Path, curve: &FitCurve) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "t,y,fitted,residual")
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV header: {e}")))?;

    for (((t, y), f), r) in curve
        .t
        .iter()
        .zip(&curve.y)
        .zip(&curve.fitted)
        .zip(curve.residuals())
    {
        writeln!(out, "{t:.10},{y:.6},{f:.6},{r:.6}")
            .map_err(|e| AppError::new(2, format!("Failed to write export CSV row: {e}")))?;
    }

    out.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush export CSV: {e}")))?;
    Ok(())
}
