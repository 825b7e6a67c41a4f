//! Read/write fit JSON files.
//!
//! A fit JSON is the portable record of one fit:
//! - engine, model, noise model and window
//! - parameters with names, free mask and standard errors
//! - quality diagnostics (chi-square, iterations, stop reason)
//! - the measured window and the fitted curve, for replotting
//!
//! The schema is defined by `domain::FitSummary`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::FitSummary;
use crate::error::AppError;

/// Write a fit JSON file.
pub fn write_fit_json(path: &Path, summary: &FitSummary) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create fit JSON '{}': {e}", path.display())))?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary)
        .map_err(|e| AppError::new(2, format!("Failed to write fit JSON: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush fit JSON: {e}")))?;

    Ok(())
}

/// Read a fit JSON file.
pub fn read_fit_json(path: &Path) -> Result<FitSummary, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open fit JSON '{}': {e}", path.display())))?;
    let summary: FitSummary =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid fit JSON: {e}")))?;

    let n = summary.curve.t.len();
    if summary.curve.y.len() != n || summary.curve.fitted.len() != n {
        return Err(AppError::new(
            2,
            "Invalid fit JSON: curve arrays have different lengths.",
        ));
    }
    Ok(summary)
}
