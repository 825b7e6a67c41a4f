//! Transient CSV ingest.
//!
//! Accepted layouts:
//! - one column: `counts`
//! - two columns: `time,counts`
//!
//! A header row is optional (detected when its first field is not a number).
//! Blank lines and `#` comments are skipped. Every value must be finite; the
//! first bad line is reported with its line number and the file is rejected.
//! With a time column the sampling interval is inferred and must be uniform.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::StringRecord;

use crate::error::AppError;

/// Relative tolerance on time-step uniformity.
const STEP_TOLERANCE: f64 = 1e-6;

/// A transient loaded from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct TransientData {
    pub counts: Vec<f64>,
    /// Sampling interval inferred from a time column.
    pub x_inc: Option<f64>,
    /// First time stamp, when a time column was present.
    pub t0: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    time: Option<usize>,
    counts: usize,
}

/// Load a transient (or an IRF, which has the same layout).
pub fn read_transient_csv(path: &Path) -> Result<TransientData, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut columns: Option<Columns> = None;
    let mut times = Vec::new();
    let mut counts = Vec::new();

    for result in reader.records() {
        let record = result.map_err(|e| AppError::new(2, format!("CSV parse error: {e}")))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }

        let cols = match columns {
            Some(cols) => cols,
            None => {
                let (cols, is_header) = detect_columns(&record, line)?;
                columns = Some(cols);
                if is_header {
                    continue;
                }
                cols
            }
        };

        if let Some(tc) = cols.time {
            times.push(parse_field(&record, tc, line, "time")?);
        }
        counts.push(parse_field(&record, cols.counts, line, "counts")?);
    }

    if counts.is_empty() {
        return Err(AppError::new(
            3,
            format!("No samples found in '{}'.", path.display()),
        ));
    }

    let (x_inc, t0) = if times.is_empty() {
        (None, None)
    } else {
        (Some(uniform_step(&times)?), times.first().copied())
    };

    Ok(TransientData {
        counts,
        x_inc,
        t0,
    })
}

/// Write `time,counts` rows.
pub fn write_transient_csv(path: &Path, times: &[f64], counts: &[f64]) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create CSV '{}': {e}", path.display())))?;

    writeln!(file, "time,counts")
        .map_err(|e| AppError::new(2, format!("Failed to write CSV header: {e}")))?;
    for (t, c) in times.iter().zip(counts) {
        writeln!(file, "{t:.10},{c}")
            .map_err(|e| AppError::new(2, format!("Failed to write CSV row: {e}")))?;
    }
    Ok(())
}

fn detect_columns(record: &StringRecord, line: u64) -> Result<(Columns, bool), AppError> {
    let width = record.len();
    if width == 0 || width > 2 {
        return Err(AppError::new(
            2,
            format!("Line {line}: expected 1 or 2 columns (counts | time,counts), found {width}."),
        ));
    }

    let is_header = record
        .get(0)
        .is_some_and(|f| f.parse::<f64>().is_err());
    if !is_header {
        let time = (width == 2).then_some(0);
        return Ok((Columns { time, counts: width - 1 }, false));
    }

    let names: Vec<String> = record.iter().map(normalize_header_name).collect();
    let find = |wanted: &[&str]| names.iter().position(|n| wanted.contains(&n.as_str()));
    let cols = match width {
        1 => Columns { time: None, counts: 0 },
        _ => {
            let counts = find(&["counts", "count", "y", "intensity"]).unwrap_or(1);
            let time = find(&["time", "t", "x"]).unwrap_or(1 - counts);
            if time == counts {
                return Err(AppError::new(
                    2,
                    format!("Line {line}: could not tell the time column from the counts column."),
                ));
            }
            Columns { time: Some(time), counts }
        }
    };
    Ok((cols, true))
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn parse_field(record: &StringRecord, idx: usize, line: u64, what: &str) -> Result<f64, AppError> {
    let raw = record
        .get(idx)
        .ok_or_else(|| AppError::new(2, format!("Line {line}: missing `{what}` value.")))?;
    let v: f64 = raw
        .parse()
        .map_err(|_| AppError::new(2, format!("Line {line}: invalid `{what}` value '{raw}'.")))?;
    if !v.is_finite() {
        return Err(AppError::new(
            2,
            format!("Line {line}: `{what}` must be finite, got '{raw}'."),
        ));
    }
    Ok(v)
}

fn uniform_step(times: &[f64]) -> Result<f64, AppError> {
    if times.len() < 2 {
        return Err(AppError::new(
            3,
            "A time column needs at least 2 rows to infer the sampling interval.",
        ));
    }
    let step = (times[times.len() - 1] - times[0]) / (times.len() - 1) as f64;
    if !(step.is_finite() && step > 0.0) {
        return Err(AppError::new(2, "Time column must be strictly increasing."));
    }
    for (k, w) in times.windows(2).enumerate() {
        let dt = w[1] - w[0];
        if ((dt - step) / step).abs() > STEP_TOLERANCE {
            return Err(AppError::new(
                2,
                format!(
                    "Time column is not uniformly spaced near row {}: step {dt} vs mean {step}.",
                    k + 2
                ),
            ));
        }
    }
    Ok(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn reads_single_column_without_header() {
        let f = write_tmp("# decay\n100\n60\n\n36\n");
        let data = read_transient_csv(f.path()).unwrap();
        assert_eq!(data.counts, vec![100.0, 60.0, 36.0]);
        assert_eq!(data.x_inc, None);
    }

    #[test]
    fn reads_time_and_counts_with_header() {
        let f = write_tmp("\u{feff}Time,Counts\n0.0,100\n0.5,60\n1.0,36\n1.5,21\n");
        let data = read_transient_csv(f.path()).unwrap();
        assert_eq!(data.counts, vec![100.0, 60.0, 36.0, 21.0]);
        assert!((data.x_inc.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(data.t0, Some(0.0));
    }

    #[test]
    fn header_order_is_respected() {
        let f = write_tmp("counts,time\n100,0.0\n60,0.25\n");
        let data = read_transient_csv(f.path()).unwrap();
        assert_eq!(data.counts, vec![100.0, 60.0]);
        assert!((data.x_inc.unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn bad_lines_are_reported() {
        let f = write_tmp("counts\n100\nabc\n");
        let err = read_transient_csv(f.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("Line 3"), "{err}");

        let f = write_tmp("1,2,3\n");
        assert!(read_transient_csv(f.path()).is_err());

        let f = write_tmp("0.0,1\n0.1,2\n0.5,3\n");
        assert!(read_transient_csv(f.path()).is_err());
    }

    #[test]
    fn written_files_read_back() {
        let f = NamedTempFile::new().unwrap();
        write_transient_csv(f.path(), &[0.0, 0.2, 0.4], &[5.0, 3.0, 2.0]).unwrap();
        let data = read_transient_csv(f.path()).unwrap();
        assert_eq!(data.counts, vec![5.0, 3.0, 2.0]);
        assert!((data.x_inc.unwrap() - 0.2).abs() < 1e-9);
    }
}
