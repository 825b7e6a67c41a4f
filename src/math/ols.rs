//! Weighted least squares solver.
//!
//! The engines repeatedly solve tiny linear problems of the form:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! (offset and amplitude for a fixed lifetime in RLD refinement). We scale rows
//! by `sqrt(w_i)` and solve the resulting ordinary least squares problem with SVD,
//! which copes with tall design matrices and near-collinear columns.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Weighted variant: rows of `x` and `y` are scaled by `sqrt(w_i)` before solving.
///
/// `columns[j][i]` is the value of basis column `j` at sample `i`.
pub fn solve_weighted(columns: &[&[f64]], y: &[f64], w: &[f64]) -> Option<Vec<f64>> {
    let n = y.len();
    let p = columns.len();
    if p == 0 || n < p || w.len() != n || columns.iter().any(|c| c.len() != n) {
        return None;
    }

    let mut xw = DMatrix::<f64>::zeros(n, p);
    let mut yw = DVector::<f64>::zeros(n);
    for i in 0..n {
        let sw = w[i].max(0.0).sqrt();
        for (j, col) in columns.iter().enumerate() {
            xw[(i, j)] = col[i] * sw;
        }
        yw[i] = y[i] * sw;
    }

    solve_least_squares(&xw, &yw).map(|beta| beta.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn weighted_solve_ignores_zero_weight_outlier() {
        let ones = [1.0; 4];
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 100.0];
        let w = [1.0, 1.0, 1.0, 0.0];
        let beta = solve_weighted(&[&ones, &x], &y, &w).unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-9);
        assert!((beta[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn weighted_solve_rejects_shape_mismatch() {
        let ones = [1.0; 3];
        assert!(solve_weighted(&[&ones], &[1.0, 2.0], &[1.0, 1.0]).is_none());
    }
}
