//! Stable basis functions for exponential decays.
//!
//! - `decay(t, τ) = exp(-t/τ)`
//! - `stretched(t, τ, h) = exp(-(t/τ)^(1/h))`
//!
//! plus their partial derivatives with respect to the shape parameters.
//!
//! Numerical notes:
//! - The RLD estimator needs the geometric sum `Σ_{i<m} q^i` with `q = exp(-x)`.
//!   For small `x` the closed form `(1 - q^m) / (1 - q)` cancels catastrophically,
//!   so we use `expm1` (and the limit `m` as `x → 0`).
//! - `stretched` is evaluated via `exp(ln(u) / h)` and is exactly 1 at `t = 0`,
//!   where both shape derivatives vanish.

/// Threshold below which the geometric sum uses its small-x series.
const SMALL_X: f64 = 1e-9;

/// `exp(-t/τ)`.
pub fn decay(t: f64, tau: f64) -> f64 {
    (-t / tau).exp()
}

/// `∂/∂τ exp(-t/τ) = exp(-t/τ) · t/τ²`.
pub fn decay_dtau(t: f64, tau: f64) -> f64 {
    decay(t, tau) * t / (tau * tau)
}

/// Stretched exponential and its derivatives `(value, ∂/∂τ, ∂/∂h)` for unit amplitude.
pub fn stretched(t: f64, tau: f64, h: f64) -> (f64, f64, f64) {
    if t <= 0.0 {
        return (1.0, 0.0, 0.0);
    }
    let u = t / tau;
    let ln_u = u.ln();
    let s = (ln_u / h).exp();
    let e = (-s).exp();
    let d_tau = e * s / (h * tau);
    let d_h = e * s * ln_u / (h * h);
    (e, d_tau, d_h)
}

/// `Σ_{i=0}^{m-1} exp(-i·x)`.
pub fn geometric_sum(x: f64, m: usize) -> f64 {
    if x.abs() < SMALL_X {
        // Series: m - x·m(m-1)/2
        let m = m as f64;
        return m - x * m * (m - 1.0) / 2.0;
    }
    (-(m as f64) * x).exp_m1() / (-x).exp_m1()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometric_sum_matches_direct_sum() {
        for &x in &[1e-12, 1e-4, 0.05, 0.7, 3.0] {
            for &m in &[1usize, 2, 17, 64] {
                let direct: f64 = (0..m).map(|i| (-(i as f64) * x).exp()).sum();
                let closed = geometric_sum(x, m);
                assert!(
                    (direct - closed).abs() < 1e-9 * direct.max(1.0),
                    "x={x} m={m}: {direct} vs {closed}"
                );
            }
        }
    }

    #[test]
    fn stretched_with_unit_h_is_plain_decay() {
        for &t in &[0.0, 0.1, 1.0, 7.5] {
            let (v, d_tau, _) = stretched(t, 2.0, 1.0);
            assert!((v - decay(t, 2.0)).abs() < 1e-12);
            assert!((d_tau - decay_dtau(t, 2.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn stretched_derivatives_match_finite_differences() {
        let (t, tau, h) = (1.3, 2.0, 1.4);
        let (_, d_tau, d_h) = stretched(t, tau, h);
        let eps = 1e-6;
        let fd_tau = (stretched(t, tau + eps, h).0 - stretched(t, tau - eps, h).0) / (2.0 * eps);
        let fd_h = (stretched(t, tau, h + eps).0 - stretched(t, tau, h - eps).0) / (2.0 * eps);
        assert!((d_tau - fd_tau).abs() < 1e-7);
        assert!((d_h - fd_h).abs() < 1e-7);
    }
}
