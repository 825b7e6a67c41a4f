//! Model evaluation for multi-exponential and stretched-exponential decays.
//!
//! The engines rely on two primitive operations:
//! - evaluate the fitted curve for a parameter vector (chi-square, residuals, plots)
//! - evaluate the curve together with its Jacobian (LMA normal equations)
//!
//! The decay part is convolved with the IRF when one is present; the offset `Z`
//! is added afterwards, so `∂f/∂Z = 1` everywhere.

use crate::domain::ModelKind;
use crate::math::{Instrument, decay, decay_dtau, stretched};

/// A model bound to a sample grid and an optional IRF.
#[derive(Debug, Clone, Copy)]
pub struct DecayModel<'a> {
    pub kind: ModelKind,
    pub times: &'a [f64],
    pub irf: Option<&'a Instrument>,
}

impl<'a> DecayModel<'a> {
    pub fn new(kind: ModelKind, times: &'a [f64], irf: Option<&'a Instrument>) -> Self {
        Self { kind, times, irf }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Whether `params` describe a physical curve (finite, positive lifetimes and stretch).
    pub fn is_valid(&self, params: &[f64]) -> bool {
        if params.len() != self.kind.param_len() || params.iter().any(|p| !p.is_finite()) {
            return false;
        }
        match self.kind {
            ModelKind::Exp1 | ModelKind::Exp2 | ModelKind::Exp3 => {
                (0..self.kind.components()).all(|c| params[2 + 2 * c] > 0.0)
            }
            ModelKind::Stretched => params[2] > 0.0 && params[3] > 0.0,
        }
    }

    /// Fill `out` with the fitted curve. Returns `false` for invalid parameters.
    pub fn eval(&self, params: &[f64], out: &mut [f64]) -> bool {
        if !self.is_valid(params) || out.len() != self.len() {
            return false;
        }
        let decay_part: Vec<f64> = self
            .times
            .iter()
            .map(|&t| self.decay_value(params, t))
            .collect();
        self.finish(params[0], &decay_part, out);
        out.iter().all(|v| v.is_finite())
    }

    /// Fill `out` with the fitted curve and `jac[p][k] = ∂f_k/∂param_p`.
    ///
    /// `jac` must hold one column per parameter, each of length `self.len()`.
    pub fn eval_with_jacobian(&self, params: &[f64], out: &mut [f64], jac: &mut [Vec<f64>]) -> bool {
        if !self.eval(params, out) || jac.len() != params.len() {
            return false;
        }

        let n = self.len();
        let mut raw = vec![vec![0.0; n]; params.len()];
        for (k, &t) in self.times.iter().enumerate() {
            match self.kind {
                ModelKind::Exp1 | ModelKind::Exp2 | ModelKind::Exp3 => {
                    for c in 0..self.kind.components() {
                        let a = params[1 + 2 * c];
                        let tau = params[2 + 2 * c];
                        raw[1 + 2 * c][k] = decay(t, tau);
                        raw[2 + 2 * c][k] = a * decay_dtau(t, tau);
                    }
                }
                ModelKind::Stretched => {
                    let (v, d_tau, d_h) = stretched(t, params[2], params[3]);
                    raw[1][k] = v;
                    raw[2][k] = params[1] * d_tau;
                    raw[3][k] = params[1] * d_h;
                }
            }
        }

        jac[0].iter_mut().for_each(|v| *v = 1.0);
        for (col, raw_col) in jac.iter_mut().zip(raw.iter()).skip(1) {
            match self.irf {
                Some(irf) => irf.convolve(raw_col, col),
                None => col.copy_from_slice(raw_col),
            }
        }
        jac.iter().all(|col| col.iter().all(|v| v.is_finite()))
    }

    /// Convenience wrapper returning a fresh vector (`None` for invalid parameters).
    pub fn curve(&self, params: &[f64]) -> Option<Vec<f64>> {
        let mut out = vec![0.0; self.len()];
        self.eval(params, &mut out).then_some(out)
    }

    fn decay_value(&self, params: &[f64], t: f64) -> f64 {
        match self.kind {
            ModelKind::Exp1 | ModelKind::Exp2 | ModelKind::Exp3 => (0..self.kind.components())
                .map(|c| params[1 + 2 * c] * decay(t, params[2 + 2 * c]))
                .sum(),
            ModelKind::Stretched => params[1] * stretched(t, params[2], params[3]).0,
        }
    }

    fn finish(&self, z: f64, decay_part: &[f64], out: &mut [f64]) {
        match self.irf {
            Some(irf) => irf.convolve(decay_part, out),
            None => out.copy_from_slice(decay_part),
        }
        out.iter_mut().for_each(|v| *v += z);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|k| k as f64 * dt).collect()
    }

    #[test]
    fn single_exponential_starts_at_offset_plus_amplitude() {
        let t = grid(5, 0.5);
        let model = DecayModel::new(ModelKind::Exp1, &t, None);
        let y = model.curve(&[10.0, 100.0, 2.0]).unwrap();
        assert!((y[0] - 110.0).abs() < 1e-12);
        assert!((y[2] - (10.0 + 100.0 * (-0.5f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn invalid_lifetimes_are_rejected() {
        let t = grid(4, 1.0);
        let model = DecayModel::new(ModelKind::Exp2, &t, None);
        assert!(model.curve(&[0.0, 1.0, 1.0, 1.0, -2.0]).is_none());
        assert!(model.curve(&[0.0, 1.0, 1.0]).is_none());
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let t = grid(30, 0.2);
        let irf = Instrument::new(&[0.2, 0.5, 0.3]).unwrap();
        for (kind, params) in [
            (ModelKind::Exp2, vec![5.0, 80.0, 0.7, 40.0, 2.5]),
            (ModelKind::Stretched, vec![5.0, 80.0, 1.5, 1.3]),
        ] {
            let model = DecayModel::new(kind, &t, Some(&irf));
            let mut out = vec![0.0; t.len()];
            let mut jac = vec![vec![0.0; t.len()]; params.len()];
            assert!(model.eval_with_jacobian(&params, &mut out, &mut jac));

            for p in 0..params.len() {
                let eps = 1e-6 * params[p].abs().max(1.0);
                let mut hi = params.clone();
                let mut lo = params.clone();
                hi[p] += eps;
                lo[p] -= eps;
                let f_hi = model.curve(&hi).unwrap();
                let f_lo = model.curve(&lo).unwrap();
                for k in 0..t.len() {
                    let fd = (f_hi[k] - f_lo[k]) / (2.0 * eps);
                    assert!(
                        (fd - jac[p][k]).abs() < 1e-5 * fd.abs().max(1.0),
                        "{kind:?} param {p} sample {k}: {fd} vs {}",
                        jac[p][k]
                    );
                }
            }
        }
    }
}
