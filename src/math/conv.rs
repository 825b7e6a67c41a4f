//! Instrument response handling.
//!
//! The measured transient is the true decay convolved with the instrument
//! response function (IRF). We normalize the IRF to unit sum so convolution
//! preserves the decay's integral, and convolve causally over the fit window:
//!
//! ```text
//! out[k] = Σ_{j=0}^{min(k, m-1)} h[j] · s[k-j]
//! ```

use crate::error::{FitError, FitResult};

/// A unit-sum IRF kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    kernel: Vec<f64>,
}

impl Instrument {
    pub fn new(samples: &[f64]) -> FitResult<Self> {
        if samples.is_empty() {
            return Err(FitError::InvalidInstrument("empty response".into()));
        }
        if samples.iter().any(|v| !v.is_finite()) {
            return Err(FitError::InvalidInstrument("non-finite sample".into()));
        }
        let sum: f64 = samples.iter().sum();
        if !(sum.is_finite() && sum > 0.0) {
            return Err(FitError::InvalidInstrument(format!(
                "response must have a positive sum, got {sum}"
            )));
        }
        Ok(Self {
            kernel: samples.iter().map(|v| v / sum).collect(),
        })
    }

    /// `None` and empty slices both mean "no IRF".
    pub fn from_samples(samples: Option<&[f64]>) -> FitResult<Option<Self>> {
        match samples {
            Some(s) if !s.is_empty() => Self::new(s).map(Some),
            _ => Ok(None),
        }
    }

    pub fn kernel(&self) -> &[f64] {
        &self.kernel
    }

    pub fn convolve(&self, signal: &[f64], out: &mut [f64]) {
        let m = self.kernel.len();
        for k in 0..signal.len().min(out.len()) {
            let mut acc = 0.0;
            for j in 0..=k.min(m - 1) {
                acc += self.kernel[j] * signal[k - j];
            }
            out[k] = acc;
        }
    }

    pub fn convolved(&self, signal: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; signal.len()];
        self.convolve(signal, &mut out);
        out
    }
}
