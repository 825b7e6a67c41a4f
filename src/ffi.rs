//! C ABI: `RLD_fit` and `LMA_fit`.
//!
//! Both functions validate their pointers, borrow the caller's buffers as slices
//! sized by `fit_end`, `n_instr` and `n_param`, run the safe engines and map the
//! outcome to an `int`:
//!
//! - `>= 0`: success; RLD refinement passes or LMA iterations
//! - `< 0`: [`FitError::code`]
//!
//! Outputs are written only on success. Panics are caught and reported as `-99`.

#![allow(unsafe_code)]

use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::slice;

use tracing::{debug, error};

use crate::domain::{FitSettings, ModelKind, NoiseModel, Transient};
use crate::error::{FitError, FitResult};
use crate::fit::{Noise, lma_fit, rld_fit};
use crate::math::Instrument;

/// Run `body`, turning errors and panics into status codes.
fn guarded(name: &'static str, body: impl FnOnce() -> FitResult<usize>) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(count)) => c_int::try_from(count).unwrap_or(c_int::MAX),
        Ok(Err(err)) => {
            debug!(call = name, code = err.code(), %err, "fit rejected");
            err.code()
        }
        Err(_) => {
            error!(call = name, "panic caught at the C boundary");
            FitError::Internal("panic".into()).code()
        }
    }
}

fn window_bounds(fit_start: c_int, fit_end: c_int) -> FitResult<(usize, usize)> {
    let (Ok(start), Ok(end)) = (usize::try_from(fit_start), usize::try_from(fit_end)) else {
        return Err(FitError::InvalidWindow(format!(
            "window [{fit_start}, {fit_end}) has a negative bound"
        )));
    };
    if start >= end {
        return Err(FitError::InvalidWindow(format!(
            "fit_start ({start}) must be < fit_end ({end})"
        )));
    }
    Ok((start, end))
}

fn require<T>(ptr: *const T, name: &'static str) -> FitResult<()> {
    if ptr.is_null() {
        Err(FitError::NullPointer(name))
    } else {
        Ok(())
    }
}

/// Borrow `len` samples, or `None` when the pointer is null or `len` is 0.
///
/// # Safety
///
/// A non-null `ptr` must be valid for reads of `len` values for `'a`.
unsafe fn optional_slice<'a>(ptr: *const f64, len: usize) -> Option<&'a [f64]> {
    if ptr.is_null() || len == 0 {
        None
    } else {
        // SAFETY: non-null and sized by the caller's contract.
        Some(unsafe { slice::from_raw_parts(ptr, len) })
    }
}

/// Inputs shared by both entry points, borrowed from the caller.
struct Inputs<'a> {
    transient: Transient<'a>,
    irf: Option<Instrument>,
    noise: Noise,
}

/// # Safety
///
/// `y` must hold `fit_end` samples; `instr` `n_instr` samples when non-null;
/// `sig` `fit_end` samples when non-null.
#[allow(clippy::too_many_arguments)]
unsafe fn borrow_inputs<'a>(
    x_inc: f64,
    y: *const f64,
    fit_start: c_int,
    fit_end: c_int,
    instr: *const f64,
    n_instr: c_int,
    noise: c_int,
    sig: *const f64,
) -> FitResult<Inputs<'a>> {
    require(y, "y")?;
    let (start, end) = window_bounds(fit_start, fit_end)?;
    let noise_model = NoiseModel::from_code(noise)?;

    let n_instr = usize::try_from(n_instr).map_err(|_| {
        FitError::InvalidInstrument(format!("n_instr must be >= 0, got {n_instr}"))
    })?;

    // SAFETY: `y` is non-null and holds `fit_end` samples.
    let y = unsafe { slice::from_raw_parts(y, end) };
    // SAFETY: forwarded caller contract for `instr`.
    let instr = unsafe { optional_slice(instr, n_instr) };
    let sig_len = match noise_model {
        NoiseModel::Given => end,
        NoiseModel::Const => 1,
        _ => 0,
    };
    // SAFETY: forwarded caller contract for `sig`.
    let sig = unsafe { optional_slice(sig, sig_len) };

    let transient = Transient::new(x_inc, y, start, end)?;
    let irf = Instrument::from_samples(instr)?;
    let noise = Noise::new(noise_model, sig, &transient)?;
    Ok(Inputs {
        transient,
        irf,
        noise,
    })
}

/// Rapid lifetime determination of `Z + A exp(-t/tau)` over `y[fit_start..fit_end]`.
///
/// # Safety
///
/// - `y` must be valid for reads of `fit_end` doubles.
/// - `instr` may be null; otherwise it must hold `n_instr` doubles.
/// - `sig` may be null; for the given-sigma noise model it must hold `fit_end`
///   doubles, for the constant model at least one.
/// - `z`, `a`, `tau` and `chi_square` must be valid for writes.
/// - `fitted` must be valid for writes of `fit_end - fit_start` doubles.
/// - No output may alias an input.
#[allow(non_snake_case, clippy::too_many_arguments)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn RLD_fit(
    x_inc: f64,
    y: *mut f64,
    fit_start: c_int,
    fit_end: c_int,
    instr: *mut f64,
    n_instr: c_int,
    noise: c_int,
    sig: *mut f64,
    z: *mut f64,
    a: *mut f64,
    tau: *mut f64,
    fitted: *mut f64,
    chi_square: *mut f64,
    chi_square_target: f64,
) -> c_int {
    guarded("RLD_fit", || {
        for (ptr, name) in [
            (z, "z"),
            (a, "a"),
            (tau, "tau"),
            (fitted, "fitted"),
            (chi_square, "chi_square"),
        ] {
            require(ptr, name)?;
        }
        // SAFETY: forwarded caller contract.
        let inputs = unsafe {
            borrow_inputs(x_inc, y, fit_start, fit_end, instr, n_instr, noise, sig)
        }?;
        let settings = FitSettings {
            chi_square_target,
            ..FitSettings::default()
        };

        let n = inputs.transient.len();
        let mut curve = vec![0.0; n];
        let fit = rld_fit(
            &inputs.transient,
            inputs.irf.as_ref(),
            &inputs.noise,
            &settings,
            &mut curve,
        )?;

        // SAFETY: all outputs were checked non-null; `fitted` holds the window.
        unsafe {
            *z = fit.z;
            *a = fit.a;
            *tau = fit.tau;
            *chi_square = fit.chi_square;
            slice::from_raw_parts_mut(fitted, n).copy_from_slice(&curve);
        }
        Ok(fit.refits)
    })
}

/// Levenberg-Marquardt refinement of `param` (3, 4, 5 or 7 entries) over
/// `y[fit_start..fit_end]`. Entries with `param_free[i] == 0` are held fixed.
///
/// # Safety
///
/// - Input buffers follow the rules of [`RLD_fit`].
/// - `param` and `param_free` must be valid for `n_param` elements; `param` is
///   read and, on success, overwritten.
/// - `fitted` must be valid for writes of `fit_end - fit_start` doubles and
///   `chi_square` for one double.
#[allow(non_snake_case, clippy::too_many_arguments)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn LMA_fit(
    x_inc: f64,
    y: *mut f64,
    fit_start: c_int,
    fit_end: c_int,
    instr: *mut f64,
    n_instr: c_int,
    noise: c_int,
    sig: *mut f64,
    param: *mut f64,
    param_free: *mut c_int,
    n_param: c_int,
    fitted: *mut f64,
    chi_square: *mut f64,
    chi_square_target: f64,
    chi_square_delta: f64,
) -> c_int {
    guarded("LMA_fit", || {
        require(param, "param")?;
        require(param_free, "param_free")?;
        require(fitted, "fitted")?;
        require(chi_square, "chi_square")?;

        let n_param = usize::try_from(n_param)
            .ok()
            .filter(|&n| ModelKind::from_param_len(n).is_some())
            .ok_or_else(|| {
                FitError::InvalidParameters(format!(
                    "n_param must be 3, 4, 5 or 7, got {n_param}"
                ))
            })?;
        if !(chi_square_delta.is_finite() && chi_square_delta >= 0.0) {
            return Err(FitError::InvalidParameters(format!(
                "chi_square_delta must be finite and >= 0, got {chi_square_delta}"
            )));
        }

        // SAFETY: forwarded caller contract.
        let inputs = unsafe {
            borrow_inputs(x_inc, y, fit_start, fit_end, instr, n_instr, noise, sig)
        }?;
        // SAFETY: both checked non-null and hold `n_param` elements.
        let (mut params, free) = unsafe {
            (
                slice::from_raw_parts(param, n_param).to_vec(),
                slice::from_raw_parts(param_free, n_param)
                    .iter()
                    .map(|&f| f != 0)
                    .collect::<Vec<bool>>(),
            )
        };
        let settings = FitSettings {
            chi_square_target,
            chi_square_delta,
            ..FitSettings::default()
        };

        let n = inputs.transient.len();
        let mut curve = vec![0.0; n];
        let fit = lma_fit(
            &inputs.transient,
            inputs.irf.as_ref(),
            &inputs.noise,
            &mut params,
            &free,
            &settings,
            &mut curve,
        )?;

        // SAFETY: outputs were checked non-null and sized by the caller's contract.
        unsafe {
            slice::from_raw_parts_mut(param, n_param).copy_from_slice(&params);
            slice::from_raw_parts_mut(fitted, n).copy_from_slice(&curve);
            *chi_square = fit.chi_square;
        }
        Ok(fit.iterations)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_bounds_are_window_errors() {
        assert!(matches!(window_bounds(-1, 10), Err(FitError::InvalidWindow(_))));
        assert!(matches!(window_bounds(5, 5), Err(FitError::InvalidWindow(_))));
        assert_eq!(window_bounds(2, 9).unwrap(), (2, 9));
    }

    #[test]
    fn panics_become_internal_errors() {
        let code = guarded("test", || panic!("boom"));
        assert_eq!(code, -99);
        assert_eq!(guarded("test", || Ok(7)), 7);
        assert_eq!(
            guarded("test", || Err(FitError::NoDecay { ratio: 2.0 })),
            -7
        );
    }
}
