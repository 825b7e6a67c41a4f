//! `ecf` library crate: exponential curve fitting for fluorescence lifetime data.
//!
//! Two engines fit decays of the form `Z + Σ A_i exp(-t/τ_i)` (optionally
//! stretched, optionally convolved with an instrument response):
//!
//! - RLD: closed-form triple-integral estimate of a single exponential
//! - LMA: Levenberg-Marquardt refinement of any supported parameter vector
//!
//! They are exposed to C as `RLD_fit` / `LMA_fit` (see `include/ecf.h`), and to
//! Rust through `fit::rld_fit` / `fit::lma_fit`. The binary (`ecf`) is a thin
//! wrapper around this library so that core logic is testable without spawning
//! processes.

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod ffi;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;

pub use ffi::{LMA_fit, RLD_fit};
