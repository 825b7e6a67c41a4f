//! Domain types used throughout the crate.
//!
//! This module defines:
//!
//! - input descriptions (`Transient`, `NoiseModel`, `ModelKind`, `FitSettings`)
//! - engine outputs (`RldFit`, `LmaFit`, `Convergence`)
//! - the exportable fit record (`FitSummary`)

pub mod types;

pub use types::*;
