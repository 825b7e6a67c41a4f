//! Curve fitting engines.
//!
//! Responsibilities:
//!
//! - resolve noise models into weights and an objective (`noise`)
//! - closed-form lifetime estimation with grid refinement (`rld`, `tau_grid`)
//! - Levenberg-Marquardt refinement of arbitrary parameter vectors (`lma`)
//! - choose the number of exponential components using BIC + guardrails (`selection`)

pub mod lma;
pub mod noise;
pub mod rld;
pub mod selection;
pub mod tau_grid;

pub use lma::*;
pub use noise::*;
pub use rld::*;
pub use selection::*;
pub use tau_grid::*;
