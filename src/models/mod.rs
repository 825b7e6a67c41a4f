//! Decay model implementations.
//!
//! Models are evaluated by a small, copyable `DecayModel` so that the fitting
//! engines can stay generic over the parameter layout.

pub mod model;

pub use model::*;
