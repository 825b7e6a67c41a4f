//! Input/output helpers.
//!
//! - transient / IRF CSV ingest and simulated transient output (`ingest`)
//! - fitted window CSV export (`export`)
//! - fit JSON read/write (`curve`)

pub mod curve;
pub mod export;
pub mod ingest;

pub use curve::*;
pub use export::*;
pub use ingest::*;
