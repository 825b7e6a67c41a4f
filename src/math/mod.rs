//! Mathematical utilities: decay basis functions, IRF convolution and weighted least squares.

pub mod basis;
pub mod conv;
pub mod ols;

pub use basis::*;
pub use conv::*;
pub use ols::*;
