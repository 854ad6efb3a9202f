//! Core traits shared by the matrix, smoother and solver modules.

pub mod traits;
pub mod wrappers;

pub use traits::{InnerProduct, MatTransVec, MatVec, Scalar};
