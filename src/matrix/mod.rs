//! Matrix module: row-wise sparse storage and its distributed wrappers.

pub mod parallel;
pub mod sparse;

pub use parallel::{OperatorHandle, ParallelMatrix, ParallelVector, StorageType};
pub use sparse::SparseRowMatrix;
