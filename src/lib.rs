//! pargmg: distributed sparse algebra and parallel geometric multigrid
//!
//! This crate provides the communication substrate for row-partitioned sparse matrices and
//! vectors (interfaces, layouts, global ids, collect/extract policies), an overlap builder that
//! adds one ring of ghost rows, and a recursive multigrid cycle over level hierarchies that may
//! be redistributed onto fewer processes.

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod multigrid;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use self::core::*;
pub use error::*;
pub use matrix::*;
pub use multigrid::*;
pub use preconditioner::*;
pub use solver::*;

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;
