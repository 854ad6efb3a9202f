//! Configuration-time selection of solvers, smoothers and base solvers.
//!
//! Modules:
//! - [`ksp_context`]: `SolverContext`, an outer iteration plus its preconditioner.
//! - [`pc_context`]: `SmootherKind` and `BaseSolverKind` factories.

pub mod ksp_context;
pub use ksp_context::{SolverContext, SolverKind};
pub mod pc_context;
pub use pc_context::{BaseSolverKind, SmootherKind};
