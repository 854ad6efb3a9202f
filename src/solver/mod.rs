//! Krylov, linear-iteration & direct solver interfaces.

use crate::error::PmgError;
use crate::matrix::{OperatorHandle, ParallelVector};
use crate::preconditioner::LinearIterator;
use crate::utils::convergence::SolveStats;

/// Common interface for any direct or iterative solver.
pub trait LinearSolver<M, V> {
    type Error;
    type Scalar: crate::core::Scalar;
    /// Solve A·x = b, writing result into `x`.
    /// Returns iteration stats (including convergence info).
    fn solve(
        &mut self,
        a: &M,
        pc: Option<&mut dyn LinearIterator<Self::Scalar>>,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats<Self::Scalar>, Self::Error>;
}

/// Bind `solver` to `a`, prepare it for the iterate `u`, and overwrite `u` with `solver(b)`.
pub fn apply_linear_solver<T: crate::core::Scalar>(
    a: &OperatorHandle<T>,
    u: &mut ParallelVector<T>,
    b: &ParallelVector<T>,
    solver: &mut dyn LinearIterator<T>,
) -> Result<(), PmgError> {
    solver.init(a)?;
    solver.prepare(u, b, u)?;
    solver.apply(b, u)
}

pub mod direct_lu;
pub use direct_lu::LuSolver;

pub mod cg;
pub use cg::CgSolver;

pub mod richardson;
pub use richardson::RichardsonSolver;
