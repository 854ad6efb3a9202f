//! Linear iterators: smoothers, base solvers and preconditioners.
//!
//! Everything that maps a defect `d` to a correction `c ≈ A⁻¹ d` implements [`LinearIterator`].
//! The multigrid cycle uses it for its per-level smoothers and its base solver, the outer
//! solvers use it as a preconditioner, and the multigrid cycle itself implements it so it can be
//! nested inside a Krylov method.

use std::sync::Arc;

use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{OperatorHandle, ParallelMatrix, ParallelVector};

/// Approximate inverse of an operator, applied to distributed vectors.
pub trait LinearIterator<T: Scalar> {
    fn name(&self) -> &'static str;

    /// Bind to an operator. Called again whenever the operator changes.
    fn init(&mut self, op: &OperatorHandle<T>) -> Result<(), PmgError>;

    /// Per-solve preparation with the current iterate `u`, defect `d` and a scratch vector `c`.
    fn prepare(
        &mut self,
        _u: &ParallelVector<T>,
        _d: &ParallelVector<T>,
        _c: &ParallelVector<T>,
    ) -> Result<(), PmgError> {
        Ok(())
    }

    /// Compute a consistent correction `c` for the additive defect `d`.
    fn apply(&mut self, d: &ParallelVector<T>, c: &mut ParallelVector<T>) -> Result<(), PmgError>;

    /// As [`apply`](Self::apply), then `d -= A c`.
    fn apply_update_defect(
        &mut self,
        d: &mut ParallelVector<T>,
        c: &mut ParallelVector<T>,
    ) -> Result<(), PmgError> {
        self.apply(d, c)?;
        let op = self.operator().ok_or(PmgError::NotInitialized("linear iterator has no operator"))?;
        op.apply_sub(c, d)
    }

    /// The assembled operator bound by `init`, if any.
    fn operator(&self) -> Option<Arc<ParallelMatrix<T>>>;

    /// Fresh copy with the same configuration, for use on another level.
    fn clone_box(&self) -> Box<dyn LinearIterator<T>>;
}

pub mod jacobi;
pub mod sor;

// Re-exports for convenience
pub use jacobi::Jacobi;
pub use sor::{MatSorType, Sor};
