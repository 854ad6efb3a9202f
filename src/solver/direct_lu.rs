//! Dense LU base solver using Faer.
//!
//! The base level of a multigrid hierarchy is usually small enough to factor densely. When it
//! has been redistributed onto a single process (all horizontal interfaces empty), [`LuSolver`]
//! gathers nothing and factors the local rows with full pivoting.

use std::sync::Arc;

use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::traits::{ComplexField, RealField};
use faer::{Conj, Mat, MatMut};

use crate::core::traits::{MatVec, Scalar};
use crate::error::PmgError;
use crate::matrix::{OperatorHandle, ParallelMatrix, ParallelVector, StorageType};
use crate::preconditioner::LinearIterator;
use crate::solver::LinearSolver;
use crate::utils::convergence::SolveStats;

/// LU solver using full pivoting from Faer.
///
/// Stores the LU factorization for reuse.
pub struct LuSolver<T> {
    /// Cached LU factorization (if computed)
    factor: Option<FullPivLu<T>>,
    dense: Option<Arc<Mat<T>>>,
    op: Option<Arc<ParallelMatrix<T>>>,
    n: usize,
}

impl<T: Scalar + ComplexField + RealField> LuSolver<T> {
    /// Create a new LU solver (no factorization yet).
    pub fn new() -> Self {
        LuSolver { factor: None, dense: None, op: None, n: 0 }
    }

    /// Factor `a`, replacing any previous factorization.
    pub fn factor(&mut self, a: &Mat<T>) -> Result<(), PmgError> {
        if a.nrows() != a.ncols() {
            return Err(PmgError::DimensionMismatch { expected: a.nrows(), actual: a.ncols() });
        }
        self.n = a.nrows();
        self.factor = if self.n == 0 { None } else { Some(FullPivLu::new(a.as_ref())) };
        Ok(())
    }

    /// Solve using the cached LU factorization.
    pub fn solve_cached(&self, b: &[T], x: &mut [T]) -> Result<(), PmgError> {
        if b.len() != self.n || x.len() != self.n {
            return Err(PmgError::DimensionMismatch { expected: self.n, actual: b.len() });
        }
        if self.n == 0 {
            return Ok(());
        }
        let factor = self.factor.as_ref().ok_or(PmgError::NotInitialized("LuSolver: no factorization"))?;
        x.copy_from_slice(b);
        let x_mat = MatMut::from_column_major_slice_mut(x, self.n, 1);
        factor.solve_in_place_with_conj(Conj::No, x_mat);
        if x.iter().any(|&v| !num_traits::Float::is_finite(v)) {
            return Err(PmgError::SolveError("LU solve produced non-finite values (singular matrix?)".into()));
        }
        Ok(())
    }
}

impl<T: Scalar + ComplexField + RealField> Default for LuSolver<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar + ComplexField + RealField> LinearSolver<Mat<T>, Vec<T>> for LuSolver<T> {
    type Error = PmgError;
    type Scalar = T;

    /// Solve Ax = b by LU factorization; the preconditioner is ignored.
    fn solve(
        &mut self,
        a: &Mat<T>,
        _pc: Option<&mut dyn LinearIterator<T>>,
        b: &Vec<T>,
        x: &mut Vec<T>,
    ) -> Result<SolveStats<T>, PmgError> {
        self.factor(a)?;
        x.resize(b.len(), <T as num_traits::Zero>::zero());
        self.solve_cached(b, x)?;
        // For direct solvers, always converged in 1 iteration
        Ok(SolveStats { iterations: 1, final_residual: <T as num_traits::Zero>::zero(), converged: true })
    }
}

impl<T: Scalar + ComplexField + RealField> LinearIterator<T> for LuSolver<T> {
    fn name(&self) -> &'static str {
        "LU"
    }

    fn init(&mut self, op: &OperatorHandle<T>) -> Result<(), PmgError> {
        match op {
            OperatorHandle::Assembled(a) => {
                if a.layouts().has_horizontal() {
                    return Err(PmgError::Precondition(
                        "LU base solver needs a level held by a single process".into(),
                    ));
                }
                self.factor(&a.matrix().to_dense())?;
                self.op = Some(Arc::clone(a));
                self.dense = None;
            }
            OperatorHandle::Dense(m) => {
                self.factor(m)?;
                self.dense = Some(Arc::clone(m));
                self.op = None;
            }
        }
        Ok(())
    }

    fn apply(&mut self, d: &ParallelVector<T>, c: &mut ParallelVector<T>) -> Result<(), PmgError> {
        if self.op.is_none() && self.dense.is_none() {
            return Err(PmgError::NotInitialized("LuSolver: apply called before init"));
        }
        self.solve_cached(d.values(), c.values_mut())?;
        c.set_storage_type(StorageType::CONSISTENT);
        Ok(())
    }

    fn apply_update_defect(
        &mut self,
        d: &mut ParallelVector<T>,
        c: &mut ParallelVector<T>,
    ) -> Result<(), PmgError> {
        self.apply(d, c)?;
        if let Some(op) = &self.op {
            return op.apply_sub(c, d);
        }
        let m = self.dense.as_ref().ok_or(PmgError::NotInitialized("LuSolver: no operator"))?;
        let mut ac = vec![<T as num_traits::Zero>::zero(); self.n];
        m.matvec(&c.values().to_vec(), &mut ac);
        for (di, a) in d.values_mut().iter_mut().zip(ac) {
            *di -= a;
        }
        d.set_storage_type(StorageType::ADDITIVE);
        Ok(())
    }

    fn operator(&self) -> Option<Arc<ParallelMatrix<T>>> {
        self.op.clone()
    }

    fn clone_box(&self) -> Box<dyn LinearIterator<T>> {
        Box::new(LuSolver::<T>::new())
    }
}
