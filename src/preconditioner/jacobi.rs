// Damped Jacobi smoother on distributed operators

use std::sync::Arc;

use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{OperatorHandle, ParallelMatrix, ParallelVector, StorageType};
use crate::preconditioner::LinearIterator;

/// Damped Jacobi: c = ω D⁻¹ d, with D the diagonal summed over all copies of each row.
#[derive(Clone, Debug)]
pub struct Jacobi<T> {
    damping: T,
    pub(crate) inv_diag: Vec<T>,
    op: Option<Arc<ParallelMatrix<T>>>,
}

impl<T: Scalar> Jacobi<T> {
    /// new with empty state; `init` must be called before `apply`.
    pub fn new(damping: T) -> Self {
        Self { damping, inv_diag: Vec::new(), op: None }
    }

    pub fn damping(&self) -> T {
        self.damping
    }
}

impl<T: Scalar> Default for Jacobi<T> {
    fn default() -> Self {
        Self::new(T::one())
    }
}

impl<T: Scalar> LinearIterator<T> for Jacobi<T> {
    fn name(&self) -> &'static str {
        "Jacobi"
    }

    fn init(&mut self, op: &OperatorHandle<T>) -> Result<(), PmgError> {
        let a = Arc::clone(op.assembled()?);
        let diag = a.consistent_diagonal()?;
        self.inv_diag = diag
            .into_iter()
            .enumerate()
            .map(|(i, d)| if d != T::zero() { Ok(T::one() / d) } else { Err(PmgError::ZeroPivot(i)) })
            .collect::<Result<_, _>>()?;
        self.op = Some(a);
        Ok(())
    }

    fn apply(&mut self, d: &ParallelVector<T>, c: &mut ParallelVector<T>) -> Result<(), PmgError> {
        if self.op.is_none() {
            return Err(PmgError::NotInitialized("Jacobi: apply called before init"));
        }
        if d.len() != self.inv_diag.len() || c.len() != d.len() {
            return Err(PmgError::DimensionMismatch { expected: self.inv_diag.len(), actual: d.len() });
        }
        let mut dc = d.clone();
        dc.change_storage_type(StorageType::CONSISTENT)?;
        for ((ci, &di), &inv) in c.values_mut().iter_mut().zip(dc.values()).zip(&self.inv_diag) {
            *ci = self.damping * inv * di;
        }
        c.set_storage_type(StorageType::CONSISTENT);
        Ok(())
    }

    fn operator(&self) -> Option<Arc<ParallelMatrix<T>>> {
        self.op.clone()
    }

    fn clone_box(&self) -> Box<dyn LinearIterator<T>> {
        Box::new(Jacobi::new(self.damping))
    }
}
