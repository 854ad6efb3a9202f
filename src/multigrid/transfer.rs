//! Grid transfer operators.
//!
//! Prolongation maps consistent coarse vectors to consistent fine vectors row by row, so it
//! needs no communication once its input is consistent. Restriction applies `Pᵀ` to an
//! additive fine vector and yields an additive coarse vector, again without communication.

use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{ParallelVector, SparseRowMatrix, StorageType};

/// Prolongation `P` (fine rows × coarse columns) and its damped transpose.
#[derive(Clone, Debug)]
pub struct MatrixTransfer<T> {
    p: SparseRowMatrix<T>,
    damping: T,
}

impl<T: Scalar> MatrixTransfer<T> {
    pub fn new(p: SparseRowMatrix<T>) -> Self {
        Self { p, damping: T::one() }
    }

    /// Scale restricted defects by `damping`.
    pub fn with_damping(mut self, damping: T) -> Self {
        self.damping = damping;
        self
    }

    pub fn matrix(&self) -> &SparseRowMatrix<T> {
        &self.p
    }

    pub fn fine_size(&self) -> usize {
        self.p.nrows()
    }

    pub fn coarse_size(&self) -> usize {
        self.p.ncols()
    }

    /// fine = P coarse
    pub fn prolongate(&self, coarse: &ParallelVector<T>, fine: &mut ParallelVector<T>) -> Result<(), PmgError> {
        self.check(coarse, fine)?;
        if !coarse.has_storage_type(StorageType::CONSISTENT) {
            let mut c = coarse.clone();
            c.change_storage_type(StorageType::CONSISTENT)?;
            self.p.apply(c.values(), fine.values_mut());
        } else {
            self.p.apply(coarse.values(), fine.values_mut());
        }
        fine.set_storage_type(StorageType::CONSISTENT);
        Ok(())
    }

    /// coarse = damping · Pᵀ fine
    pub fn restrict(&self, fine: &ParallelVector<T>, coarse: &mut ParallelVector<T>) -> Result<(), PmgError> {
        self.check(coarse, fine)?;
        if fine.has_storage_type(StorageType::ADDITIVE) {
            self.p.apply_transposed(fine.values(), coarse.values_mut());
        } else {
            let mut f = fine.clone();
            f.change_storage_type(StorageType::ADDITIVE)?;
            self.p.apply_transposed(f.values(), coarse.values_mut());
        }
        if self.damping != T::one() {
            coarse.scale(self.damping);
        }
        coarse.set_storage_type(StorageType::ADDITIVE);
        Ok(())
    }

    fn check(&self, coarse: &ParallelVector<T>, fine: &ParallelVector<T>) -> Result<(), PmgError> {
        if coarse.len() != self.coarse_size() {
            return Err(PmgError::DimensionMismatch { expected: self.coarse_size(), actual: coarse.len() });
        }
        if fine.len() != self.fine_size() {
            return Err(PmgError::DimensionMismatch { expected: self.fine_size(), actual: fine.len() });
        }
        Ok(())
    }
}

/// Projection of iterates to the next coarser level (coarse rows × fine columns).
#[derive(Clone, Debug)]
pub struct MatrixProjection<T> {
    r: SparseRowMatrix<T>,
}

impl<T: Scalar> MatrixProjection<T> {
    pub fn new(r: SparseRowMatrix<T>) -> Self {
        Self { r }
    }

    /// coarse = R fine, both consistent.
    pub fn apply(&self, fine: &ParallelVector<T>, coarse: &mut ParallelVector<T>) -> Result<(), PmgError> {
        if fine.len() != self.r.ncols() {
            return Err(PmgError::DimensionMismatch { expected: self.r.ncols(), actual: fine.len() });
        }
        if coarse.len() != self.r.nrows() {
            return Err(PmgError::DimensionMismatch { expected: self.r.nrows(), actual: coarse.len() });
        }
        if fine.has_storage_type(StorageType::CONSISTENT) {
            self.r.apply(fine.values(), coarse.values_mut());
        } else {
            let mut f = fine.clone();
            f.change_storage_type(StorageType::CONSISTENT)?;
            self.r.apply(f.values(), coarse.values_mut());
        }
        coarse.set_storage_type(StorageType::CONSISTENT);
        Ok(())
    }
}
