use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{OperatorHandle, ParallelMatrix, ParallelVector, StorageType};
use crate::preconditioner::LinearIterator;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MatSorType: u32 {
        const APPLY_LOWER     = 0b01; // forward Gauss–Seidel
        const APPLY_UPPER     = 0b10; // backward
        const SYMMETRIC_SWEEP = Self::APPLY_LOWER.bits() | Self::APPLY_UPPER.bits();
    }
}

/// Process-local SOR sweeps over the rows this process owns.
///
/// The defect is made unique, each process sweeps its owned rows with the consistent diagonal,
/// and the resulting unique correction is made consistent again. With one process and
/// `omega = 1` this is plain Gauss–Seidel.
#[derive(Clone, Debug)]
pub struct Sor<T> {
    pub its: usize,
    pub sym: MatSorType,
    pub omega: T,
    inv_diag: Vec<T>,
    owned: Vec<bool>,
    op: Option<Arc<ParallelMatrix<T>>>,
}

impl<T: Scalar> Sor<T> {
    pub fn new(omega: T, its: usize, sym: MatSorType) -> Self {
        Self { its, sym, omega, inv_diag: Vec::new(), owned: Vec::new(), op: None }
    }

    /// Forward Gauss–Seidel, one sweep.
    pub fn gauss_seidel() -> Self {
        Self::new(T::one(), 1, MatSorType::APPLY_LOWER)
    }

    pub fn set_omega(&mut self, omega: T) { self.omega = omega; }
    pub fn omega(&self) -> T { self.omega }
    pub fn set_its(&mut self, its: usize) { self.its = its; }
    pub fn its(&self) -> usize { self.its }
    pub fn set_sym(&mut self, sym: MatSorType) { self.sym = sym; }
    pub fn sym(&self) -> MatSorType { self.sym }

    fn relax_row(&self, a: &ParallelMatrix<T>, d: &[T], x: &mut [T], i: usize) {
        if !self.owned[i] {
            return;
        }
        let sigma: T = a.matrix().row(i).iter().filter(|&&(j, _)| j != i).map(|&(j, v)| v * x[j]).sum();
        let gs = (d[i] - sigma) * self.inv_diag[i];
        x[i] = (T::one() - self.omega) * x[i] + self.omega * gs;
    }
}

impl<T: Scalar> fmt::Display for Sor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOR(omega={}, its={}, sym={:?})", self.omega, self.its, self.sym)
    }
}

impl<T: Scalar> LinearIterator<T> for Sor<T> {
    fn name(&self) -> &'static str {
        "SOR"
    }

    fn init(&mut self, op: &OperatorHandle<T>) -> Result<(), PmgError> {
        let a = Arc::clone(op.assembled()?);
        let n = a.num_rows();
        let diag = a.consistent_diagonal()?;
        self.inv_diag.clear();
        for (i, aii) in diag.into_iter().enumerate() {
            if aii == T::zero() {
                return Err(PmgError::ZeroPivot(i));
            }
            self.inv_diag.push(T::one() / aii);
        }
        let layouts = a.layouts();
        let mut not_owned: BTreeSet<usize> = layouts.slave.indices();
        if layouts.overlap_enabled() {
            not_owned.extend(layouts.master_overlap.indices());
        }
        self.owned = (0..n).map(|i| !not_owned.contains(&i)).collect();
        self.op = Some(a);
        Ok(())
    }

    fn apply(&mut self, d: &ParallelVector<T>, c: &mut ParallelVector<T>) -> Result<(), PmgError> {
        let a = self.op.clone().ok_or(PmgError::NotInitialized("SOR: apply called before init"))?;
        let n = a.num_rows();
        if d.len() != n || c.len() != n {
            return Err(PmgError::DimensionMismatch { expected: n, actual: d.len() });
        }
        let mut du = d.clone();
        du.change_storage_type(StorageType::UNIQUE)?;
        let mut x = vec![T::zero(); n];
        for _ in 0..self.its {
            if self.sym.contains(MatSorType::APPLY_LOWER) {
                for i in 0..n {
                    self.relax_row(&a, du.values(), &mut x, i);
                }
            }
            if self.sym.contains(MatSorType::APPLY_UPPER) {
                for i in (0..n).rev() {
                    self.relax_row(&a, du.values(), &mut x, i);
                }
            }
        }
        c.values_mut().copy_from_slice(&x);
        c.set_storage_type(StorageType::ADDITIVE | StorageType::UNIQUE);
        c.change_storage_type(StorageType::CONSISTENT)
    }

    fn operator(&self) -> Option<Arc<ParallelMatrix<T>>> {
        self.op.clone()
    }

    fn clone_box(&self) -> Box<dyn LinearIterator<T>> {
        Box::new(Sor::new(self.omega, self.its, self.sym))
    }
}
