//! Distributed matrices and vectors.
//!
//! Each process stores its rows of a [`ParallelMatrix`] and its entries of a [`ParallelVector`],
//! together with the [`AlgebraLayouts`] relating them to copies on other processes. A vector is
//! tagged with how its entries combine into global values:
//!
//! - `CONSISTENT`: every copy holds the full value.
//! - `ADDITIVE`: the global value is the sum over all copies.
//! - `UNIQUE`: additive, with the whole value on the master copy and zeros elsewhere.
//!
//! Overlap ghost entries (master-overlap indices) are copies of remote values; they never
//! contribute to additive sums, inner products or norms.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use faer::Mat;

use super::sparse::SparseRowMatrix;
use crate::core::traits::{InnerProduct, Scalar};
use crate::error::PmgError;
use crate::parallel::layout::{AlgebraLayouts, LayoutRole};
use crate::parallel::policy::{InterfaceCommunicator, VecAdd, VecCopy, set_on_layout};
use crate::parallel::CommTag;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct StorageType: u8 {
        const ADDITIVE   = 0b001;
        const CONSISTENT = 0b010;
        const UNIQUE     = 0b100;
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(StorageType::ADDITIVE) {
            names.push("additive");
        }
        if self.contains(StorageType::CONSISTENT) {
            names.push("consistent");
        }
        if self.contains(StorageType::UNIQUE) {
            names.push("unique");
        }
        if names.is_empty() {
            write!(f, "undefined")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Process-local part of a distributed vector.
#[derive(Clone, Debug)]
pub struct ParallelVector<T> {
    values: Vec<T>,
    layouts: Arc<AlgebraLayouts>,
    storage: StorageType,
}

impl<T: Scalar> ParallelVector<T> {
    /// Zero vector of length `n`. A zero vector is valid in every storage type.
    pub fn new(layouts: Arc<AlgebraLayouts>, n: usize) -> Self {
        Self { values: vec![T::zero(); n], layouts, storage: StorageType::all() }
    }

    pub fn from_values(layouts: Arc<AlgebraLayouts>, values: Vec<T>, storage: StorageType) -> Self {
        Self { values, layouts, storage }
    }

    /// Single-process vector.
    pub fn serial(values: Vec<T>) -> Self {
        Self::from_values(Arc::new(AlgebraLayouts::serial()), values, StorageType::all())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn layouts(&self) -> &Arc<AlgebraLayouts> {
        &self.layouts
    }

    pub fn set_layouts(&mut self, layouts: Arc<AlgebraLayouts>) {
        self.layouts = layouts;
    }

    pub fn storage(&self) -> StorageType {
        self.storage
    }

    pub fn has_storage_type(&self, storage: StorageType) -> bool {
        self.storage.contains(storage)
    }

    /// Relabel without touching values.
    pub fn set_storage_type(&mut self, storage: StorageType) {
        self.storage = storage;
    }

    pub fn set(&mut self, value: T) {
        self.values.fill(value);
        self.storage = if value == T::zero() { StorageType::all() } else { StorageType::CONSISTENT };
    }

    /// Grow or shrink; new entries are zero.
    pub fn resize(&mut self, n: usize) {
        self.values.resize(n, T::zero());
    }

    pub fn copy_from(&mut self, other: &Self) -> Result<(), PmgError> {
        self.check_len(other)?;
        self.values.copy_from_slice(&other.values);
        self.storage = other.storage;
        Ok(())
    }

    /// self += alpha * x; the result keeps only the storage types both operands share.
    pub fn axpy(&mut self, alpha: T, x: &Self) -> Result<(), PmgError> {
        self.check_len(x)?;
        let storage = self.storage & x.storage;
        if storage.is_empty() {
            return Err(PmgError::StorageMismatch(format!(
                "cannot combine {} and {} vectors",
                self.storage, x.storage
            )));
        }
        for (s, &xi) in self.values.iter_mut().zip(&x.values) {
            *s += alpha * xi;
        }
        self.storage = storage;
        Ok(())
    }

    pub fn add_assign(&mut self, x: &Self) -> Result<(), PmgError> {
        self.axpy(T::one(), x)
    }

    pub fn sub_assign(&mut self, x: &Self) -> Result<(), PmgError> {
        self.axpy(-T::one(), x)
    }

    pub fn scale(&mut self, alpha: T) {
        for v in &mut self.values {
            *v *= alpha;
        }
    }

    /// Zero the entries listed in one layout.
    pub fn zero_on_layout(&mut self, role: LayoutRole) {
        let layouts = Arc::clone(&self.layouts);
        set_on_layout(&mut self.values, layouts.layout(role), T::zero());
    }

    /// Convert to `target`, which must be exactly one of the three storage flags.
    pub fn change_storage_type(&mut self, target: StorageType) -> Result<(), PmgError> {
        if self.storage.contains(target) {
            return Ok(());
        }
        if self.storage.is_empty() {
            return Err(PmgError::StorageMismatch("vector has no defined storage type".into()));
        }
        if target == StorageType::CONSISTENT {
            // additive or unique input
            self.additive_to_consistent()?;
            self.storage = StorageType::CONSISTENT;
        } else if target == StorageType::ADDITIVE || target == StorageType::UNIQUE {
            if !self.storage.contains(StorageType::CONSISTENT) {
                self.gather_on_masters()?;
            }
            self.zero_non_owned();
            self.storage = StorageType::ADDITIVE | StorageType::UNIQUE;
        } else {
            return Err(PmgError::StorageMismatch(format!("{} is not a single storage type", target)));
        }
        Ok(())
    }

    /// Copy owner values onto overlap ghost entries.
    pub fn sync_overlap(&mut self) -> Result<(), PmgError> {
        if !self.layouts.overlap_enabled() {
            return Ok(());
        }
        let layouts = Arc::clone(&self.layouts);
        InterfaceCommunicator::new(layouts.comm()).exchange(
            &layouts.slave_overlap,
            &layouts.master_overlap,
            &mut VecCopy::new(&mut self.values),
            CommTag::VEC_OVERLAP,
        )
    }

    /// Global inner product. Operands are brought into a consistent/additive pairing first.
    pub fn dot(&self, other: &Self) -> Result<T, PmgError> {
        self.check_len(other)?;
        let local = if self.has_storage_type(StorageType::CONSISTENT)
            && other.has_storage_type(StorageType::ADDITIVE)
        {
            self.local_dot(&self.values, &other.values)
        } else if self.has_storage_type(StorageType::ADDITIVE)
            && other.has_storage_type(StorageType::CONSISTENT)
        {
            self.local_dot(&self.values, &other.values)
        } else {
            let mut c = self.clone();
            c.change_storage_type(StorageType::CONSISTENT)?;
            let mut a = other.clone();
            a.change_storage_type(StorageType::ADDITIVE)?;
            self.local_dot(&c.values, &a.values)
        };
        self.reduce(local)
    }

    /// Global Euclidean norm.
    pub fn norm(&self) -> Result<T, PmgError> {
        let local = if self.has_storage_type(StorageType::UNIQUE) {
            self.local_dot(&self.values, &self.values)
        } else {
            let mut u = self.clone();
            u.change_storage_type(StorageType::UNIQUE)?;
            self.local_dot(&u.values, &u.values)
        };
        Ok(self.reduce(local)?.sqrt())
    }

    fn reduce(&self, local: T) -> Result<T, PmgError> {
        let global = self.layouts.comm().all_reduce(local.to_f64().unwrap_or(f64::NAN))?;
        Ok(<T as From<f64>>::from(global))
    }

    fn local_dot(&self, a: &[T], b: &[T]) -> T {
        if self.layouts.overlap_enabled() && !self.layouts.master_overlap.is_empty() {
            let ghosts: BTreeSet<usize> = self.layouts.master_overlap.indices();
            a.iter()
                .zip(b)
                .enumerate()
                .filter(|(i, _)| !ghosts.contains(i))
                .map(|(_, (&x, &y))| x * y)
                .sum()
        } else {
            ().dot(a, b)
        }
    }

    fn zero_non_owned(&mut self) {
        self.zero_on_layout(LayoutRole::Slave);
        if self.layouts.overlap_enabled() {
            self.zero_on_layout(LayoutRole::MasterOverlap);
        }
    }

    fn gather_on_masters(&mut self) -> Result<(), PmgError> {
        let layouts = Arc::clone(&self.layouts);
        InterfaceCommunicator::new(layouts.comm()).exchange(
            &layouts.slave,
            &layouts.master,
            &mut VecAdd::new(&mut self.values),
            CommTag::VEC_ADD,
        )
    }

    fn additive_to_consistent(&mut self) -> Result<(), PmgError> {
        self.gather_on_masters()?;
        let layouts = Arc::clone(&self.layouts);
        InterfaceCommunicator::new(layouts.comm()).exchange(
            &layouts.master,
            &layouts.slave,
            &mut VecCopy::new(&mut self.values),
            CommTag::VEC_COPY,
        )?;
        self.sync_overlap()
    }

    fn check_len(&self, other: &Self) -> Result<(), PmgError> {
        if self.len() != other.len() {
            return Err(PmgError::DimensionMismatch { expected: self.len(), actual: other.len() });
        }
        Ok(())
    }
}

/// Process-local rows of a distributed matrix.
///
/// An `ADDITIVE` matrix is the sum of its copies, as left by assembly. A `CONSISTENT` matrix
/// holds the full row on every copy of a shared row, as left by overlap construction.
#[derive(Clone, Debug)]
pub struct ParallelMatrix<T> {
    matrix: SparseRowMatrix<T>,
    layouts: Arc<AlgebraLayouts>,
    storage: StorageType,
}

impl<T: Scalar> ParallelMatrix<T> {
    /// Additively stored matrix.
    pub fn new(matrix: SparseRowMatrix<T>, layouts: Arc<AlgebraLayouts>) -> Self {
        Self { matrix, layouts, storage: StorageType::ADDITIVE }
    }

    pub fn serial(matrix: SparseRowMatrix<T>) -> Self {
        Self::new(matrix, Arc::new(AlgebraLayouts::serial()))
    }

    pub fn with_storage_type(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    pub fn matrix(&self) -> &SparseRowMatrix<T> {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut SparseRowMatrix<T> {
        &mut self.matrix
    }

    pub fn layouts(&self) -> &Arc<AlgebraLayouts> {
        &self.layouts
    }

    /// Install a new layout object on this matrix only. Other holders of the old one keep it.
    pub fn set_layouts(&mut self, layouts: Arc<AlgebraLayouts>) {
        self.layouts = layouts;
    }

    pub fn storage(&self) -> StorageType {
        self.storage
    }

    pub fn set_storage_type(&mut self, storage: StorageType) {
        self.storage = storage;
    }

    pub fn num_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Zero vector compatible with this matrix.
    pub fn create_vector(&self) -> ParallelVector<T> {
        ParallelVector::new(Arc::clone(&self.layouts), self.num_rows())
    }

    /// y = A x with consistent `x`; `y` is additive.
    pub fn apply(&self, x: &ParallelVector<T>, y: &mut ParallelVector<T>) -> Result<(), PmgError> {
        self.check_operand(x)?;
        Self::require_consistent(x)?;
        self.check_operand(y)?;
        let storage = self.local_product(x, y.values_mut())?;
        y.set_storage_type(storage);
        Ok(())
    }

    /// d -= A x with consistent `x`; `d` ends up additive.
    pub fn apply_sub(&self, x: &ParallelVector<T>, d: &mut ParallelVector<T>) -> Result<(), PmgError> {
        self.check_operand(x)?;
        Self::require_consistent(x)?;
        self.check_operand(d)?;
        d.change_storage_type(StorageType::ADDITIVE)?;
        let mut ax = vec![T::zero(); d.len()];
        self.local_product(x, &mut ax)?;
        for (di, ai) in d.values_mut().iter_mut().zip(ax) {
            *di -= ai;
        }
        d.set_storage_type(StorageType::ADDITIVE);
        Ok(())
    }

    /// Local rows times `x`, returning the storage type of the result.
    ///
    /// Rows of a consistent matrix are complete on every copy, so only the master copy keeps
    /// its value and the result is unique.
    fn local_product(&self, x: &ParallelVector<T>, y: &mut [T]) -> Result<StorageType, PmgError> {
        self.matrix.apply(x.values(), y);
        if self.storage.contains(StorageType::ADDITIVE) {
            Ok(StorageType::ADDITIVE)
        } else if self.storage.contains(StorageType::CONSISTENT) {
            set_on_layout(y, &self.layouts.slave, T::zero());
            if self.layouts.overlap_enabled() {
                set_on_layout(y, &self.layouts.master_overlap, T::zero());
            }
            Ok(StorageType::ADDITIVE | StorageType::UNIQUE)
        } else {
            Err(PmgError::StorageMismatch(format!("matrix storage {} cannot be applied", self.storage)))
        }
    }

    /// Diagonal summed over all copies of each row.
    pub fn consistent_diagonal(&self) -> Result<Vec<T>, PmgError> {
        if self.storage.contains(StorageType::CONSISTENT) {
            return Ok(self.matrix.diagonal());
        }
        let mut diag = ParallelVector::from_values(
            Arc::clone(&self.layouts),
            self.matrix.diagonal(),
            StorageType::ADDITIVE,
        );
        diag.change_storage_type(StorageType::CONSISTENT)?;
        Ok(diag.values)
    }

    fn check_operand(&self, v: &ParallelVector<T>) -> Result<(), PmgError> {
        if v.len() != self.num_rows() {
            return Err(PmgError::DimensionMismatch { expected: self.num_rows(), actual: v.len() });
        }
        Ok(())
    }

    fn require_consistent(x: &ParallelVector<T>) -> Result<(), PmgError> {
        if !x.has_storage_type(StorageType::CONSISTENT) {
            return Err(PmgError::StorageMismatch(format!(
                "operand must be consistent, found {}",
                x.storage()
            )));
        }
        Ok(())
    }
}

/// Operator handed to smoothers and solvers, resolved once at `init`.
#[derive(Clone)]
pub enum OperatorHandle<T> {
    /// Distributed sparse operator.
    Assembled(Arc<ParallelMatrix<T>>),
    /// Dense single-process operator.
    Dense(Arc<Mat<T>>),
}

impl<T: Scalar> OperatorHandle<T> {
    pub fn nrows(&self) -> usize {
        match self {
            OperatorHandle::Assembled(a) => a.num_rows(),
            OperatorHandle::Dense(a) => a.nrows(),
        }
    }

    pub fn assembled(&self) -> Result<&Arc<ParallelMatrix<T>>, PmgError> {
        match self {
            OperatorHandle::Assembled(a) => Ok(a),
            OperatorHandle::Dense(_) => Err(PmgError::Unsupported("operation requires an assembled sparse operator")),
        }
    }
}

impl<T: Scalar> fmt::Debug for OperatorHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorHandle::Assembled(a) => write!(f, "Assembled({} rows)", a.num_rows()),
            OperatorHandle::Dense(a) => write!(f, "Dense({}x{})", a.nrows(), a.ncols()),
        }
    }
}

impl<T> From<Arc<ParallelMatrix<T>>> for OperatorHandle<T> {
    fn from(a: Arc<ParallelMatrix<T>>) -> Self {
        OperatorHandle::Assembled(a)
    }
}

impl<T> From<ParallelMatrix<T>> for OperatorHandle<T> {
    fn from(a: ParallelMatrix<T>) -> Self {
        OperatorHandle::Assembled(Arc::new(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::{Comm, IndexLayout, run_ranks};
    use approx::assert_relative_eq;

    // global unknowns g0 g1 g2; rank 0 holds [g0, g1] and masters g1, rank 1 holds [g1, g2]
    fn split_layouts(comm: Arc<dyn Comm>) -> Arc<AlgebraLayouts> {
        let layouts = if comm.rank() == 0 {
            AlgebraLayouts::new(comm).with_master(IndexLayout::from_pairs([(1, vec![1])]))
        } else {
            AlgebraLayouts::new(comm).with_slave(IndexLayout::from_pairs([(0, vec![0])]))
        };
        Arc::new(layouts)
    }

    fn additive(comm: Arc<dyn Comm>) -> ParallelVector<f64> {
        let values = if comm.rank() == 0 { vec![1.0, 2.0] } else { vec![3.0, 4.0] };
        ParallelVector::from_values(split_layouts(comm), values, StorageType::ADDITIVE)
    }

    #[test]
    fn additive_to_consistent_and_unique() {
        let out = run_ranks(2, |comm| {
            let mut c = additive(comm.clone());
            c.change_storage_type(StorageType::CONSISTENT).unwrap();
            let mut u = additive(comm);
            u.change_storage_type(StorageType::UNIQUE).unwrap();
            (c.values().to_vec(), u.values().to_vec(), u.storage())
        });
        assert_eq!(out[0].0, vec![1.0, 5.0]);
        assert_eq!(out[1].0, vec![5.0, 4.0]);
        assert_eq!(out[0].1, vec![1.0, 5.0]);
        assert_eq!(out[1].1, vec![0.0, 4.0]);
        assert!(out[1].2.contains(StorageType::ADDITIVE | StorageType::UNIQUE));
    }

    /// The identity counts the shared row once when consistent and twice when additive.
    #[test]
    fn product_follows_matrix_storage() {
        let out = run_ranks(2, |comm| {
            let layouts = split_layouts(comm);
            let eye = SparseRowMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 1.0)]);
            let x = ParallelVector::from_values(Arc::clone(&layouts), vec![1.0; 2], StorageType::CONSISTENT);
            let mut results = Vec::new();
            for storage in [StorageType::ADDITIVE, StorageType::CONSISTENT] {
                let a = ParallelMatrix::new(eye.clone(), Arc::clone(&layouts)).with_storage_type(storage);
                let mut y = a.create_vector();
                a.apply(&x, &mut y).unwrap();
                let local = y.values().to_vec();
                let flags = y.storage();
                y.change_storage_type(StorageType::CONSISTENT).unwrap();
                results.push((local, flags, y.values().to_vec()));
            }
            results
        });
        let (add0, add_flags, add_global0) = &out[0][0];
        assert_eq!(add0, &vec![1.0, 1.0]);
        assert_eq!(*add_flags, StorageType::ADDITIVE);
        assert_eq!(add_global0, &vec![1.0, 2.0]);

        let (_, cons_flags, cons_global0) = &out[0][1];
        assert_eq!(*cons_flags, StorageType::ADDITIVE | StorageType::UNIQUE);
        assert_eq!(cons_global0, &vec![1.0, 1.0]);
        // slave copy zeroed locally
        assert_eq!(out[1][1].0, vec![0.0, 1.0]);
        assert_eq!(out[1][1].2, vec![1.0, 1.0]);
    }

    #[test]
    fn distributed_norm_and_dot() {
        let out = run_ranks(2, |comm| {
            let a = additive(comm);
            let mut c = a.clone();
            c.change_storage_type(StorageType::CONSISTENT).unwrap();
            (a.norm().unwrap(), c.dot(&a).unwrap(), c.dot(&c).unwrap())
        });
        for (norm, dot_ca, dot_cc) in out {
            assert_relative_eq!(norm, 42f64.sqrt(), epsilon = 1e-12);
            assert_relative_eq!(dot_ca, 42.0, epsilon = 1e-12);
            assert_relative_eq!(dot_cc, 42.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn mixing_incompatible_storage_fails() {
        let mut a = ParallelVector::serial(vec![1.0, 2.0]);
        a.set_storage_type(StorageType::ADDITIVE);
        let mut b = ParallelVector::serial(vec![1.0, 1.0]);
        b.set_storage_type(StorageType::CONSISTENT);
        assert!(matches!(a.add_assign(&b), Err(PmgError::StorageMismatch(_))));
    }

    #[test]
    fn apply_sub_needs_consistent_operand() {
        let a = ParallelMatrix::serial(SparseRowMatrix::identity(2));
        let mut x = ParallelVector::serial(vec![1.0, 1.0]);
        x.set_storage_type(StorageType::ADDITIVE);
        let mut d = a.create_vector();
        assert!(a.apply_sub(&x, &mut d).is_err());
        x.set_storage_type(StorageType::CONSISTENT);
        a.apply_sub(&x, &mut d).unwrap();
        assert_eq!(d.values(), &[-1.0, -1.0]);
        assert_eq!(d.storage(), StorageType::ADDITIVE);
    }

    #[test]
    fn dense_handle_is_not_assembled() {
        let h: OperatorHandle<f64> = OperatorHandle::Dense(Arc::new(Mat::zeros(2, 2)));
        assert_eq!(h.nrows(), 2);
        assert!(matches!(h.assembled(), Err(PmgError::Unsupported(_))));
    }
}
