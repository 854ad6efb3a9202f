// Row-wise sparse matrix used for distributed operators

use faer::traits::ComplexField;

use crate::core::traits::{MatTransVec, MatVec, Scalar};

/// Sparse matrix stored as one sorted `(column, value)` list per row.
///
/// Rows can grow, shrink and be rewritten in place, which the overlap construction relies on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparseRowMatrix<T> {
    ncols: usize,
    rows: Vec<Vec<(usize, T)>>,
}

impl<T: Scalar> SparseRowMatrix<T> {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self { ncols, rows: vec![Vec::new(); nrows] }
    }

    pub fn identity(n: usize) -> Self {
        Self { ncols: n, rows: (0..n).map(|i| vec![(i, T::one())]).collect() }
    }

    /// Build from `(row, col, value)` triplets; duplicates are summed.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, T)]) -> Self {
        let mut m = Self::new(nrows, ncols);
        for &(i, j, v) in triplets {
            m.add(i, j, v);
        }
        m
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn num_nonzeros(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn row(&self, i: usize) -> &[(usize, T)] {
        &self.rows[i]
    }

    pub fn get(&self, i: usize, j: usize) -> T {
        let row = &self.rows[i];
        match row.binary_search_by_key(&j, |&(c, _)| c) {
            Ok(pos) => row[pos].1,
            Err(_) => T::zero(),
        }
    }

    pub fn has_entry(&self, i: usize, j: usize) -> bool {
        self.rows[i].binary_search_by_key(&j, |&(c, _)| c).is_ok()
    }

    /// Mutable access to entry (i, j), inserting a zero if it is not stored yet.
    pub fn entry(&mut self, i: usize, j: usize) -> &mut T {
        debug_assert!(j < self.ncols, "column {} out of range {}", j, self.ncols);
        let row = &mut self.rows[i];
        let pos = match row.binary_search_by_key(&j, |&(c, _)| c) {
            Ok(pos) => pos,
            Err(pos) => {
                row.insert(pos, (j, T::zero()));
                pos
            }
        };
        &mut row[pos].1
    }

    pub fn add(&mut self, i: usize, j: usize, v: T) {
        *self.entry(i, j) += v;
    }

    pub fn set(&mut self, i: usize, j: usize, v: T) {
        *self.entry(i, j) = v;
    }

    pub fn clear_row(&mut self, i: usize) {
        self.rows[i].clear();
    }

    pub fn scale_row(&mut self, i: usize, alpha: T) {
        for (_, v) in &mut self.rows[i] {
            *v *= alpha;
        }
    }

    /// Replace row `i` by the unit row `e_i`.
    pub fn set_dirichlet_row(&mut self, i: usize) {
        self.rows[i].clear();
        self.rows[i].push((i, T::one()));
    }

    /// Change the shape; stored entries inside the new shape survive.
    pub fn resize_and_keep_values(&mut self, nrows: usize, ncols: usize) {
        self.rows.resize_with(nrows, Vec::new);
        if ncols < self.ncols {
            for row in &mut self.rows {
                row.retain(|&(c, _)| c < ncols);
            }
        }
        self.ncols = ncols;
    }

    pub fn diagonal(&self) -> Vec<T> {
        (0..self.nrows()).map(|i| self.get(i, i)).collect()
    }

    /// y = A x
    pub fn apply(&self, x: &[T], y: &mut [T]) {
        assert_eq!(x.len(), self.ncols, "Input vector x has incorrect length");
        assert_eq!(y.len(), self.nrows(), "Output vector y has incorrect length");
        let row_dot = |row: &Vec<(usize, T)>| row.iter().map(|&(j, a)| a * x[j]).sum::<T>();
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            y.par_iter_mut().zip(self.rows.par_iter()).for_each(|(yi, row)| *yi = row_dot(row));
        }
        #[cfg(not(feature = "rayon"))]
        {
            for (yi, row) in y.iter_mut().zip(&self.rows) {
                *yi = row_dot(row);
            }
        }
    }

    /// y = Aᵀ x
    pub fn apply_transposed(&self, x: &[T], y: &mut [T]) {
        assert_eq!(x.len(), self.nrows(), "Input vector x has incorrect length");
        assert_eq!(y.len(), self.ncols, "Output vector y has incorrect length");
        y.fill(T::zero());
        for (row, &xi) in self.rows.iter().zip(x) {
            for &(j, a) in row {
                y[j] += a * xi;
            }
        }
    }

    pub fn transpose(&self) -> Self {
        let mut t = Self::new(self.ncols, self.nrows());
        for (i, row) in self.rows.iter().enumerate() {
            for &(j, a) in row {
                t.rows[j].push((i, a));
            }
        }
        t
    }

    /// Sparse product `self * rhs`.
    pub fn mat_mult(&self, rhs: &Self) -> Self {
        assert_eq!(self.ncols, rhs.nrows(), "inner dimensions differ");
        let mut out = Self::new(self.nrows(), rhs.ncols);
        for (i, row) in self.rows.iter().enumerate() {
            for &(k, a) in row {
                for &(j, b) in rhs.row(k) {
                    out.add(i, j, a * b);
                }
            }
        }
        out
    }

    /// Galerkin product `Pᵀ A P` with `self` as `A`.
    pub fn galerkin(&self, p: &Self) -> Self {
        p.transpose().mat_mult(&self.mat_mult(p))
    }
}

impl<T: Scalar + ComplexField> SparseRowMatrix<T> {
    pub fn to_dense(&self) -> faer::Mat<T> {
        let mut dense = faer::Mat::<T>::zeros(self.nrows(), self.ncols);
        for (i, row) in self.rows.iter().enumerate() {
            for &(j, a) in row {
                dense[(i, j)] = a;
            }
        }
        dense
    }
}

impl<T: Scalar> MatVec<Vec<T>> for SparseRowMatrix<T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        self.apply(x, y);
    }
}

impl<T: Scalar> MatTransVec<Vec<T>> for SparseRowMatrix<T> {
    fn mattransvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        self.apply_transposed(x, y);
    }
}
