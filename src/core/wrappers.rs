//! Trait implementations for `faer::Mat` and `Vec<T>`.
//!
//! Dense `faer` matrices show up as coarse-level operators handed to the LU base solver and as
//! reference operators in tests; plain vectors carry the process-local part of every
//! distributed vector. The inner product here is purely local; the distributed reduction
//! happens in [`crate::matrix::ParallelVector`].

use crate::core::traits::{InnerProduct, MatTransVec, MatVec, Scalar};
use faer::Mat;

impl<T: Scalar> MatVec<Vec<T>> for Mat<T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        assert_eq!(self.nrows(), y.len(), "Output vector y has incorrect length");
        assert_eq!(self.ncols(), x.len(), "Input vector x has incorrect length");
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = (0..self.ncols()).map(|j| self[(i, j)] * x[j]).sum();
        }
    }
}

impl<T: Scalar> MatTransVec<Vec<T>> for Mat<T> {
    fn mattransvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        assert_eq!(self.ncols(), y.len(), "Output vector y has incorrect length");
        assert_eq!(self.nrows(), x.len(), "Input vector x has incorrect length");
        for (j, yj) in y.iter_mut().enumerate() {
            *yj = (0..self.nrows()).map(|i| self[(i, j)] * x[i]).sum();
        }
    }
}

/// Local inner product and norm on slices, with optional Rayon parallelism.
impl<T: Scalar> InnerProduct<[T]> for () {
    type Scalar = T;

    fn dot(&self, x: &[T], y: &[T]) -> T {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            x.par_iter()
                .zip(y.par_iter())
                .map(|(xi, yi)| *xi * *yi)
                .reduce(T::zero, |acc, v| acc + v)
        }
        #[cfg(not(feature = "rayon"))]
        {
            x.iter().zip(y.iter()).map(|(xi, yi)| *xi * *yi).sum()
        }
    }

    fn norm(&self, x: &[T]) -> T {
        self.dot(x, x).sqrt()
    }
}
