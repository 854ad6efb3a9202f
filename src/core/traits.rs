//! Core linear-algebra traits for pargmg.

use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::{AddAssign, MulAssign, SubAssign};

use bytemuck::Pod;
use num_traits::Float;

/// Scalar entry type of matrices, vectors and wire payloads.
///
/// `Pod` lets values travel through communication buffers as raw bytes.
pub trait Scalar:
    Float
    + From<f64>
    + Pod
    + Default
    + Debug
    + Display
    + Send
    + Sync
    + AddAssign
    + SubAssign
    + MulAssign
    + Sum
    + 'static
{
}

impl<T> Scalar for T where
    T: Float
        + From<f64>
        + Pod
        + Default
        + Debug
        + Display
        + Send
        + Sync
        + AddAssign
        + SubAssign
        + MulAssign
        + Sum
        + 'static
{
}

/// Matrix–vector product: y ← A x.
pub trait MatVec<V> {
    /// Compute y = A · x.
    fn matvec(&self, x: &V, y: &mut V);
}

/// Transposed matrix–vector product: y ← Aᵀ x.
pub trait MatTransVec<V> {
    /// Compute y = Aᵀ · x.
    fn mattransvec(&self, x: &V, y: &mut V);
}

/// Inner products & norms.
pub trait InnerProduct<V: ?Sized> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd + From<f64>;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Self::Scalar;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Self::Scalar;
}
