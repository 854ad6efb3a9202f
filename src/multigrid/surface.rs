//! Moving vectors between the caller's surface numbering and the surface level.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{ParallelMatrix, ParallelVector, SparseRowMatrix};
use crate::parallel::layout::AlgebraLayouts;

/// Index map from a (possibly partial) surface onto the full surface level.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceView {
    map: Option<Vec<usize>>,
    surface_size: usize,
    level_size: usize,
}

impl SurfaceView {
    /// `map[i]` is the level index of surface index `i`; `None` means the identity.
    pub fn new(map: Option<Vec<usize>>, surface_size: usize, level_size: usize) -> Result<Self, PmgError> {
        match &map {
            None if surface_size != level_size => {
                return Err(PmgError::DimensionMismatch { expected: level_size, actual: surface_size });
            }
            Some(m) => {
                if m.len() != surface_size {
                    return Err(PmgError::DimensionMismatch { expected: surface_size, actual: m.len() });
                }
                let mut seen = BTreeSet::new();
                for &k in m {
                    if k >= level_size || !seen.insert(k) {
                        return Err(PmgError::LayoutMismatch(format!(
                            "surface map entry {} is out of range or repeated (level size {})",
                            k, level_size
                        )));
                    }
                }
            }
            None => {}
        }
        Ok(Self { map, surface_size, level_size })
    }

    pub fn is_identity(&self) -> bool {
        self.map.is_none()
    }

    pub fn surface_size(&self) -> usize {
        self.surface_size
    }

    pub fn level_size(&self) -> usize {
        self.level_size
    }

    /// Copy a caller vector onto the surface level. Level entries outside the surface are zeroed.
    pub fn project<T: Scalar>(
        &self,
        surface: &ParallelVector<T>,
        level: &mut ParallelVector<T>,
    ) -> Result<(), PmgError> {
        self.check(surface, level)?;
        match &self.map {
            None => level.values_mut().copy_from_slice(surface.values()),
            Some(map) => {
                let out = level.values_mut();
                out.fill(T::zero());
                for (&k, &v) in map.iter().zip(surface.values()) {
                    out[k] = v;
                }
            }
        }
        level.set_storage_type(surface.storage());
        Ok(())
    }

    /// Copy surface-level values back into a caller vector.
    pub fn release<T: Scalar>(
        &self,
        level: &ParallelVector<T>,
        surface: &mut ParallelVector<T>,
    ) -> Result<(), PmgError> {
        self.check(surface, level)?;
        match &self.map {
            None => surface.values_mut().copy_from_slice(level.values()),
            Some(map) => {
                let src = level.values();
                for (&k, out) in map.iter().zip(surface.values_mut()) {
                    *out = src[k];
                }
            }
        }
        surface.set_storage_type(level.storage());
        Ok(())
    }

    /// Surface-level operator for a caller operator on the surface numbering.
    ///
    /// Level rows with no surface counterpart become identity rows.
    pub fn level_operator<T: Scalar>(
        &self,
        op: &Arc<ParallelMatrix<T>>,
        layouts: Arc<AlgebraLayouts>,
    ) -> Result<Arc<ParallelMatrix<T>>, PmgError> {
        if op.num_rows() != self.surface_size {
            return Err(PmgError::DimensionMismatch { expected: self.surface_size, actual: op.num_rows() });
        }
        let Some(map) = &self.map else {
            return Ok(Arc::clone(op));
        };
        let mut embed = SparseRowMatrix::new(self.surface_size, self.level_size);
        for (i, &k) in map.iter().enumerate() {
            embed.set(i, k, T::one());
        }
        let mut a = op.matrix().galerkin(&embed);
        let mapped: BTreeSet<usize> = map.iter().copied().collect();
        for k in (0..self.level_size).filter(|k| !mapped.contains(k)) {
            a.set_dirichlet_row(k);
        }
        Ok(Arc::new(ParallelMatrix::new(a, layouts).with_storage_type(op.storage())))
    }

    fn check<T: Scalar>(&self, surface: &ParallelVector<T>, level: &ParallelVector<T>) -> Result<(), PmgError> {
        if surface.len() != self.surface_size {
            return Err(PmgError::DimensionMismatch { expected: self.surface_size, actual: surface.len() });
        }
        if level.len() != self.level_size {
            return Err(PmgError::DimensionMismatch { expected: self.level_size, actual: level.len() });
        }
        Ok(())
    }
}
