//! Grid hierarchies: where the cycle gets level sizes, layouts, transfer operators and
//! (optionally) assembled level operators.

use std::sync::Arc;

use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{ParallelMatrix, SparseRowMatrix};
use crate::parallel::layout::AlgebraLayouts;

/// Per-process view of a multigrid hierarchy. Level 0 is the coarsest.
pub trait GridHierarchy<T: Scalar> {
    /// Whether this is a genuine level hierarchy. A flat (surface-only) grid answers `false`
    /// and is rejected by the cycle.
    fn is_multigrid(&self) -> bool {
        true
    }

    fn num_levels(&self) -> usize;

    /// Changes whenever the hierarchy's topology changes; the cycle reallocates on a new value.
    fn revision(&self) -> u64;

    fn level_layouts(&self, level: usize) -> Result<Arc<AlgebraLayouts>, PmgError>;

    /// Number of degrees of freedom this process holds on `level`.
    fn level_size(&self, level: usize) -> Result<usize, PmgError>;

    /// Prolongation from `coarse_level` to `coarse_level + 1`, with fine rows and coarse columns.
    fn prolongation(&self, coarse_level: usize) -> Result<SparseRowMatrix<T>, PmgError>;

    /// Projection of iterates from `coarse_level + 1` down to `coarse_level`.
    ///
    /// Defaults to the transposed prolongation with each row scaled to sum to one, which
    /// reproduces constants.
    fn projection(&self, coarse_level: usize) -> Result<SparseRowMatrix<T>, PmgError> {
        Ok(normalized_transpose(&self.prolongation(coarse_level)?))
    }

    /// Assembled operator for `level`, if the discretization provides one.
    fn level_operator(&self, _level: usize) -> Option<Arc<ParallelMatrix<T>>> {
        None
    }

    /// For adaptive surfaces: surface index `i` of the caller's vectors lives at level index
    /// `map[i]` on the surface level. `None` means the two coincide.
    fn surface_map(&self) -> Option<Vec<usize>> {
        None
    }
}

/// `Pᵀ` with every non-empty row scaled to unit row sum.
pub fn normalized_transpose<T: Scalar>(p: &SparseRowMatrix<T>) -> SparseRowMatrix<T> {
    let mut pt = p.transpose();
    for i in 0..pt.nrows() {
        let sum: T = pt.row(i).iter().map(|&(_, v)| v).sum();
        if sum != T::zero() {
            pt.scale_row(i, T::one() / sum);
        }
    }
    pt
}

struct StaticLevel<T> {
    layouts: Arc<AlgebraLayouts>,
    size: usize,
    // prolongation from the level below; absent on level 0
    prolongation: Option<SparseRowMatrix<T>>,
    operator: Option<Arc<ParallelMatrix<T>>>,
}

/// Hierarchy assembled up front from explicit prolongation matrices.
///
/// ```
/// use std::sync::Arc;
/// use pargmg::{StaticHierarchy, GridHierarchy, SparseRowMatrix};
/// use pargmg::parallel::AlgebraLayouts;
///
/// let serial = Arc::new(AlgebraLayouts::serial());
/// let p = SparseRowMatrix::from_triplets(3, 2, &[(0, 0, 1.0), (1, 0, 0.5), (1, 1, 0.5), (2, 1, 1.0)]);
/// let h = StaticHierarchy::<f64>::new(serial.clone(), 2).add_level(p, serial, 3).unwrap();
/// assert_eq!(h.num_levels(), 2);
/// assert_eq!(h.level_size(1).unwrap(), 3);
/// ```
pub struct StaticHierarchy<T> {
    levels: Vec<StaticLevel<T>>,
    surface_map: Option<Vec<usize>>,
    revision: u64,
}

impl<T: Scalar> StaticHierarchy<T> {
    /// Start with the coarsest level.
    pub fn new(layouts: Arc<AlgebraLayouts>, size: usize) -> Self {
        Self {
            levels: vec![StaticLevel { layouts, size, prolongation: None, operator: None }],
            surface_map: None,
            revision: 0,
        }
    }

    /// Serial hierarchy from a chain of prolongations, coarsest first.
    pub fn serial(coarse_size: usize, prolongations: Vec<SparseRowMatrix<T>>) -> Result<Self, PmgError> {
        let serial = Arc::new(AlgebraLayouts::serial());
        let mut h = Self::new(Arc::clone(&serial), coarse_size);
        for p in prolongations {
            let n = p.nrows();
            h = h.add_level(p, Arc::clone(&serial), n)?;
        }
        Ok(h)
    }

    /// Append a finer level reached from the current finest one by `prolongation`.
    pub fn add_level(
        mut self,
        prolongation: SparseRowMatrix<T>,
        layouts: Arc<AlgebraLayouts>,
        size: usize,
    ) -> Result<Self, PmgError> {
        let coarse = self.levels.last().map_or(0, |l| l.size);
        if prolongation.nrows() != size {
            return Err(PmgError::DimensionMismatch { expected: size, actual: prolongation.nrows() });
        }
        if prolongation.ncols() != coarse {
            return Err(PmgError::DimensionMismatch { expected: coarse, actual: prolongation.ncols() });
        }
        self.levels.push(StaticLevel { layouts, size, prolongation: Some(prolongation), operator: None });
        self.revision += 1;
        Ok(self)
    }

    /// Supply an assembled operator for `level` instead of a Galerkin product.
    pub fn with_level_operator(mut self, level: usize, op: Arc<ParallelMatrix<T>>) -> Result<Self, PmgError> {
        let entry = self.level_mut(level)?;
        if op.num_rows() != entry.size {
            return Err(PmgError::DimensionMismatch { expected: entry.size, actual: op.num_rows() });
        }
        entry.operator = Some(op);
        Ok(self)
    }

    pub fn with_surface_map(mut self, map: Vec<usize>) -> Self {
        self.surface_map = Some(map);
        self
    }

    /// Mark the topology as changed.
    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }

    fn level(&self, level: usize) -> Result<&StaticLevel<T>, PmgError> {
        let n = self.levels.len();
        self.levels
            .get(level)
            .ok_or_else(|| PmgError::Precondition(format!("level {} does not exist ({} levels)", level, n)))
    }

    fn level_mut(&mut self, level: usize) -> Result<&mut StaticLevel<T>, PmgError> {
        let n = self.levels.len();
        self.levels
            .get_mut(level)
            .ok_or_else(|| PmgError::Precondition(format!("level {} does not exist ({} levels)", level, n)))
    }
}

impl<T: Scalar> GridHierarchy<T> for StaticHierarchy<T> {
    fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn level_layouts(&self, level: usize) -> Result<Arc<AlgebraLayouts>, PmgError> {
        Ok(Arc::clone(&self.level(level)?.layouts))
    }

    fn level_size(&self, level: usize) -> Result<usize, PmgError> {
        Ok(self.level(level)?.size)
    }

    fn prolongation(&self, coarse_level: usize) -> Result<SparseRowMatrix<T>, PmgError> {
        self.level(coarse_level + 1)?
            .prolongation
            .clone()
            .ok_or(PmgError::NotInitialized("level has no prolongation"))
    }

    fn level_operator(&self, level: usize) -> Option<Arc<ParallelMatrix<T>>> {
        self.levels.get(level).and_then(|l| l.operator.clone())
    }

    fn surface_map(&self) -> Option<Vec<usize>> {
        self.surface_map.clone()
    }
}
