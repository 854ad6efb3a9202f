//! The multigrid cycle controller.
//!
//! [`GeometricMultigrid`] runs one recursive coarse-grid correction cycle per application:
//! presmoothing, restriction of the defect, recursion on the coarser level (once for a V-cycle,
//! twice for a W-cycle), prolongation of the coarse correction, defect update and
//! postsmoothing. At the base level a base solver replaces the recursion.
//!
//! Coarser levels may live on fewer processes. A level whose layouts carry vertical-slave
//! interfaces hands its restricted defect to the vertical-master process and does not recurse;
//! it receives the finished coarse correction back on the way up. The exchange is a blocking
//! receive, so every process taking part in one level's vertical exchange has to reach it.

use std::sync::Arc;

use log::{debug, error, trace};

use super::hierarchy::GridHierarchy;
use super::surface::SurfaceView;
use super::transfer::{MatrixProjection, MatrixTransfer};
use crate::config::MultigridOptions;
use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{OperatorHandle, ParallelMatrix, ParallelVector, StorageType};
use crate::parallel::layout::AlgebraLayouts;
use crate::parallel::policy::{InterfaceCommunicator, VecAdd, VecCopy};
use crate::parallel::CommTag;
use crate::preconditioner::LinearIterator;

/// Storage for one level.
struct Level<T: Scalar> {
    layouts: Arc<AlgebraLayouts>,
    /// projected iterate
    u: ParallelVector<T>,
    /// correction
    c: ParallelVector<T>,
    /// defect
    d: ParallelVector<T>,
    /// scratch for smoothing steps and prolongated corrections
    t: ParallelVector<T>,
    op: Option<Arc<ParallelMatrix<T>>>,
    pre: Option<Box<dyn LinearIterator<T>>>,
    post: Option<Box<dyn LinearIterator<T>>>,
    visited: bool,
}

impl<T: Scalar> Level<T> {
    fn new(layouts: Arc<AlgebraLayouts>, n: usize) -> Self {
        Self {
            u: ParallelVector::new(Arc::clone(&layouts), n),
            c: ParallelVector::new(Arc::clone(&layouts), n),
            d: ParallelVector::new(Arc::clone(&layouts), n),
            t: ParallelVector::new(Arc::clone(&layouts), n),
            layouts,
            op: None,
            pre: None,
            post: None,
            visited: false,
        }
    }

    /// `nu` smoothing steps; every step updates `d` and adds its correction to `c`.
    fn smooth(&mut self, nu: usize, post: bool) -> Result<(), PmgError> {
        if nu == 0 {
            return Ok(());
        }
        let Level { c, d, t, pre, post: post_smoother, .. } = self;
        let smoother = if post { post_smoother } else { pre };
        let smoother = smoother.as_mut().ok_or(PmgError::NotInitialized("level has no smoother"))?;
        for _ in 0..nu {
            smoother.apply_update_defect(d, t)?;
            c.add_assign(t)?;
        }
        Ok(())
    }

    fn operator(&self) -> Result<&Arc<ParallelMatrix<T>>, PmgError> {
        self.op.as_ref().ok_or(PmgError::NotInitialized("level has no operator"))
    }
}

fn level_mut<T: Scalar>(levels: &mut [Option<Level<T>>], lev: usize) -> Result<&mut Level<T>, PmgError> {
    levels
        .get_mut(lev)
        .and_then(Option::as_mut)
        .ok_or(PmgError::NotInitialized("multigrid level storage is not allocated"))
}

/// Fine level `lev` and its coarse neighbour `lev - 1`, borrowed together.
fn level_pair<T: Scalar>(
    levels: &mut [Option<Level<T>>],
    lev: usize,
) -> Result<(&mut Level<T>, &mut Level<T>), PmgError> {
    let (lower, upper) = levels.split_at_mut(lev);
    let coarse = lower.last_mut().and_then(Option::as_mut);
    let fine = upper.first_mut().and_then(Option::as_mut);
    match (fine, coarse) {
        (Some(f), Some(c)) => Ok((f, c)),
        _ => Err(PmgError::NotInitialized("multigrid level storage is not allocated")),
    }
}

/// Parallel geometric multigrid, usable as a preconditioner or as a standalone iteration.
///
/// Lifecycle: [`init`](LinearIterator::init) with the surface operator, then
/// [`prepare`](LinearIterator::prepare) with the current iterate, then any number of
/// [`apply`](LinearIterator::apply) / [`apply_update_defect`](LinearIterator::apply_update_defect)
/// calls. Any failure frees all level storage; a later `prepare` starts over.
pub struct GeometricMultigrid<T: Scalar> {
    hierarchy: Arc<dyn GridHierarchy<T>>,
    options: MultigridOptions,
    presmoother: Option<Box<dyn LinearIterator<T>>>,
    postsmoother: Option<Box<dyn LinearIterator<T>>>,
    base_solver: Option<Box<dyn LinearIterator<T>>>,
    surface_op: Option<Arc<ParallelMatrix<T>>>,
    surface: Option<SurfaceView>,
    levels: Vec<Option<Level<T>>>,
    transfers: Vec<Option<MatrixTransfer<T>>>,
    projections: Vec<Option<MatrixProjection<T>>>,
    revision: Option<u64>,
    prepared: bool,
}

impl<T: Scalar> GeometricMultigrid<T> {
    pub fn new(hierarchy: Arc<dyn GridHierarchy<T>>, options: MultigridOptions) -> Self {
        Self {
            hierarchy,
            options,
            presmoother: None,
            postsmoother: None,
            base_solver: None,
            surface_op: None,
            surface: None,
            levels: Vec::new(),
            transfers: Vec::new(),
            projections: Vec::new(),
            revision: None,
            prepared: false,
        }
    }

    pub fn with_smoother(mut self, smoother: Box<dyn LinearIterator<T>>) -> Self {
        self.set_smoother(smoother);
        self
    }

    pub fn with_base_solver(mut self, solver: Box<dyn LinearIterator<T>>) -> Self {
        self.set_base_solver(solver);
        self
    }

    /// Use `smoother` for pre- and postsmoothing. Each level gets its own copy.
    pub fn set_smoother(&mut self, smoother: Box<dyn LinearIterator<T>>) {
        self.presmoother = Some(smoother);
        self.postsmoother = None;
        self.free();
    }

    pub fn set_presmoother(&mut self, smoother: Box<dyn LinearIterator<T>>) {
        self.presmoother = Some(smoother);
        self.free();
    }

    /// Postsmoother; without one the presmoother is used for both.
    pub fn set_postsmoother(&mut self, smoother: Box<dyn LinearIterator<T>>) {
        self.postsmoother = Some(smoother);
        self.free();
    }

    pub fn set_base_solver(&mut self, solver: Box<dyn LinearIterator<T>>) {
        self.base_solver = Some(solver);
        self.free();
    }

    pub fn options(&self) -> &MultigridOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: MultigridOptions) {
        self.options = options;
        self.free();
    }

    pub fn is_allocated(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Levels this process takes part in, coarsest first.
    pub fn visited_levels(&self) -> Vec<usize> {
        self.levels
            .iter()
            .enumerate()
            .filter_map(|(lev, l)| l.as_ref().filter(|l| l.visited).map(|_| lev))
            .collect()
    }

    /// Operator used on `level` after `prepare`.
    pub fn level_operator(&self, level: usize) -> Option<&Arc<ParallelMatrix<T>>> {
        self.levels.get(level).and_then(Option::as_ref).and_then(|l| l.op.as_ref())
    }

    /// Release all level storage.
    pub fn free(&mut self) {
        self.levels.clear();
        self.transfers.clear();
        self.projections.clear();
        self.surface = None;
        self.revision = None;
        self.prepared = false;
    }

    fn check_preconditions(&self) -> Result<(), PmgError> {
        let h = &self.hierarchy;
        if !h.is_multigrid() {
            return Err(PmgError::Precondition("geometric multigrid needs a level hierarchy".into()));
        }
        if self.options.surface_level >= h.num_levels() {
            return Err(PmgError::Precondition(format!(
                "surface level {} does not exist ({} levels)",
                self.options.surface_level,
                h.num_levels()
            )));
        }
        self.options.validate()?;
        if self.surface_op.is_none() {
            return Err(PmgError::NotInitialized("init must be called before prepare"));
        }
        if self.options.surface_level > self.options.base_level && self.presmoother.is_none() {
            return Err(PmgError::NotInitialized("no smoother set"));
        }
        if self.base_solver.is_none() {
            return Err(PmgError::NotInitialized("no base solver set"));
        }
        Ok(())
    }

    fn allocate(&mut self, surface_op: &Arc<ParallelMatrix<T>>) -> Result<(), PmgError> {
        self.free();
        let h = Arc::clone(&self.hierarchy);
        let (base, surface) = (self.options.base_level, self.options.surface_level);
        let map = h.surface_map();
        let view = SurfaceView::new(map, surface_op.num_rows(), h.level_size(surface)?)?;

        let mut levels = Vec::with_capacity(surface + 1);
        for lev in 0..=surface {
            if lev < base {
                levels.push(None);
                continue;
            }
            let layouts = if lev == surface && view.is_identity() {
                Arc::clone(surface_op.layouts())
            } else {
                h.level_layouts(lev)?
            };
            if !layouts.vertical_master.is_empty() && !layouts.vertical_slave.is_empty() {
                return Err(PmgError::LayoutMismatch(format!(
                    "rank {} holds vertical master and vertical slave interfaces on level {}",
                    layouts.rank(),
                    lev
                )));
            }
            let n = h.level_size(lev)?;
            levels.push(Some(Level::new(layouts, n)));
        }

        // a level is visited unless a finer level handed its defect off vertically
        let mut visited = true;
        for lev in (base..=surface).rev() {
            if let Some(level) = levels[lev].as_mut() {
                if lev < surface && !level.layouts.vertical_slave.is_empty() {
                    visited = false;
                }
                level.visited = visited;
            }
        }

        let damping = <T as From<f64>>::from(self.options.restriction_damping);
        let mut transfers = Vec::with_capacity(surface);
        let mut projections = Vec::with_capacity(surface);
        for lev in 0..surface {
            if lev < base {
                transfers.push(None);
                projections.push(None);
                continue;
            }
            let p = h.prolongation(lev)?;
            let (fine, coarse) = (h.level_size(lev + 1)?, h.level_size(lev)?);
            if p.nrows() != fine || p.ncols() != coarse {
                return Err(PmgError::LayoutMismatch(format!(
                    "prolongation is {}x{}, levels hold {} and {} entries",
                    p.nrows(),
                    p.ncols(),
                    fine,
                    coarse
                ))
                .at_level(lev, "transfer setup"));
            }
            transfers.push(Some(MatrixTransfer::new(p).with_damping(damping)));
            projections.push(Some(MatrixProjection::new(h.projection(lev)?)));
        }

        self.levels = levels;
        self.transfers = transfers;
        self.projections = projections;
        self.surface = Some(view);
        self.revision = Some(h.revision());
        debug!("multigrid: allocated levels {}..={} (revision {})", base, surface, h.revision());
        Ok(())
    }

    fn try_prepare(&mut self, u: &ParallelVector<T>) -> Result<(), PmgError> {
        self.check_preconditions()?;
        let surface_op = self
            .surface_op
            .clone()
            .ok_or(PmgError::NotInitialized("init must be called before prepare"))?;
        let h = Arc::clone(&self.hierarchy);
        if self.options.grid_changes || !self.is_allocated() || self.revision != Some(h.revision()) {
            self.allocate(&surface_op)?;
        }
        let (base, surface) = (self.options.base_level, self.options.surface_level);

        // iterate
        {
            let view = self.surface.as_ref().ok_or(PmgError::NotInitialized("surface view missing"))?;
            let top = level_mut(&mut self.levels, surface)?;
            view.project(u, &mut top.u)?;
            top.u.change_storage_type(StorageType::CONSISTENT)?;
        }
        for lev in (base + 1..=surface).rev() {
            let proj = self.projections[lev - 1]
                .as_ref()
                .ok_or(PmgError::NotInitialized("missing projection operator"))?;
            let (fine, coarse) = level_pair(&mut self.levels, lev)?;
            if !coarse.visited {
                break;
            }
            proj.apply(&fine.u, &mut coarse.u).map_err(|e| e.at_level(lev - 1, "projection"))?;
        }

        // operators
        {
            let view = self.surface.as_ref().ok_or(PmgError::NotInitialized("surface view missing"))?;
            let top = level_mut(&mut self.levels, surface)?;
            top.op = Some(view.level_operator(&surface_op, Arc::clone(&top.layouts))?);
        }
        for lev in (base..surface).rev() {
            let transfer = self.transfers[lev]
                .as_ref()
                .ok_or(PmgError::NotInitialized("missing transfer operator"))?;
            let (fine, coarse) = level_pair(&mut self.levels, lev + 1)?;
            if !coarse.visited {
                break;
            }
            let op = if let Some(op) = h.level_operator(lev) {
                if op.num_rows() != coarse.d.len() {
                    return Err(PmgError::DimensionMismatch { expected: coarse.d.len(), actual: op.num_rows() }
                        .at_level(lev, "coarse operator"));
                }
                op
            } else if !self.options.galerkin {
                return Err(PmgError::Precondition(format!(
                    "no operator for level {} and Galerkin products are disabled",
                    lev
                )));
            } else if coarse.layouts.has_vertical() {
                return Err(PmgError::Precondition(format!(
                    "level {} is redistributed vertically and needs an assembled operator",
                    lev
                )));
            } else if !fine.operator()?.storage().contains(StorageType::ADDITIVE) {
                return Err(PmgError::Precondition(format!(
                    "Galerkin product for level {} needs an additively stored level {} operator",
                    lev,
                    lev + 1
                )));
            } else {
                let fine_op = fine.operator()?;
                let a = fine_op.matrix().galerkin(transfer.matrix());
                Arc::new(ParallelMatrix::new(a, Arc::clone(&coarse.layouts)))
            };
            coarse.op = Some(op);
        }

        // smoothers and base solver
        for lev in base + 1..=surface {
            let level = level_mut(&mut self.levels, lev)?;
            if !level.visited {
                continue;
            }
            let handle = OperatorHandle::Assembled(Arc::clone(level.operator()?));
            let proto = self.presmoother.as_ref().ok_or(PmgError::NotInitialized("no smoother set"))?;
            let mut pre = proto.clone_box();
            let mut post = self.postsmoother.as_ref().unwrap_or(proto).clone_box();
            for s in [&mut pre, &mut post] {
                s.init(&handle)
                    .and_then(|_| s.prepare(&level.u, &level.d, &level.t))
                    .map_err(|e| e.at_level(lev, "smoother setup"))?;
            }
            level.pre = Some(pre);
            level.post = Some(post);
        }
        let base_level = level_mut(&mut self.levels, base)?;
        if base_level.visited {
            let handle = OperatorHandle::Assembled(Arc::clone(base_level.operator()?));
            let solver = self.base_solver.as_mut().ok_or(PmgError::NotInitialized("no base solver set"))?;
            solver.init(&handle).map_err(|e| e.at_level(base, "base solver setup"))?;
        }

        self.prepared = true;
        debug!("multigrid: prepared, visiting levels {:?}", self.visited_levels());
        Ok(())
    }

    fn try_cycle(&mut self, d: &mut ParallelVector<T>, c: &mut ParallelVector<T>) -> Result<(), PmgError> {
        let surface = self.options.surface_level;
        {
            let view = self.surface.as_ref().ok_or(PmgError::NotInitialized("surface view missing"))?;
            let top = level_mut(&mut self.levels, surface)?;
            view.project(d, &mut top.d)?;
        }
        self.lmgc(surface)?;
        let view = self.surface.as_ref().ok_or(PmgError::NotInitialized("surface view missing"))?;
        let top = level_mut(&mut self.levels, surface)?;
        view.release(&top.d, d)?;
        view.release(&top.c, c)
    }

    /// One cycle on `lev` for the defect stored there.
    fn lmgc(&mut self, lev: usize) -> Result<(), PmgError> {
        let base = self.options.base_level;
        if lev < base {
            return Err(PmgError::LevelBelowBase { level: lev, base });
        }
        if lev == base {
            return self.base_solve(lev);
        }
        trace!("multigrid: entering level {}", lev);
        let (nu1, nu2) = (self.options.nu1, self.options.nu2);
        {
            let level = level_mut(&mut self.levels, lev)?;
            level.c.set(T::zero());
            level.smooth(nu1, false).map_err(|e| e.at_level(lev, "presmoothing"))?;
        }

        let resume = {
            let transfer = self.transfers[lev - 1]
                .as_ref()
                .ok_or(PmgError::NotInitialized("missing transfer operator"))?;
            let (fine, coarse) = level_pair(&mut self.levels, lev)?;
            // overwrites coarse.d; vertical contributions are added below
            transfer.restrict(&fine.d, &mut coarse.d).map_err(|e| e.at_level(lev, "restriction"))?;
            send_defect_down(&mut coarse.d, lev - 1).map_err(|e| e.at_level(lev - 1, "vertical send"))?
        };

        if resume {
            let gamma = self.options.cycle_type.recursions();
            let mut total: Option<ParallelVector<T>> = None;
            for _ in 0..gamma {
                self.lmgc(lev - 1)?;
                if gamma > 1 {
                    // each recursion restarts from a zero correction
                    let c = &level_mut(&mut self.levels, lev - 1)?.c;
                    if let Some(acc) = total.as_mut() {
                        acc.add_assign(c)?;
                    } else {
                        total = Some(c.clone());
                    }
                }
            }
            if let Some(acc) = total {
                level_mut(&mut self.levels, lev - 1)?.c = acc;
            }
        }

        {
            let coarse = level_mut(&mut self.levels, lev - 1)?;
            receive_correction_up(&mut coarse.c, lev - 1).map_err(|e| e.at_level(lev - 1, "vertical receive"))?;
        }

        let transfer = self.transfers[lev - 1]
            .as_ref()
            .ok_or(PmgError::NotInitialized("missing transfer operator"))?;
        let (fine, coarse) = level_pair(&mut self.levels, lev)?;
        transfer
            .prolongate(&coarse.c, &mut fine.t)
            .and_then(|_| fine.c.add_assign(&fine.t))
            .map_err(|e| e.at_level(lev, "prolongation"))?;
        let op = Arc::clone(fine.operator()?);
        op.apply_sub(&fine.t, &mut fine.d).map_err(|e| e.at_level(lev, "defect update"))?;
        fine.smooth(nu2, true).map_err(|e| e.at_level(lev, "postsmoothing"))
    }

    fn base_solve(&mut self, lev: usize) -> Result<(), PmgError> {
        let level = level_mut(&mut self.levels, lev)?;
        let solver = self.base_solver.as_mut().ok_or(PmgError::NotInitialized("no base solver set"))?;
        level.d.change_storage_type(StorageType::ADDITIVE)?;
        level.d.set_storage_type(StorageType::ADDITIVE);
        level.c.set(T::zero());
        debug!("multigrid: base solver {} on level {}", solver.name(), lev);
        solver
            .prepare(&level.u, &level.d, &level.c)
            .and_then(|_| solver.apply(&level.d, &mut level.c))
            .map_err(|e| e.at_level(lev, "base solver"))?;
        let op = Arc::clone(level.operator()?);
        op.apply_sub(&level.c, &mut level.d).map_err(|e| e.at_level(lev, "defect update"))
    }

    fn fail(&mut self, err: PmgError) -> PmgError {
        error!("multigrid: {}", err);
        self.free();
        err
    }
}

/// Vertical slaves add their restricted defect into the vertical masters. Returns whether this
/// process continues on `coarse`.
fn send_defect_down<T: Scalar>(d: &mut ParallelVector<T>, coarse: usize) -> Result<bool, PmgError> {
    let layouts = Arc::clone(d.layouts());
    if !layouts.has_vertical() {
        return Ok(true);
    }
    let resume = layouts.vertical_slave.is_empty();
    if resume {
        debug!("level {}: rank {} waits for vertical defects", coarse, layouts.rank());
    } else {
        debug!("level {}: rank {} sends its defect to vertical masters", coarse, layouts.rank());
    }
    InterfaceCommunicator::new(layouts.comm()).exchange(
        &layouts.vertical_slave,
        &layouts.vertical_master,
        &mut VecAdd::new(d.values_mut()),
        CommTag::VERTICAL_DOWN,
    )?;
    Ok(resume)
}

/// Vertical masters copy the coarse correction back onto their vertical slaves.
fn receive_correction_up<T: Scalar>(c: &mut ParallelVector<T>, coarse: usize) -> Result<(), PmgError> {
    let layouts = Arc::clone(c.layouts());
    if !layouts.has_vertical() {
        return Ok(());
    }
    if !layouts.vertical_slave.is_empty() {
        c.set(T::zero());
        debug!("level {}: rank {} waits for the coarse correction", coarse, layouts.rank());
    } else {
        debug!("level {}: rank {} sends the coarse correction", coarse, layouts.rank());
    }
    InterfaceCommunicator::new(layouts.comm()).exchange(
        &layouts.vertical_master,
        &layouts.vertical_slave,
        &mut VecCopy::new(c.values_mut()),
        CommTag::VERTICAL_UP,
    )?;
    c.set_storage_type(StorageType::CONSISTENT);
    Ok(())
}

impl<T: Scalar> LinearIterator<T> for GeometricMultigrid<T> {
    fn name(&self) -> &'static str {
        "GeometricMultigrid"
    }

    fn init(&mut self, op: &OperatorHandle<T>) -> Result<(), PmgError> {
        let a = op.assembled()?;
        self.surface_op = Some(Arc::clone(a));
        self.free();
        Ok(())
    }

    fn prepare(
        &mut self,
        u: &ParallelVector<T>,
        _d: &ParallelVector<T>,
        _c: &ParallelVector<T>,
    ) -> Result<(), PmgError> {
        self.prepared = false;
        match self.try_prepare(u) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn apply(&mut self, d: &ParallelVector<T>, c: &mut ParallelVector<T>) -> Result<(), PmgError> {
        let mut d = d.clone();
        self.apply_update_defect(&mut d, c)
    }

    fn apply_update_defect(
        &mut self,
        d: &mut ParallelVector<T>,
        c: &mut ParallelVector<T>,
    ) -> Result<(), PmgError> {
        if !self.prepared {
            return Err(PmgError::NotInitialized("prepare must succeed before apply"));
        }
        match self.try_cycle(d, c) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn operator(&self) -> Option<Arc<ParallelMatrix<T>>> {
        self.surface_op.clone()
    }

    fn clone_box(&self) -> Box<dyn LinearIterator<T>> {
        let mut mg = GeometricMultigrid::new(Arc::clone(&self.hierarchy), self.options.clone());
        mg.presmoother = self.presmoother.as_ref().map(|s| s.clone_box());
        mg.postsmoother = self.postsmoother.as_ref().map(|s| s.clone_box());
        mg.base_solver = self.base_solver.as_ref().map(|s| s.clone_box());
        Box::new(mg)
    }
}
