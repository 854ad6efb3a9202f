//! Serial multigrid cycle behaviour on 1D Poisson hierarchies with 3, 5, 9 and 17 nodes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use approx::assert_abs_diff_eq;
use parking_lot::Mutex;

use pargmg::{
    CycleType, GeometricMultigrid, Jacobi, LinearIterator, LuSolver, MultigridOptions, OperatorHandle, ParallelMatrix,
    ParallelVector, PmgError, SolverContext, SolverKind, SparseRowMatrix, StaticHierarchy, StorageType,
};

type Counter = Arc<Mutex<BTreeMap<usize, usize>>>;

/// Wraps an iterator and counts `apply` calls per operator size.
struct Counting {
    inner: Box<dyn LinearIterator<f64>>,
    size: usize,
    calls: Counter,
}

impl Counting {
    fn boxed(inner: Box<dyn LinearIterator<f64>>, calls: &Counter) -> Box<dyn LinearIterator<f64>> {
        Box::new(Counting { inner, size: 0, calls: Arc::clone(calls) })
    }
}

impl LinearIterator<f64> for Counting {
    fn name(&self) -> &'static str {
        "Counting"
    }

    fn init(&mut self, op: &OperatorHandle<f64>) -> Result<(), PmgError> {
        self.size = op.nrows();
        self.inner.init(op)
    }

    fn prepare(
        &mut self,
        u: &ParallelVector<f64>,
        d: &ParallelVector<f64>,
        c: &ParallelVector<f64>,
    ) -> Result<(), PmgError> {
        self.inner.prepare(u, d, c)
    }

    fn apply(&mut self, d: &ParallelVector<f64>, c: &mut ParallelVector<f64>) -> Result<(), PmgError> {
        *self.calls.lock().entry(self.size).or_default() += 1;
        self.inner.apply(d, c)
    }

    fn operator(&self) -> Option<Arc<ParallelMatrix<f64>>> {
        self.inner.operator()
    }

    fn clone_box(&self) -> Box<dyn LinearIterator<f64>> {
        Counting::boxed(self.inner.clone_box(), &self.calls)
    }
}

/// LU that fails its first solve.
struct FailOnce {
    inner: LuSolver<f64>,
    armed: Arc<AtomicBool>,
}

impl LinearIterator<f64> for FailOnce {
    fn name(&self) -> &'static str {
        "FailOnce"
    }

    fn init(&mut self, op: &OperatorHandle<f64>) -> Result<(), PmgError> {
        self.inner.init(op)
    }

    fn apply(&mut self, d: &ParallelVector<f64>, c: &mut ParallelVector<f64>) -> Result<(), PmgError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            return Err(PmgError::SolveError("injected failure".into()));
        }
        self.inner.apply(d, c)
    }

    fn operator(&self) -> Option<Arc<ParallelMatrix<f64>>> {
        self.inner.operator()
    }

    fn clone_box(&self) -> Box<dyn LinearIterator<f64>> {
        Box::new(FailOnce { inner: LuSolver::new(), armed: Arc::clone(&self.armed) })
    }
}

fn poisson(n: usize) -> SparseRowMatrix<f64> {
    let mut a = SparseRowMatrix::new(n, n);
    for i in 0..n {
        a.add(i, i, 2.0);
        if i > 0 {
            a.add(i, i - 1, -1.0);
        }
        if i + 1 < n {
            a.add(i, i + 1, -1.0);
        }
    }
    a
}

/// Linear interpolation from `nc` nodes onto `2 nc - 1` nodes.
fn interpolation(nc: usize) -> SparseRowMatrix<f64> {
    let nf = 2 * nc - 1;
    let mut p = SparseRowMatrix::new(nf, nc);
    for i in 0..nc {
        p.set(2 * i, i, 1.0);
        if i + 1 < nc {
            p.set(2 * i + 1, i, 0.5);
            p.set(2 * i + 1, i + 1, 0.5);
        }
    }
    p
}

/// Hierarchy with `levels` levels, the coarsest holding 3 nodes.
fn hierarchy(levels: usize) -> Arc<StaticHierarchy<f64>> {
    let mut ps = Vec::new();
    let mut nc = 3;
    for _ in 1..levels {
        ps.push(interpolation(nc));
        nc = 2 * nc - 1;
    }
    Arc::new(StaticHierarchy::serial(3, ps).unwrap())
}

fn surface_size(levels: usize) -> usize {
    (0..levels - 1).fold(3, |n, _| 2 * n - 1)
}

fn defect(values: Vec<f64>) -> ParallelVector<f64> {
    let mut d = ParallelVector::serial(values);
    d.set_storage_type(StorageType::ADDITIVE);
    d
}

/// Counts (smoother calls per size, base solves per size) for one cycle.
fn count_cycle(cycle: CycleType, nu1: usize, nu2: usize) -> (BTreeMap<usize, usize>, BTreeMap<usize, usize>) {
    let smooth: Counter = Arc::default();
    let base: Counter = Arc::default();
    let opts = MultigridOptions::default().with_levels(0, 2).with_cycle_type(cycle).with_smoothing_steps(nu1, nu2);
    let mut mg = GeometricMultigrid::new(hierarchy(3), opts)
        .with_smoother(Counting::boxed(Box::new(Jacobi::new(0.6)), &smooth))
        .with_base_solver(Counting::boxed(Box::new(LuSolver::new()), &base));
    mg.init(&ParallelMatrix::serial(poisson(9)).into()).unwrap();
    let u = ParallelVector::serial(vec![0.0; 9]);
    mg.prepare(&u, &u, &u).unwrap();
    let mut d = defect(vec![1.0; 9]);
    let mut c = ParallelVector::serial(vec![0.0; 9]);
    mg.apply_update_defect(&mut d, &mut c).unwrap();
    let s = smooth.lock().clone();
    let b = base.lock().clone();
    (s, b)
}

#[test]
fn v_cycle_visits_every_level_once() {
    let (smooth, base) = count_cycle(CycleType::V, 1, 1);
    assert_eq!(smooth, BTreeMap::from([(5, 2), (9, 2)]));
    assert_eq!(base, BTreeMap::from([(3, 1)]));
}

#[test]
fn w_cycle_doubles_visits_per_level() {
    let (smooth, base) = count_cycle(CycleType::W, 1, 1);
    assert_eq!(smooth, BTreeMap::from([(5, 4), (9, 2)]));
    assert_eq!(base, BTreeMap::from([(3, 4)]));
}

#[test]
fn smoothing_steps_scale_counts() {
    let (smooth, base) = count_cycle(CycleType::Gamma(3), 2, 1);
    assert_eq!(smooth, BTreeMap::from([(5, 9), (9, 3)]));
    assert_eq!(base, BTreeMap::from([(3, 9)]));
}

/// With surface == base the cycle is one base solve followed by the defect update.
#[test]
fn degenerate_cycle_is_a_base_solve() {
    let smooth: Counter = Arc::default();
    let base: Counter = Arc::default();
    let opts = MultigridOptions::default().with_levels(2, 2);
    let mut mg = GeometricMultigrid::new(hierarchy(3), opts)
        .with_smoother(Counting::boxed(Box::new(Jacobi::new(0.6)), &smooth))
        .with_base_solver(Counting::boxed(Box::new(LuSolver::new()), &base));
    mg.init(&ParallelMatrix::serial(poisson(9)).into()).unwrap();
    let u = ParallelVector::serial(vec![0.0; 9]);
    mg.prepare(&u, &u, &u).unwrap();

    let rhs: Vec<f64> = (0..9).map(|i| (i as f64).sin()).collect();
    let mut d = defect(rhs.clone());
    let mut c = ParallelVector::serial(vec![0.0; 9]);
    mg.apply_update_defect(&mut d, &mut c).unwrap();

    assert!(smooth.lock().is_empty());
    assert_eq!(*base.lock(), BTreeMap::from([(9, 1)]));

    let mut lu = LuSolver::<f64>::new();
    let mut expected = vec![0.0; 9];
    pargmg::LinearSolver::solve(&mut lu, &poisson(9).to_dense(), None, &rhs, &mut expected).unwrap();
    for i in 0..9 {
        assert_abs_diff_eq!(c.values()[i], expected[i], epsilon = 1e-10);
        assert_abs_diff_eq!(d.values()[i], 0.0, epsilon = 1e-10);
    }
}

/// A base level above the surface is rejected before any storage exists.
#[test]
fn base_above_surface_is_rejected() {
    let opts = MultigridOptions::default().with_levels(2, 1);
    let mut mg = GeometricMultigrid::new(hierarchy(3), opts)
        .with_smoother(Box::new(Jacobi::new(0.6)))
        .with_base_solver(Box::new(LuSolver::new()));
    mg.init(&ParallelMatrix::serial(poisson(5)).into()).unwrap();
    let u = ParallelVector::serial(vec![0.0; 5]);
    let err = mg.prepare(&u, &u, &u).unwrap_err();
    assert!(matches!(err, PmgError::Precondition(_)));
    assert!(!mg.is_allocated());
    assert!(!mg.is_prepared());
}

#[test]
fn surface_level_must_exist() {
    let opts = MultigridOptions::default().with_levels(0, 3);
    let mut mg = GeometricMultigrid::new(hierarchy(3), opts)
        .with_smoother(Box::new(Jacobi::new(0.6)))
        .with_base_solver(Box::new(LuSolver::new()));
    mg.init(&ParallelMatrix::serial(poisson(9)).into()).unwrap();
    let u = ParallelVector::serial(vec![0.0; 9]);
    assert!(matches!(mg.prepare(&u, &u, &u), Err(PmgError::Precondition(_))));
}

/// A failing step names its level, frees the cycle, and a new `prepare` recovers.
#[test]
fn failure_resets_the_cycle() {
    let armed = Arc::new(AtomicBool::new(true));
    let opts = MultigridOptions::default().with_levels(0, 2);
    let mut mg = GeometricMultigrid::new(hierarchy(3), opts)
        .with_smoother(Box::new(Jacobi::new(0.6)))
        .with_base_solver(Box::new(FailOnce { inner: LuSolver::new(), armed: Arc::clone(&armed) }));
    mg.init(&ParallelMatrix::serial(poisson(9)).into()).unwrap();
    let u = ParallelVector::serial(vec![0.0; 9]);
    mg.prepare(&u, &u, &u).unwrap();

    let mut d = defect(vec![1.0; 9]);
    let mut c = ParallelVector::serial(vec![0.0; 9]);
    let err = mg.apply_update_defect(&mut d, &mut c).unwrap_err();
    assert!(matches!(err, PmgError::LevelFailure { level: 0, operation: "base solver", .. }));
    assert!(!mg.is_allocated());
    assert!(matches!(mg.apply(&d, &mut c), Err(PmgError::NotInitialized(_))));

    mg.prepare(&u, &u, &u).unwrap();
    let mut d = defect(vec![1.0; 9]);
    mg.apply_update_defect(&mut d, &mut c).unwrap();
}

/// Multigrid as the preconditioner of a linear iteration converges at a level-independent rate.
#[test]
fn multigrid_iteration_converges() {
    for levels in [3, 4] {
        let n = surface_size(levels);
        let opts = MultigridOptions::default().with_levels(0, levels - 1);
        let mg = GeometricMultigrid::new(hierarchy(levels), opts)
            .with_smoother(Box::new(Jacobi::new(0.6)))
            .with_base_solver(Box::new(LuSolver::new()));
        let a = Arc::new(ParallelMatrix::serial(poisson(n)));
        let b = ParallelVector::serial(vec![1.0; n]);
        let mut x = ParallelVector::serial(vec![0.0; n]);
        let mut ctx = SolverContext::new(SolverKind::Richardson, 1e-8, 40).with_preconditioner(Box::new(mg));
        let stats = ctx.solve(&a, &b, &mut x).unwrap();
        assert!(stats.converged, "{} levels: residual {}", levels, stats.final_residual);
        assert!(stats.iterations < 25, "{} levels took {} iterations", levels, stats.iterations);
    }
}

#[test]
fn multigrid_preconditioned_cg() {
    let n = surface_size(4);
    let opts = MultigridOptions::default().with_levels(0, 3);
    let mg = GeometricMultigrid::new(hierarchy(4), opts)
        .with_smoother(Box::new(Jacobi::new(0.6)))
        .with_base_solver(Box::new(LuSolver::new()));
    let a = Arc::new(ParallelMatrix::serial(poisson(n)));
    let b = ParallelVector::serial((0..n).map(|i| 1.0 + i as f64).collect());
    let mut x = ParallelVector::serial(vec![0.0; n]);
    let mut ctx = SolverContext::new(SolverKind::Cg, 1e-10, 50).with_preconditioner(Box::new(mg));
    let stats = ctx.solve(&a, &b, &mut x).unwrap();
    assert!(stats.converged);
    assert!(stats.iterations <= 10, "took {} iterations", stats.iterations);

    let mut r = vec![0.0; n];
    a.matrix().apply(x.values(), &mut r);
    for (ri, bi) in r.iter().zip(b.values()) {
        assert_abs_diff_eq!(*ri, *bi, epsilon = 1e-7);
    }
}

#[test]
fn pre_and_postsmoother_are_separate_instances() {
    let pre: Counter = Arc::default();
    let post: Counter = Arc::default();
    let opts = MultigridOptions::default().with_levels(0, 2).with_smoothing_steps(2, 1);
    let mut mg = GeometricMultigrid::new(hierarchy(3), opts).with_base_solver(Box::new(LuSolver::new()));
    mg.set_presmoother(Counting::boxed(Box::new(Jacobi::new(0.6)), &pre));
    mg.set_postsmoother(Counting::boxed(Box::new(Jacobi::new(0.8)), &post));
    mg.init(&ParallelMatrix::serial(poisson(9)).into()).unwrap();
    let u = ParallelVector::serial(vec![0.0; 9]);
    mg.prepare(&u, &u, &u).unwrap();
    let mut d = defect(vec![1.0; 9]);
    let mut c = ParallelVector::serial(vec![0.0; 9]);
    mg.apply_update_defect(&mut d, &mut c).unwrap();

    assert_eq!(*pre.lock(), BTreeMap::from([(5, 2), (9, 2)]));
    assert_eq!(*post.lock(), BTreeMap::from([(5, 1), (9, 1)]));
}

/// Correction of one two-grid cycle without smoothing.
fn coarse_correction(damping: f64) -> Vec<f64> {
    let opts = MultigridOptions::default()
        .with_levels(0, 1)
        .with_smoothing_steps(0, 0)
        .with_restriction_damping(damping);
    let mut mg = GeometricMultigrid::new(hierarchy(2), opts)
        .with_smoother(Box::new(Jacobi::new(0.6)))
        .with_base_solver(Box::new(LuSolver::new()));
    mg.init(&ParallelMatrix::serial(poisson(5)).into()).unwrap();
    let u = ParallelVector::serial(vec![0.0; 5]);
    mg.prepare(&u, &u, &u).unwrap();
    let mut d = defect((0..5).map(|i| 1.0 + i as f64).collect());
    let mut c = ParallelVector::serial(vec![0.0; 5]);
    mg.apply_update_defect(&mut d, &mut c).unwrap();
    c.values().to_vec()
}

#[test]
fn restriction_damping_scales_the_coarse_correction() {
    let full = coarse_correction(1.0);
    let half = coarse_correction(0.5);
    assert!(full.iter().any(|v| v.abs() > 1e-3));
    for (h, f) in half.iter().zip(&full) {
        assert_abs_diff_eq!(*h, 0.5 * f, epsilon = 1e-12);
    }
}

/// The caller's 3 unknowns are the interior nodes 1..=3 of the 5-node surface level.
#[test]
fn partial_surface_cycle_converges() {
    let h = StaticHierarchy::serial(3, vec![interpolation(3)]).unwrap().with_surface_map(vec![1, 2, 3]);
    let opts = MultigridOptions::default().with_levels(0, 1);
    let mg = GeometricMultigrid::new(Arc::new(h), opts)
        .with_smoother(Box::new(Jacobi::new(0.6)))
        .with_base_solver(Box::new(LuSolver::new()));
    let a = Arc::new(ParallelMatrix::serial(poisson(3)));
    let b = ParallelVector::serial(vec![1.0; 3]);
    let mut x = ParallelVector::serial(vec![0.0; 3]);
    let mut ctx = SolverContext::new(SolverKind::Richardson, 1e-8, 40).with_preconditioner(Box::new(mg));
    let stats = ctx.solve(&a, &b, &mut x).unwrap();
    assert!(stats.converged, "residual {}", stats.final_residual);
    assert!(stats.iterations < 20, "took {} iterations", stats.iterations);

    // 1D Poisson with unit load: x = (1.5, 2, 1.5)
    for (xi, e) in x.values().iter().zip([1.5, 2.0, 1.5]) {
        assert_abs_diff_eq!(*xi, e, epsilon = 1e-6);
    }
}

#[test]
fn galerkin_needs_an_additive_operator() {
    let opts = MultigridOptions::default().with_levels(0, 2);
    let mut mg = GeometricMultigrid::new(hierarchy(3), opts)
        .with_smoother(Box::new(Jacobi::new(0.6)))
        .with_base_solver(Box::new(LuSolver::new()));
    let a = ParallelMatrix::serial(poisson(9)).with_storage_type(StorageType::CONSISTENT);
    mg.init(&a.into()).unwrap();
    let u = ParallelVector::serial(vec![0.0; 9]);
    assert!(matches!(mg.prepare(&u, &u, &u), Err(PmgError::Precondition(_))));
}
