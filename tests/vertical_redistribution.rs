//! Vertical redistribution of the coarse level.
//!
//! Both ranks hold an independent 3-node fine problem. Their 2-node coarse levels are gathered
//! onto rank 0, which solves a 4-node block operator; rank 1 sends its restricted defect down and
//! waits for the correction. The distributed cycle must match a serial two-level cycle run on
//! each rank's problem alone.

use std::sync::Arc;

use approx::assert_abs_diff_eq;

use pargmg::parallel::{AlgebraLayouts, Comm, IndexLayout, run_ranks};
use pargmg::{
    CycleType, GeometricMultigrid, Jacobi, LinearIterator, LuSolver, MultigridOptions, ParallelMatrix,
    ParallelVector, PmgError, SparseRowMatrix, StaticHierarchy, StorageType,
};

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

/// Interpolation of two coarse nodes onto three fine ones, placed at column `offset`.
fn interpolation(ncols: usize, offset: usize) -> SparseRowMatrix<f64> {
    SparseRowMatrix::from_triplets(
        3,
        ncols,
        &[(0, offset, 1.0), (1, offset, 0.5), (1, offset + 1, 0.5), (2, offset + 1, 1.0)],
    )
}

/// Block diagonal of two copies of the Galerkin coarse operator.
fn gathered_coarse_operator() -> SparseRowMatrix<f64> {
    let g = poisson(3).galerkin(&interpolation(2, 0));
    let mut a = SparseRowMatrix::new(4, 4);
    for block in [0, 2] {
        for i in 0..2 {
            for &(j, v) in g.row(i) {
                a.set(block + i, block + j, v);
            }
        }
    }
    a
}

fn rhs(rank: usize) -> Vec<f64> {
    if rank == 0 { vec![1.0, 2.0, -1.0] } else { vec![0.5, -3.0, 4.0] }
}

fn options(cycle: CycleType) -> MultigridOptions {
    MultigridOptions::default().with_levels(0, 1).with_cycle_type(cycle).with_smoothing_steps(1, 1)
}

fn multigrid(hierarchy: StaticHierarchy<f64>, cycle: CycleType) -> GeometricMultigrid<f64> {
    GeometricMultigrid::new(Arc::new(hierarchy), options(cycle))
        .with_smoother(Box::new(Jacobi::new(0.6)))
        .with_base_solver(Box::new(LuSolver::new()))
}

/// Hierarchy of `comm.rank()`; `with_operator` controls whether rank 0 gets its gathered operator.
fn distributed_hierarchy(comm: &Arc<dyn Comm>, with_operator: bool) -> StaticHierarchy<f64> {
    let fine = Arc::new(AlgebraLayouts::new(Arc::clone(comm)));
    if comm.rank() == 0 {
        let coarse = AlgebraLayouts::new(Arc::clone(comm))
            .with_vertical_master(IndexLayout::from_pairs([(1, vec![2, 3])]));
        let coarse = Arc::new(coarse);
        let h = StaticHierarchy::new(Arc::clone(&coarse), 4).add_level(interpolation(4, 0), fine, 3).unwrap();
        if with_operator {
            let op = Arc::new(ParallelMatrix::new(gathered_coarse_operator(), coarse));
            h.with_level_operator(0, op).unwrap()
        } else {
            h
        }
    } else {
        let coarse = AlgebraLayouts::new(Arc::clone(comm))
            .with_vertical_slave(IndexLayout::from_pairs([(0, vec![0, 1])]));
        StaticHierarchy::new(Arc::new(coarse), 2).add_level(interpolation(2, 0), fine, 3).unwrap()
    }
}

/// Correction and updated defect of one cycle.
fn cycle(mg: &mut GeometricMultigrid<f64>, a: SparseRowMatrix<f64>, layouts: Arc<AlgebraLayouts>, rhs: Vec<f64>) -> (Vec<f64>, Vec<f64>) {
    let op = ParallelMatrix::new(a, Arc::clone(&layouts));
    mg.init(&op.into()).unwrap();
    let u = ParallelVector::new(Arc::clone(&layouts), 3);
    mg.prepare(&u, &u, &u).unwrap();
    let mut d = ParallelVector::from_values(Arc::clone(&layouts), rhs, StorageType::ADDITIVE);
    let mut c = ParallelVector::new(layouts, 3);
    mg.apply_update_defect(&mut d, &mut c).unwrap();
    (c.values().to_vec(), d.values().to_vec())
}

fn serial_cycle(rank: usize, cycle_type: CycleType) -> (Vec<f64>, Vec<f64>) {
    let h = StaticHierarchy::serial(2, vec![interpolation(2, 0)]).unwrap();
    let mut mg = multigrid(h, cycle_type);
    cycle(&mut mg, poisson(3), Arc::new(AlgebraLayouts::serial()), rhs(rank))
}

#[test]
fn gathered_coarse_solve_matches_serial_cycle() {
    for cycle_type in [CycleType::V, CycleType::W] {
        let out = run_ranks(2, |comm| {
            let mut mg = multigrid(distributed_hierarchy(&comm, true), cycle_type);
            let visited = mg.visited_levels();
            let layouts = Arc::new(AlgebraLayouts::new(Arc::clone(&comm)));
            let result = cycle(&mut mg, poisson(3), layouts, rhs(comm.rank()));
            (mg.visited_levels(), visited.len(), result)
        });

        assert_eq!(out[0].0, vec![0, 1]);
        assert_eq!(out[1].0, vec![1]);
        for (rank, (_, before, (c, d))) in out.iter().enumerate() {
            assert_eq!(*before, 0, "nothing is allocated before prepare");
            let (c_ref, d_ref) = serial_cycle(rank, cycle_type);
            for i in 0..3 {
                assert_abs_diff_eq!(c[i], c_ref[i], epsilon = 1e-12);
                assert_abs_diff_eq!(d[i], d_ref[i], epsilon = 1e-12);
            }
        }
    }
}

/// A gathered level cannot be built by a Galerkin product; only the process that visits it
/// needs an operator.
#[test]
fn gathered_level_requires_an_operator() {
    let out = run_ranks(2, |comm| {
        let mut mg = multigrid(distributed_hierarchy(&comm, false), CycleType::V);
        let layouts = Arc::new(AlgebraLayouts::new(Arc::clone(&comm)));
        mg.init(&ParallelMatrix::new(poisson(3), Arc::clone(&layouts)).into()).unwrap();
        let u = ParallelVector::new(layouts, 3);
        let res = mg.prepare(&u, &u, &u);
        (matches!(res, Err(PmgError::Precondition(_))), res.is_ok(), mg.is_allocated())
    });
    assert_eq!(out[0], (true, false, false));
    assert_eq!(out[1], (false, true, true));
}

#[test]
fn both_vertical_roles_on_one_level_are_rejected() {
    let coarse = AlgebraLayouts::serial()
        .with_vertical_master(IndexLayout::from_pairs([(0, vec![0])]))
        .with_vertical_slave(IndexLayout::from_pairs([(0, vec![1])]));
    let serial = Arc::new(AlgebraLayouts::serial());
    let h = StaticHierarchy::new(Arc::new(coarse), 2).add_level(interpolation(2, 0), serial, 3).unwrap();
    let mut mg = multigrid(h, CycleType::V);
    mg.init(&ParallelMatrix::serial(poisson(3)).into()).unwrap();
    let u = ParallelVector::serial(vec![0.0; 3]);
    assert!(matches!(mg.prepare(&u, &u, &u), Err(PmgError::LayoutMismatch(_))));
    assert!(!mg.is_allocated());
}
