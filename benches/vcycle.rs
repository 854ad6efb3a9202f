use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};

use pargmg::{
    CycleType, GeometricMultigrid, Jacobi, LinearIterator, LuSolver, MultigridOptions, ParallelMatrix,
    ParallelVector, SparseRowMatrix, StaticHierarchy, StorageType,
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

fn interpolation(nc: usize) -> SparseRowMatrix<f64> {
    let mut p = SparseRowMatrix::new(2 * nc - 1, nc);
    for i in 0..nc {
        p.set(2 * i, i, 1.0);
        if i + 1 < nc {
            p.set(2 * i + 1, i, 0.5);
            p.set(2 * i + 1, i + 1, 0.5);
        }
    }
    p
}

fn prepared_cycle(levels: usize, cycle: CycleType) -> (GeometricMultigrid<f64>, usize) {
    let mut ps = Vec::new();
    let mut n = 3;
    for _ in 1..levels {
        ps.push(interpolation(n));
        n = 2 * n - 1;
    }
    let h = StaticHierarchy::serial(3, ps).unwrap();
    let opts = MultigridOptions::default().with_levels(0, levels - 1).with_cycle_type(cycle);
    let mut mg = GeometricMultigrid::new(Arc::new(h), opts)
        .with_smoother(Box::new(Jacobi::new(0.6)))
        .with_base_solver(Box::new(LuSolver::new()));
    mg.init(&ParallelMatrix::serial(poisson(n)).into()).unwrap();
    let u = ParallelVector::serial(vec![0.0; n]);
    mg.prepare(&u, &u, &u).unwrap();
    (mg, n)
}

fn bench_cycles(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let mut group = c.benchmark_group("multigrid cycle");
    for levels in [6, 9, 12] {
        for cycle in [CycleType::V, CycleType::W] {
            let (mut mg, n) = prepared_cycle(levels, cycle);
            let rhs: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let mut x = ParallelVector::serial(vec![0.0; n]);
            group.bench_with_input(BenchmarkId::new(cycle.to_string(), n), &rhs, |b, rhs| {
                b.iter(|| {
                    let mut d = ParallelVector::serial(rhs.clone());
                    d.set_storage_type(StorageType::ADDITIVE);
                    mg.apply_update_defect(black_box(&mut d), black_box(&mut x)).unwrap();
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_cycles);
criterion_main!(benches);
