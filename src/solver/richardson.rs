//! Damped Richardson iteration `x ← x + ω M⁻¹ (b − A x)`.
//!
//! With a multigrid cycle as `M⁻¹` this is the classical multigrid solver.

use log::debug;

use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{ParallelMatrix, ParallelVector, StorageType};
use crate::preconditioner::LinearIterator;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};

pub struct RichardsonSolver<T> {
    pub conv: Convergence<T>,
    pub damping: T,
}

impl<T: Scalar> RichardsonSolver<T> {
    pub fn new(tol: T, max_iters: usize) -> Self {
        Self { conv: Convergence { tol, max_iters }, damping: T::one() }
    }

    pub fn with_damping(mut self, damping: T) -> Self {
        self.damping = damping;
        self
    }
}

impl<T: Scalar> LinearSolver<ParallelMatrix<T>, ParallelVector<T>> for RichardsonSolver<T> {
    type Error = PmgError;
    type Scalar = T;

    fn solve(
        &mut self,
        a: &ParallelMatrix<T>,
        mut pc: Option<&mut dyn LinearIterator<T>>,
        b: &ParallelVector<T>,
        x: &mut ParallelVector<T>,
    ) -> Result<SolveStats<T>, PmgError> {
        x.change_storage_type(StorageType::CONSISTENT)?;
        let mut r = b.clone();
        r.change_storage_type(StorageType::ADDITIVE)?;
        a.apply_sub(x, &mut r)?;
        let res0 = r.norm()?;
        let (stop, mut stats) = self.conv.check(res0, res0, 0);
        if stop && stats.converged {
            return Ok(stats);
        }

        let mut c = a.create_vector();
        if let Some(pc) = pc.as_mut() {
            pc.prepare(x, &r, &c)?;
        }
        for i in 1..=self.conv.max_iters {
            match pc.as_mut() {
                Some(pc) => pc.apply(&r, &mut c)?,
                None => {
                    c.copy_from(&r)?;
                    c.change_storage_type(StorageType::CONSISTENT)?;
                }
            }
            if self.damping != T::one() {
                c.scale(self.damping);
            }
            x.add_assign(&c)?;
            a.apply_sub(&c, &mut r)?;
            let res = r.norm()?;
            let (stop, s) = self.conv.check(res, res0, i);
            stats = s;
            if stop {
                break;
            }
        }
        debug!(
            "Richardson: {} iterations, residual {} (converged: {})",
            stats.iterations, stats.final_residual, stats.converged
        );
        Ok(stats)
    }
}
