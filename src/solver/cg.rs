//! Preconditioned Conjugate Gradient on distributed vectors, per Saad §9.2.
//!
//! The residual is kept additive and search directions consistent, so every inner product
//! pairs a consistent with an additive vector and costs one `all_reduce`.

use std::sync::Arc;

use log::debug;

use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{OperatorHandle, ParallelMatrix, ParallelVector, StorageType};
use crate::preconditioner::LinearIterator;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};

pub struct CgSolver<T: Scalar> {
    pub conv: Convergence<T>,
    pc: Option<Box<dyn LinearIterator<T>>>,
    op: Option<Arc<ParallelMatrix<T>>>,
}

impl<T: Scalar> CgSolver<T> {
    pub fn new(tol: T, max_iters: usize) -> Self {
        Self { conv: Convergence { tol, max_iters }, pc: None, op: None }
    }

    /// Preconditioner used when this solver runs as a [`LinearIterator`].
    pub fn with_preconditioner(mut self, pc: Box<dyn LinearIterator<T>>) -> Self {
        self.pc = Some(pc);
        self
    }
}

/// z = M⁻¹ r, or the consistent copy of `r` without a preconditioner.
fn precondition<T: Scalar>(
    pc: &mut Option<&mut dyn LinearIterator<T>>,
    r: &ParallelVector<T>,
    z: &mut ParallelVector<T>,
) -> Result<(), PmgError> {
    match pc {
        Some(pc) => {
            pc.apply(r, z)?;
            z.change_storage_type(StorageType::CONSISTENT)
        }
        None => {
            z.copy_from(r)?;
            z.change_storage_type(StorageType::CONSISTENT)
        }
    }
}

fn pcg<T: Scalar>(
    conv: &Convergence<T>,
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
    let (stop, mut stats) = conv.check(res0, res0, 0);
    if stop && stats.converged {
        return Ok(stats);
    }

    let mut z = a.create_vector();
    if let Some(pc) = pc.as_mut() {
        pc.prepare(x, &r, &z)?;
    }
    precondition(&mut pc, &r, &mut z)?;
    let mut p = z.clone();
    let mut rho = z.dot(&r)?;
    let mut q = a.create_vector();

    for i in 1..=conv.max_iters {
        a.apply(&p, &mut q)?;
        let pq = p.dot(&q)?;
        if pq == T::zero() {
            return Err(PmgError::SolveError(format!("CG breakdown at iteration {}: pᵀAp = 0", i)));
        }
        let alpha = rho / pq;
        x.axpy(alpha, &p)?;
        r.axpy(-alpha, &q)?;
        let res = r.norm()?;
        let (stop, s) = conv.check(res, res0, i);
        stats = s;
        if stop {
            break;
        }
        precondition(&mut pc, &r, &mut z)?;
        let rho_new = z.dot(&r)?;
        let beta = rho_new / rho;
        p.scale(beta);
        p.add_assign(&z)?;
        rho = rho_new;
    }
    debug!(
        "CG: {} iterations, residual {} (converged: {})",
        stats.iterations, stats.final_residual, stats.converged
    );
    Ok(stats)
}

impl<T: Scalar> LinearSolver<ParallelMatrix<T>, ParallelVector<T>> for CgSolver<T> {
    type Error = PmgError;
    type Scalar = T;

    fn solve(
        &mut self,
        a: &ParallelMatrix<T>,
        pc: Option<&mut dyn LinearIterator<T>>,
        b: &ParallelVector<T>,
        x: &mut ParallelVector<T>,
    ) -> Result<SolveStats<T>, PmgError> {
        pcg(&self.conv, a, pc, b, x)
    }
}

impl<T: Scalar> LinearIterator<T> for CgSolver<T> {
    fn name(&self) -> &'static str {
        "CG"
    }

    fn init(&mut self, op: &OperatorHandle<T>) -> Result<(), PmgError> {
        let a = op.assembled()?;
        if let Some(pc) = self.pc.as_mut() {
            pc.init(op)?;
        }
        self.op = Some(Arc::clone(a));
        Ok(())
    }

    /// Solve `A c = d` from a zero initial guess.
    fn apply(&mut self, d: &ParallelVector<T>, c: &mut ParallelVector<T>) -> Result<(), PmgError> {
        let a = self.op.clone().ok_or(PmgError::NotInitialized("CG: apply called before init"))?;
        c.set(T::zero());
        let pc = self.pc.as_mut().map(|p| p.as_mut() as &mut dyn LinearIterator<T>);
        pcg(&self.conv, &a, pc, d, c)?;
        Ok(())
    }

    fn operator(&self) -> Option<Arc<ParallelMatrix<T>>> {
        self.op.clone()
    }

    fn clone_box(&self) -> Box<dyn LinearIterator<T>> {
        let mut cg = CgSolver::new(self.conv.tol, self.conv.max_iters);
        cg.pc = self.pc.as_ref().map(|p| p.clone_box());
        Box::new(cg)
    }
}
