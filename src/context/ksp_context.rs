//! Outer solver selection.
//!
//! [`SolverContext`] wires an outer iteration (CG or Richardson) to an optional
//! preconditioner, typically a [`GeometricMultigrid`](crate::multigrid::GeometricMultigrid)
//! cycle, and runs the usual sequence: bind the operator, prepare for the current iterate,
//! iterate.
//!
//! # Usage
//!
//! 1. Construct a `SolverContext` with the solver kind, tolerance and iteration limit.
//! 2. Attach a preconditioner with `with_preconditioner`.
//! 3. Call `solve` for each right-hand side.

use std::str::FromStr;
use std::sync::Arc;

use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{OperatorHandle, ParallelMatrix, ParallelVector};
use crate::preconditioner::LinearIterator;
use crate::solver::{CgSolver, LinearSolver, RichardsonSolver};
use crate::utils::convergence::SolveStats;

/// Available outer iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    /// Preconditioned Conjugate Gradient (for SPD operators)
    Cg,
    /// Damped linear iteration
    Richardson,
}

impl FromStr for SolverKind {
    type Err = PmgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cg" => Ok(SolverKind::Cg),
            "richardson" | "linear" => Ok(SolverKind::Richardson),
            other => Err(PmgError::Precondition(format!("unknown solver '{}'", other))),
        }
    }
}

pub struct SolverContext<T: Scalar> {
    pub kind: SolverKind,
    /// Relative residual reduction
    pub tol: T,
    pub max_it: usize,
    /// Richardson damping
    pub damping: T,
    pub pc: Option<Box<dyn LinearIterator<T>>>,
}

impl<T: Scalar> SolverContext<T> {
    pub fn new(kind: SolverKind, tol: T, max_it: usize) -> Self {
        Self { kind, tol, max_it, damping: T::one(), pc: None }
    }

    pub fn with_preconditioner(mut self, pc: Box<dyn LinearIterator<T>>) -> Self {
        self.pc = Some(pc);
        self
    }

    pub fn with_damping(mut self, damping: T) -> Self {
        self.damping = damping;
        self
    }

    /// Solve `a x = b`; `x` holds the initial guess on entry.
    pub fn solve(
        &mut self,
        a: &Arc<ParallelMatrix<T>>,
        b: &ParallelVector<T>,
        x: &mut ParallelVector<T>,
    ) -> Result<SolveStats<T>, PmgError> {
        if let Some(pc) = self.pc.as_mut() {
            pc.init(&OperatorHandle::Assembled(Arc::clone(a)))?;
        }
        let pc = self.pc.as_mut().map(|p| p.as_mut() as &mut dyn LinearIterator<T>);
        match self.kind {
            SolverKind::Cg => CgSolver::new(self.tol, self.max_it).solve(a, pc, b, x),
            SolverKind::Richardson => {
                RichardsonSolver::new(self.tol, self.max_it).with_damping(self.damping).solve(a, pc, b, x)
            }
        }
    }
}
