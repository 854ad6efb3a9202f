//! Smoother and base-solver selection.
//!
//! Configuration picks a variant once; [`SmootherKind::build`] and [`BaseSolverKind::build`]
//! turn it into the boxed [`LinearIterator`] the multigrid cycle clones per level.
//!
//! # Example
//!
//! ```rust
//! use pargmg::context::pc_context::{BaseSolverKind, SmootherKind};
//! let smoother = SmootherKind::Jacobi { damping: 0.6 }.build::<f64>();
//! let base = BaseSolverKind::Lu.build::<f64>();
//! assert_eq!(smoother.name(), "Jacobi");
//! assert_eq!(base.name(), "LU");
//! ```

use std::str::FromStr;

use faer::traits::{ComplexField, RealField};

use crate::core::Scalar;
use crate::error::PmgError;
use crate::preconditioner::{Jacobi, LinearIterator, MatSorType, Sor};
use crate::solver::{CgSolver, LuSolver};

/// Per-level smoother.
#[derive(Debug, Clone, PartialEq)]
pub enum SmootherKind {
    /// Damped Jacobi.
    Jacobi { damping: f64 },
    /// SOR sweeps over owned rows.
    ///
    /// - `omega`: relaxation factor.
    /// - `sweep`: forward, backward or symmetric.
    Sor { omega: f64, sweep: MatSorType },
    /// One forward Gauss–Seidel sweep.
    GaussSeidel,
}

impl Default for SmootherKind {
    fn default() -> Self {
        SmootherKind::Jacobi { damping: 0.6 }
    }
}

impl SmootherKind {
    pub fn build<T: Scalar>(&self) -> Box<dyn LinearIterator<T>> {
        match self {
            SmootherKind::Jacobi { damping } => Box::new(Jacobi::new(<T as From<f64>>::from(*damping))),
            SmootherKind::Sor { omega, sweep } => Box::new(Sor::new(<T as From<f64>>::from(*omega), 1, *sweep)),
            SmootherKind::GaussSeidel => Box::new(Sor::<T>::gauss_seidel()),
        }
    }
}

impl FromStr for SmootherKind {
    type Err = PmgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jacobi" => Ok(SmootherKind::default()),
            "gs" | "gauss-seidel" => Ok(SmootherKind::GaussSeidel),
            "sgs" | "symmetric-gauss-seidel" => {
                Ok(SmootherKind::Sor { omega: 1.0, sweep: MatSorType::SYMMETRIC_SWEEP })
            }
            other => Err(PmgError::Precondition(format!("unknown smoother '{}'", other))),
        }
    }
}

/// Solver for the base level.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BaseSolverKind {
    /// Dense LU; the base level must be held by one process.
    #[default]
    Lu,
    /// Jacobi-preconditioned CG to a relative tolerance. Every process must visit the base level.
    Cg { tol: f64, max_iters: usize },
}

impl BaseSolverKind {
    pub fn build<T: Scalar + ComplexField + RealField>(&self) -> Box<dyn LinearIterator<T>> {
        match self {
            BaseSolverKind::Lu => Box::new(LuSolver::<T>::new()),
            BaseSolverKind::Cg { tol, max_iters } => Box::new(
                CgSolver::new(<T as From<f64>>::from(*tol), *max_iters)
                    .with_preconditioner(Box::new(Jacobi::new(<T as num_traits::One>::one()))),
            ),
        }
    }
}
