//! Convergence tracking & tolerance checks for iterative solvers.

/// Stopping criteria: relative residual reduction `tol`, at most `max_iters` iterations.
#[derive(Clone, Debug, PartialEq)]
pub struct Convergence<T> {
    pub tol: T,
    pub max_iters: usize,
}

#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
}

impl<T: Copy + num_traits::Float> Convergence<T> {
    pub fn new(tol: T, max_iters: usize) -> Self {
        Self { tol, max_iters }
    }

    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    ///
    /// A zero initial residual counts as converged.
    pub fn check(&self, res_norm: T, res0_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let rel = if res0_norm == T::zero() { T::zero() } else { res_norm / res0_norm };
        let converged = rel <= self.tol;
        (
            converged || i >= self.max_iters,
            SolveStats { iterations: i, final_residual: res_norm, converged },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hitting_the_iteration_limit_is_not_convergence() {
        let conv = Convergence::new(1e-6, 5);
        let (stop, stats) = conv.check(0.5, 1.0, 5);
        assert!(stop);
        assert!(!stats.converged);
    }

    #[test]
    fn relative_reduction_converges() {
        let conv = Convergence::new(1e-3, 100);
        let (stop, stats) = conv.check(1e-4, 1.0, 3);
        assert!(stop && stats.converged);
        assert_eq!(stats.iterations, 3);
        let (stop, _) = conv.check(0.0, 0.0, 0);
        assert!(stop);
    }
}
