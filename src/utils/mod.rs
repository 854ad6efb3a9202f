pub mod convergence;
