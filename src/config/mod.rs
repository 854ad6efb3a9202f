//! Configuration types for the overlap builder and the multigrid cycle.

pub mod options;

pub use options::{CycleType, MixedLayoutPolicy, MultigridOptions, OverlapOptions, OverlapSync};
