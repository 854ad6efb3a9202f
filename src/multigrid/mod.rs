//! Geometric multigrid: level hierarchies, grid transfer and the cycle controller.

pub mod cycle;
pub mod hierarchy;
pub mod surface;
pub mod transfer;

pub use cycle::GeometricMultigrid;
pub use hierarchy::{GridHierarchy, StaticHierarchy, normalized_transpose};
pub use surface::SurfaceView;
pub use transfer::{MatrixProjection, MatrixTransfer};
