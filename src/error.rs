use thiserror::Error;

use crate::parallel::global_id::GlobalId;

// Unified error type for pargmg

#[derive(Error, Debug)]
pub enum PmgError {
    #[error("global id {id} expected on rank {rank} but not known locally")]
    MissingGlobalId { id: GlobalId, rank: usize },
    #[error("global id {id} already mapped to index {existing}, refusing to map it to {index}")]
    DuplicateGlobalId { id: GlobalId, existing: usize, index: usize },
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),
    #[error("unverified layout configuration on rank {rank}: {detail}")]
    UnverifiedLayout { rank: usize, detail: String },
    #[error("communication with rank {peer} failed: {reason}")]
    Comm { peer: usize, reason: String },
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    BufferUnderflow { needed: usize, remaining: usize },
    #[error("precondition violated: {0}")]
    Precondition(String),
    #[error("level {level}: {operation} failed")]
    LevelFailure {
        level: usize,
        operation: &'static str,
        #[source]
        source: Box<PmgError>,
    },
    #[error("cycle reached level {level} below base level {base}")]
    LevelBelowBase { level: usize, base: usize },
    #[error("not initialized: {0}")]
    NotInitialized(&'static str),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("storage mismatch: {0}")]
    StorageMismatch(String),
    #[error("zero pivot at row {0}")]
    ZeroPivot(usize),
    #[error("solve error: {0}")]
    SolveError(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl PmgError {
    /// Wraps `self` with the level and step of the cycle it escaped from.
    pub fn at_level(self, level: usize, operation: &'static str) -> Self {
        PmgError::LevelFailure { level, operation, source: Box::new(self) }
    }
}
