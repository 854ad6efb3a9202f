//! Options for the multigrid cycle and the overlap builder.
//!
//! All option structs have working defaults and `with_*` builders. The enums parse from the
//! short strings used in run scripts (`"V"`, `"W"`, `"3"`, `"diagonal"`, `"full-rows"`, ...).

use std::fmt;
use std::str::FromStr;

use crate::error::PmgError;

/// Number of coarse-grid recursions per visit of a level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleType {
    V,
    W,
    /// Arbitrary recursion count (gamma-cycle).
    Gamma(usize),
}

impl CycleType {
    pub fn recursions(&self) -> usize {
        match self {
            CycleType::V => 1,
            CycleType::W => 2,
            CycleType::Gamma(n) => *n,
        }
    }
}

impl FromStr for CycleType {
    type Err = PmgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "V" | "v" => Ok(CycleType::V),
            "W" | "w" => Ok(CycleType::W),
            other => match other.parse::<usize>() {
                Ok(1) => Ok(CycleType::V),
                Ok(2) => Ok(CycleType::W),
                Ok(n) if n > 0 => Ok(CycleType::Gamma(n)),
                _ => Err(PmgError::Precondition(format!("unknown cycle type '{}'", s))),
            },
        }
    }
}

impl fmt::Display for CycleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleType::V => write!(f, "V"),
            CycleType::W => write!(f, "W"),
            CycleType::Gamma(n) => write!(f, "{}", n),
        }
    }
}

/// Multigrid cycle parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct MultigridOptions {
    /// Coarsest level visited; solved by the base solver.
    pub base_level: usize,
    /// Finest level; the one the caller's defect lives on.
    pub surface_level: usize,
    pub cycle_type: CycleType,
    /// Presmoothing steps
    pub nu1: usize,
    /// Postsmoothing steps
    pub nu2: usize,
    /// Reallocate all level storage on every `prepare`.
    pub grid_changes: bool,
    /// Build coarse operators as `Pᵀ A P` instead of asking the hierarchy for them.
    pub galerkin: bool,
    /// Factor applied to restricted defects.
    pub restriction_damping: f64,
}

impl Default for MultigridOptions {
    fn default() -> Self {
        Self {
            base_level: 0,
            surface_level: 0,
            cycle_type: CycleType::V,
            nu1: 2,
            nu2: 2,
            grid_changes: false,
            galerkin: true,
            restriction_damping: 1.0,
        }
    }
}

impl MultigridOptions {
    pub fn with_levels(mut self, base_level: usize, surface_level: usize) -> Self {
        self.base_level = base_level;
        self.surface_level = surface_level;
        self
    }

    pub fn with_cycle_type(mut self, cycle_type: CycleType) -> Self {
        self.cycle_type = cycle_type;
        self
    }

    pub fn with_smoothing_steps(mut self, nu1: usize, nu2: usize) -> Self {
        self.nu1 = nu1;
        self.nu2 = nu2;
        self
    }

    pub fn with_grid_changes(mut self, grid_changes: bool) -> Self {
        self.grid_changes = grid_changes;
        self
    }

    pub fn with_galerkin(mut self, galerkin: bool) -> Self {
        self.galerkin = galerkin;
        self
    }

    pub fn with_restriction_damping(mut self, damping: f64) -> Self {
        self.restriction_damping = damping;
        self
    }

    /// Checks that do not need the grid hierarchy.
    pub fn validate(&self) -> Result<(), PmgError> {
        if self.base_level > self.surface_level {
            return Err(PmgError::Precondition(format!(
                "base level {} lies above surface level {}",
                self.base_level, self.surface_level
            )));
        }
        if self.cycle_type.recursions() == 0 {
            return Err(PmgError::Precondition("cycle type must recurse at least once".into()));
        }
        if !(self.restriction_damping.is_finite() && self.restriction_damping > 0.0) {
            return Err(PmgError::Precondition(format!(
                "restriction damping must be positive, got {}",
                self.restriction_damping
            )));
        }
        Ok(())
    }
}

/// How ghost rows are made consistent at the end of overlap construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverlapSync {
    /// Copy only the diagonal entry of each owned row onto its ghost copies.
    #[default]
    DiagonalOnly,
    /// Copy the full owned row (entries whose column is known on the ghost side).
    FullRows,
}

impl FromStr for OverlapSync {
    type Err = PmgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "diagonal" | "diag" | "diagonal-only" => Ok(OverlapSync::DiagonalOnly),
            "full" | "rows" | "full-rows" => Ok(OverlapSync::FullRows),
            _ => Err(PmgError::Precondition(format!("unknown overlap sync mode '{}'", s))),
        }
    }
}

/// Treatment of indices that are both slave and vertical master during overlap construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MixedLayoutPolicy {
    /// Fail with [`PmgError::UnverifiedLayout`].
    #[default]
    Reject,
    /// Log a warning and build the overlap anyway.
    Warn,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlapOptions {
    pub sync: OverlapSync,
    pub mixed_layouts: MixedLayoutPolicy,
}

impl OverlapOptions {
    pub fn with_sync(mut self, sync: OverlapSync) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_mixed_layouts(mut self, policy: MixedLayoutPolicy) -> Self {
        self.mixed_layouts = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_type_parsing() {
        assert_eq!("V".parse::<CycleType>().unwrap(), CycleType::V);
        assert_eq!("w".parse::<CycleType>().unwrap(), CycleType::W);
        assert_eq!("2".parse::<CycleType>().unwrap(), CycleType::W);
        assert_eq!("3".parse::<CycleType>().unwrap().recursions(), 3);
        assert!("0".parse::<CycleType>().is_err());
        assert!("F".parse::<CycleType>().is_err());
    }

    #[test]
    fn overlap_sync_parsing() {
        assert_eq!("full-rows".parse::<OverlapSync>().unwrap(), OverlapSync::FullRows);
        assert_eq!("Diagonal".parse::<OverlapSync>().unwrap(), OverlapSync::DiagonalOnly);
        assert_eq!(OverlapOptions::default().sync, OverlapSync::DiagonalOnly);
    }

    #[test]
    fn validate_rejects_inverted_levels() {
        let opts = MultigridOptions::default().with_levels(3, 1);
        assert!(matches!(opts.validate(), Err(PmgError::Precondition(_))));
        assert!(MultigridOptions::default().with_levels(0, 2).validate().is_ok());
    }
}
