//! Interfaces and layouts: the addressing scheme of all communication.
//!
//! An [`Interface`] is the ordered list of local indices exchanged with one remote rank. An
//! [`IndexLayout`] collects the interfaces of one role (master, slave, ...) per rank and per
//! hierarchy level. Both sides of a channel must list the shared indices in the same order;
//! this is not checked.
//!
//! [`AlgebraLayouts`] bundles all roles together with the communicator. Matrices and vectors
//! share it through an `Arc`; changing the layouts of one container means building a new
//! `AlgebraLayouts` and installing it on that container only.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use super::{Comm, SerialComm};

/// Ordered local indices shared with `target_rank`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Interface {
    target_rank: usize,
    elements: Vec<usize>,
}

impl Interface {
    pub fn new(target_rank: usize) -> Self {
        Self { target_rank, elements: Vec::new() }
    }

    pub fn with_elements(target_rank: usize, elements: Vec<usize>) -> Self {
        Self { target_rank, elements }
    }

    pub fn target_rank(&self) -> usize {
        self.target_rank
    }

    pub fn push(&mut self, index: usize) {
        self.elements.push(index);
    }

    pub fn elements(&self) -> &[usize] {
        &self.elements
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.elements.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Interfaces of one role, per level and target rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexLayout {
    levels: Vec<BTreeMap<usize, Interface>>,
}

impl IndexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-level layout from `(rank, indices)` pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (usize, Vec<usize>)>,
    {
        let mut layout = Self::new();
        for (rank, elements) in pairs {
            for index in elements {
                layout.interface_mut(rank).push(index);
            }
        }
        layout
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Interface towards `rank` on level 0, created on demand.
    pub fn interface_mut(&mut self, rank: usize) -> &mut Interface {
        self.interface_on_level_mut(0, rank)
    }

    pub fn interface_on_level_mut(&mut self, level: usize, rank: usize) -> &mut Interface {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, BTreeMap::new);
        }
        self.levels[level].entry(rank).or_insert_with(|| Interface::new(rank))
    }

    pub fn interface(&self, rank: usize) -> Option<&Interface> {
        self.levels.first().and_then(|lvl| lvl.get(&rank))
    }

    /// Ranks with at least one non-empty interface, ascending.
    pub fn target_ranks(&self) -> Vec<usize> {
        let ranks: BTreeSet<usize> = self
            .iter()
            .filter(|(_, itf)| !itf.is_empty())
            .map(|(_, itf)| itf.target_rank())
            .collect();
        ranks.into_iter().collect()
    }

    /// All interfaces towards `rank`, in level order.
    pub fn interfaces_for(&self, rank: usize) -> impl Iterator<Item = &Interface> + '_ {
        self.levels.iter().filter_map(move |lvl| lvl.get(&rank))
    }

    /// `(level, interface)` for every interface.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Interface)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(lvl, map)| map.values().map(move |itf| (lvl, itf)))
    }

    /// Every local index listed in any interface.
    pub fn indices(&self) -> BTreeSet<usize> {
        self.iter().flat_map(|(_, itf)| itf.iter()).collect()
    }

    pub fn contains_index(&self, index: usize) -> bool {
        self.iter().any(|(_, itf)| itf.elements().contains(&index))
    }

    pub fn num_entries(&self) -> usize {
        self.iter().map(|(_, itf)| itf.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, itf)| itf.is_empty())
    }
}

/// Role of a layout inside [`AlgebraLayouts`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayoutRole {
    Master,
    Slave,
    MasterOverlap,
    SlaveOverlap,
    VerticalMaster,
    VerticalSlave,
}

/// All layouts of one distributed row set, plus the communicator they refer to.
#[derive(Clone)]
pub struct AlgebraLayouts {
    comm: Arc<dyn Comm>,
    pub master: IndexLayout,
    pub slave: IndexLayout,
    pub master_overlap: IndexLayout,
    pub slave_overlap: IndexLayout,
    pub vertical_master: IndexLayout,
    pub vertical_slave: IndexLayout,
    overlap_enabled: bool,
}

impl AlgebraLayouts {
    pub fn new(comm: Arc<dyn Comm>) -> Self {
        Self {
            comm,
            master: IndexLayout::new(),
            slave: IndexLayout::new(),
            master_overlap: IndexLayout::new(),
            slave_overlap: IndexLayout::new(),
            vertical_master: IndexLayout::new(),
            vertical_slave: IndexLayout::new(),
            overlap_enabled: false,
        }
    }

    /// Layouts of a single-process run: no interfaces at all.
    pub fn serial() -> Self {
        Self::new(Arc::new(SerialComm::new()))
    }

    pub fn with_master(mut self, layout: IndexLayout) -> Self {
        self.master = layout;
        self
    }

    pub fn with_slave(mut self, layout: IndexLayout) -> Self {
        self.slave = layout;
        self
    }

    pub fn with_vertical_master(mut self, layout: IndexLayout) -> Self {
        self.vertical_master = layout;
        self
    }

    pub fn with_vertical_slave(mut self, layout: IndexLayout) -> Self {
        self.vertical_slave = layout;
        self
    }

    pub fn comm(&self) -> &dyn Comm {
        self.comm.as_ref()
    }

    pub fn comm_handle(&self) -> Arc<dyn Comm> {
        Arc::clone(&self.comm)
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn layout(&self, role: LayoutRole) -> &IndexLayout {
        match role {
            LayoutRole::Master => &self.master,
            LayoutRole::Slave => &self.slave,
            LayoutRole::MasterOverlap => &self.master_overlap,
            LayoutRole::SlaveOverlap => &self.slave_overlap,
            LayoutRole::VerticalMaster => &self.vertical_master,
            LayoutRole::VerticalSlave => &self.vertical_slave,
        }
    }

    pub fn overlap_enabled(&self) -> bool {
        self.overlap_enabled
    }

    pub fn enable_overlap(&mut self, enabled: bool) {
        self.overlap_enabled = enabled;
    }

    pub fn has_horizontal(&self) -> bool {
        !self.master.is_empty() || !self.slave.is_empty()
    }

    pub fn has_vertical(&self) -> bool {
        !self.vertical_master.is_empty() || !self.vertical_slave.is_empty()
    }
}

impl fmt::Debug for AlgebraLayouts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgebraLayouts")
            .field("rank", &self.comm.rank())
            .field("master", &self.master)
            .field("slave", &self.slave)
            .field("master_overlap", &self.master_overlap)
            .field("slave_overlap", &self.slave_overlap)
            .field("vertical_master", &self.vertical_master)
            .field("vertical_slave", &self.vertical_slave)
            .field("overlap_enabled", &self.overlap_enabled)
            .finish()
    }
}
