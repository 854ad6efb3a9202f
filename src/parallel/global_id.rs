//! Process-independent identities of distributed unknowns.
//!
//! A [`GlobalId`] is `(owner rank, owner-local index at creation)`. After
//! [`generate_global_ids`] every copy of a distributed unknown carries its master's id, so ids
//! received from other ranks can be resolved locally through a [`GlobalIdHash`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::CommTag;
use super::layout::AlgebraLayouts;
use super::policy::{InterfaceCommunicator, VecCopy};
use crate::error::PmgError;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct GlobalId {
    pub owner_rank: u64,
    pub owner_index: u64,
}

impl GlobalId {
    pub fn new(owner_rank: usize, owner_index: usize) -> Self {
        Self { owner_rank: owner_rank as u64, owner_index: owner_index as u64 }
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.owner_rank, self.owner_index)
    }
}

/// Reverse lookup `GlobalId -> local index` on one process. Injective by construction.
#[derive(Clone, Debug, Default)]
pub struct GlobalIdHash {
    map: HashMap<GlobalId, usize>,
}

impl GlobalIdHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash of `ids`, where `ids[i]` is the id of local index `i`.
    pub fn from_ids(ids: &[GlobalId]) -> Result<Self, PmgError> {
        let mut hash = Self { map: HashMap::with_capacity(ids.len()) };
        for (index, &id) in ids.iter().enumerate() {
            hash.insert(id, index)?;
        }
        Ok(hash)
    }

    pub fn lookup(&self, id: &GlobalId) -> Option<usize> {
        self.map.get(id).copied()
    }

    /// Register `id` for `index`. Re-registering the same pair is a no-op.
    pub fn insert(&mut self, id: GlobalId, index: usize) -> Result<(), PmgError> {
        match self.map.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(index);
                Ok(())
            }
            Entry::Occupied(slot) if *slot.get() == index => Ok(()),
            Entry::Occupied(slot) => {
                Err(PmgError::DuplicateGlobalId { id, existing: *slot.get(), index })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Assign ids to the first `n` local indices and propagate master ids to all copies.
///
/// Masters send to slaves; with overlap enabled, owners of overlap rows additionally send to the
/// ghost copies (slave-overlap to master-overlap).
pub fn generate_global_ids(layouts: &AlgebraLayouts, n: usize) -> Result<Vec<GlobalId>, PmgError> {
    let rank = layouts.rank();
    let mut ids: Vec<GlobalId> = (0..n).map(|i| GlobalId::new(rank, i)).collect();
    let icom = InterfaceCommunicator::new(layouts.comm());
    icom.exchange(&layouts.master, &layouts.slave, &mut VecCopy::new(&mut ids), CommTag::GLOBAL_IDS)?;
    if layouts.overlap_enabled() {
        icom.exchange(
            &layouts.slave_overlap,
            &layouts.master_overlap,
            &mut VecCopy::new(&mut ids),
            CommTag::GLOBAL_IDS_OVERLAP,
        )?;
    }
    Ok(ids)
}
