//! One-ring overlap construction for row-distributed sparse matrices.
//!
//! Every slave row is sent, with global column ids, to the process mastering it. Columns the
//! master already knows are merged additively. Unknown columns become ghost rows appended to the
//! master's matrix and listed in a new master-overlap interface towards the sender; the sender
//! learns the matching slave-overlap interface from one more exchange of the discovered ids. A
//! final copy of master rows onto slaves and of owned rows onto ghosts makes the result
//! numerically consistent, and the matrix is marked `CONSISTENT`.
//!
//! A matrix that is already consistent (for example the output of an earlier run) keeps the
//! master's values: slave rows only contribute columns the master does not know yet.
//!
//! The matrix gets a fresh [`AlgebraLayouts`] object; vectors and matrices still holding the old
//! one are unaffected.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};

use super::buffer::{BufferReader, BufferWriter};
use super::global_id::{GlobalId, GlobalIdHash, generate_global_ids};
use super::layout::{AlgebraLayouts, Interface};
use super::policy::{CommunicationPolicy, InterfaceCommunicator};
use super::CommTag;
use crate::config::{MixedLayoutPolicy, OverlapOptions, OverlapSync};
use crate::core::Scalar;
use crate::error::PmgError;
use crate::matrix::{ParallelMatrix, SparseRowMatrix, StorageType};

/// Summary of one overlap construction on this process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlapReport {
    /// Ghost rows appended to the local matrix.
    pub new_rows: usize,
    /// Entries in the master-overlap layout after construction.
    pub master_overlap_entries: usize,
    /// Entries in the slave-overlap layout after construction.
    pub slave_overlap_entries: usize,
}

/// Extend `mat` by one ring of ghost rows.
pub fn create_overlap<T: Scalar>(
    mat: &mut ParallelMatrix<T>,
    options: &OverlapOptions,
) -> Result<OverlapReport, PmgError> {
    let layouts = Arc::clone(mat.layouts());
    check_mixed_layouts(&layouts, options.mixed_layouts)?;
    let merge = if mat.storage().contains(StorageType::ADDITIVE) {
        Merge::Add
    } else if mat.storage().contains(StorageType::CONSISTENT) {
        Merge::Keep
    } else {
        return Err(PmgError::StorageMismatch(format!("cannot build overlap of a {} matrix", mat.storage())));
    };

    let old_rows = mat.num_rows();
    let mut ids = generate_global_ids(&layouts, old_rows)?;
    let mut hash = GlobalIdHash::from_ids(&ids)?;
    let icom = InterfaceCommunicator::new(layouts.comm());

    let new_layouts = {
        let mut pol = CreateOverlap::new(mat.matrix_mut(), &mut ids, &mut hash, merge);
        icom.exchange(&layouts.slave, &layouts.master, &mut pol, CommTag::OVERLAP_ROWS)?;
        pol.post_process(&layouts)?
    };
    let new_rows = mat.num_rows() - old_rows;

    {
        let mut pol = MatCopyRows { matrix: mat.matrix_mut(), ids: &ids, hash: &hash };
        icom.exchange(&new_layouts.master, &new_layouts.slave, &mut pol, CommTag::ROW_COPY)?;
    }
    match options.sync {
        OverlapSync::DiagonalOnly => {
            let mut pol = MatCopyDiag { matrix: mat.matrix_mut() };
            icom.exchange(&new_layouts.slave_overlap, &new_layouts.master_overlap, &mut pol, CommTag::OVERLAP_SYNC)?;
        }
        OverlapSync::FullRows => {
            let mut pol = MatCopyRows { matrix: mat.matrix_mut(), ids: &ids, hash: &hash };
            icom.exchange(&new_layouts.slave_overlap, &new_layouts.master_overlap, &mut pol, CommTag::OVERLAP_SYNC)?;
        }
    }

    let report = OverlapReport {
        new_rows,
        master_overlap_entries: new_layouts.master_overlap.num_entries(),
        slave_overlap_entries: new_layouts.slave_overlap.num_entries(),
    };
    info!(
        "rank {}: overlap added {} rows ({} master-overlap, {} slave-overlap entries)",
        layouts.rank(),
        report.new_rows,
        report.master_overlap_entries,
        report.slave_overlap_entries
    );
    mat.set_layouts(Arc::new(new_layouts));
    mat.set_storage_type(StorageType::CONSISTENT);
    Ok(report)
}

fn check_mixed_layouts(layouts: &AlgebraLayouts, policy: MixedLayoutPolicy) -> Result<(), PmgError> {
    let vertical = layouts.vertical_master.indices();
    if vertical.is_empty() {
        return Ok(());
    }
    let mixed: Vec<usize> = layouts.slave.indices().intersection(&vertical).copied().collect();
    let Some(first) = mixed.first() else {
        return Ok(());
    };
    let detail = format!(
        "{} indices are both horizontal slave and vertical master (first: {})",
        mixed.len(),
        first
    );
    match policy {
        MixedLayoutPolicy::Reject => Err(PmgError::UnverifiedLayout { rank: layouts.rank(), detail }),
        MixedLayoutPolicy::Warn => {
            warn!("rank {}: {}; building overlap anyway", layouts.rank(), detail);
            Ok(())
        }
    }
}

/// How received slave entries combine with the master's row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Merge {
    /// Rows are partial sums.
    Add,
    /// The master row is already complete.
    Keep,
}

/// Connection from a local row to a column that is not known on this process yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ExternalConnection {
    con_rank: usize,
    to_id: GlobalId,
    from_id: GlobalId,
    from_index: usize,
}

/// Mark `id` as handled for `rank`; true if it was not handled before.
fn first_visit(visited: &mut HashMap<usize, HashSet<GlobalId>>, rank: usize, id: GlobalId) -> bool {
    visited.entry(rank).or_default().insert(id)
}

fn write_row<T: Scalar>(buf: &mut BufferWriter, matrix: &SparseRowMatrix<T>, ids: &[GlobalId], row: usize) {
    let entries = matrix.row(row);
    buf.write_len(entries.len());
    for &(col, value) in entries {
        buf.write(&ids[col]);
        buf.write(&value);
    }
}

/// Slave rows to masters, recording columns the master does not know.
struct CreateOverlap<'a, T> {
    matrix: &'a mut SparseRowMatrix<T>,
    ids: &'a mut Vec<GlobalId>,
    hash: &'a mut GlobalIdHash,
    new_cons: BTreeMap<ExternalConnection, T>,
    new_ids: BTreeSet<GlobalId>,
    merge: Merge,
}

impl<'a, T: Scalar> CreateOverlap<'a, T> {
    fn new(
        matrix: &'a mut SparseRowMatrix<T>,
        ids: &'a mut Vec<GlobalId>,
        hash: &'a mut GlobalIdHash,
        merge: Merge,
    ) -> Self {
        Self { matrix, ids, hash, new_cons: BTreeMap::new(), new_ids: BTreeSet::new(), merge }
    }

    /// Append ghost rows, build both overlap layouts and insert the deferred connections.
    fn post_process(self, layouts: &AlgebraLayouts) -> Result<AlgebraLayouts, PmgError> {
        let rank = layouts.rank();
        let mut new_layouts = layouts.clone();
        new_layouts.enable_overlap(true);

        let old_size = self.matrix.nrows();
        let new_size = old_size + self.new_ids.len();
        for (k, &id) in self.new_ids.iter().enumerate() {
            self.hash.insert(id, old_size + k)?;
            self.ids.push(id);
        }
        if new_size != old_size {
            self.matrix.resize_and_keep_values(new_size, new_size);
            for i in old_size..new_size {
                self.matrix.set_dirichlet_row(i);
            }
        }

        // ids of new ghost rows, per slave rank that sent them
        let mut outgoing: BTreeMap<usize, Vec<GlobalId>> =
            layouts.master.target_ranks().into_iter().map(|r| (r, Vec::new())).collect();
        let mut visited = HashMap::new();
        for (con, &value) in &self.new_cons {
            let to_index = self
                .hash
                .lookup(&con.to_id)
                .ok_or(PmgError::MissingGlobalId { id: con.to_id, rank })?;
            let list = outgoing.get_mut(&con.con_rank).ok_or_else(|| {
                PmgError::LayoutMismatch(format!(
                    "rows arrived from rank {} which has no slave interface towards rank {}",
                    con.con_rank, rank
                ))
            })?;
            if first_visit(&mut visited, con.con_rank, con.to_id) {
                new_layouts.master_overlap.interface_mut(con.con_rank).push(to_index);
                list.push(con.to_id);
            }
            match self.merge {
                Merge::Add => self.matrix.add(con.from_index, to_index, value),
                Merge::Keep => self.matrix.set(con.from_index, to_index, value),
            }
        }

        let comm = layouts.comm();
        for (&slave_rank, list) in &outgoing {
            let mut buf = BufferWriter::new();
            buf.write_slice(list);
            debug!("rank {}: announcing {} ghost ids to rank {}", rank, list.len(), slave_rank);
            comm.send(slave_rank, CommTag::OVERLAP_IDS, buf.freeze())?;
        }
        for master_rank in layouts.slave.target_ranks() {
            let mut buf = BufferReader::new(comm.recv(master_rank, CommTag::OVERLAP_IDS)?);
            let itf = new_layouts.slave_overlap.interface_mut(master_rank);
            for id in buf.read_vec::<GlobalId>()? {
                let index = self.hash.lookup(&id).ok_or(PmgError::MissingGlobalId { id, rank })?;
                itf.push(index);
            }
            if !buf.is_empty() {
                return Err(PmgError::LayoutMismatch(format!(
                    "trailing bytes in ghost id list from rank {}",
                    master_rank
                )));
            }
        }
        Ok(new_layouts)
    }
}

impl<T: Scalar> CommunicationPolicy for CreateOverlap<'_, T> {
    fn collect(&mut self, buf: &mut BufferWriter, interface: &Interface) -> Result<(), PmgError> {
        for row in interface.iter() {
            write_row(buf, &*self.matrix, self.ids.as_slice(), row);
        }
        Ok(())
    }

    fn extract(&mut self, buf: &mut BufferReader, interface: &Interface) -> Result<(), PmgError> {
        let con_rank = interface.target_rank();
        for row in interface.iter() {
            let n = buf.read_len()?;
            for _ in 0..n {
                let id: GlobalId = buf.read()?;
                let value: T = buf.read()?;
                match (self.hash.lookup(&id), self.merge) {
                    (Some(col), Merge::Add) => self.matrix.add(row, col, value),
                    (Some(_), Merge::Keep) => {}
                    (None, _) => {
                        let con = ExternalConnection { con_rank, to_id: id, from_id: self.ids[row], from_index: row };
                        let entry = self.new_cons.entry(con).or_insert_with(T::zero);
                        match self.merge {
                            Merge::Add => *entry += value,
                            Merge::Keep => *entry = value,
                        }
                        self.new_ids.insert(id);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Overwrites receiver rows with sender rows; columns unknown on the receiver are skipped.
struct MatCopyRows<'a, T> {
    matrix: &'a mut SparseRowMatrix<T>,
    ids: &'a [GlobalId],
    hash: &'a GlobalIdHash,
}

impl<T: Scalar> CommunicationPolicy for MatCopyRows<'_, T> {
    fn collect(&mut self, buf: &mut BufferWriter, interface: &Interface) -> Result<(), PmgError> {
        for row in interface.iter() {
            write_row(buf, &*self.matrix, self.ids, row);
        }
        Ok(())
    }

    fn extract(&mut self, buf: &mut BufferReader, interface: &Interface) -> Result<(), PmgError> {
        for row in interface.iter() {
            let n = buf.read_len()?;
            for _ in 0..n {
                let id: GlobalId = buf.read()?;
                let value: T = buf.read()?;
                if let Some(col) = self.hash.lookup(&id) {
                    self.matrix.set(row, col, value);
                }
            }
        }
        Ok(())
    }
}

/// Copies diagonal entries.
struct MatCopyDiag<'a, T> {
    matrix: &'a mut SparseRowMatrix<T>,
}

impl<T: Scalar> CommunicationPolicy for MatCopyDiag<'_, T> {
    fn collect(&mut self, buf: &mut BufferWriter, interface: &Interface) -> Result<(), PmgError> {
        for i in interface.iter() {
            buf.write(&self.matrix.get(i, i));
        }
        Ok(())
    }

    fn extract(&mut self, buf: &mut BufferReader, interface: &Interface) -> Result<(), PmgError> {
        for i in interface.iter() {
            let value: T = buf.read()?;
            self.matrix.set(i, i, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::{Comm, IndexLayout, run_ranks};

    fn tridiag(n: usize) -> SparseRowMatrix<f64> {
        let mut m = SparseRowMatrix::new(n, n);
        for i in 0..n {
            m.add(i, i, 2.0);
            if i > 0 {
                m.add(i, i - 1, -1.0);
            }
            if i + 1 < n {
                m.add(i, i + 1, -1.0);
            }
        }
        m
    }

    #[test]
    fn serial_matrix_gains_no_rows() {
        let mut mat = ParallelMatrix::serial(tridiag(4));
        let report = create_overlap(&mut mat, &OverlapOptions::default()).unwrap();
        assert_eq!(report, OverlapReport::default());
        assert_eq!(mat.num_rows(), 4);
        assert!(mat.layouts().overlap_enabled());
        assert_eq!(mat.matrix(), &tridiag(4));
        assert_eq!(mat.storage(), StorageType::CONSISTENT);
    }

    #[test]
    fn matrix_without_storage_type_is_refused() {
        let mut mat = ParallelMatrix::serial(tridiag(2)).with_storage_type(StorageType::empty());
        let err = create_overlap(&mut mat, &OverlapOptions::default()).unwrap_err();
        assert!(matches!(err, PmgError::StorageMismatch(_)));
    }

    /// Rank 1 plays a master that announces a ghost id rank 0 never received.
    #[test]
    fn unknown_announced_ghost_id_is_reported() {
        let out = run_ranks(2, |comm| -> Result<(), PmgError> {
            if comm.rank() == 0 {
                let layouts = AlgebraLayouts::new(comm).with_slave(IndexLayout::from_pairs([(1, vec![0])]));
                let mut mat = ParallelMatrix::new(tridiag(1), Arc::new(layouts));
                create_overlap(&mut mat, &OverlapOptions::default()).map(|_| ())
            } else {
                let mut ids = BufferWriter::new();
                ids.write(&GlobalId::new(1, 0));
                comm.send(0, CommTag::GLOBAL_IDS, ids.freeze())?;
                comm.recv(0, CommTag::OVERLAP_ROWS)?;
                let mut ghosts = BufferWriter::new();
                ghosts.write_slice(&[GlobalId::new(1, 7)]);
                comm.send(0, CommTag::OVERLAP_IDS, ghosts.freeze())
            }
        });
        assert!(out[1].is_ok());
        match &out[0] {
            Err(PmgError::MissingGlobalId { id, rank }) => {
                assert_eq!(*id, GlobalId::new(1, 7));
                assert_eq!(*rank, 0);
            }
            other => panic!("expected a missing id, got {:?}", other),
        }
    }

    #[test]
    fn mixed_slave_and_vertical_master_is_flagged() {
        let layouts = AlgebraLayouts::serial()
            .with_slave(IndexLayout::from_pairs([(0, vec![1])]))
            .with_vertical_master(IndexLayout::from_pairs([(0, vec![1, 2])]));
        let err = check_mixed_layouts(&layouts, MixedLayoutPolicy::Reject).unwrap_err();
        assert!(matches!(err, PmgError::UnverifiedLayout { rank: 0, .. }));
        assert!(check_mixed_layouts(&layouts, MixedLayoutPolicy::Warn).is_ok());
    }

    #[test]
    fn visited_set_is_per_rank() {
        let mut visited = HashMap::new();
        let id = GlobalId::new(0, 3);
        assert!(first_visit(&mut visited, 1, id));
        assert!(!first_visit(&mut visited, 1, id));
        assert!(first_visit(&mut visited, 2, id));
    }
}
