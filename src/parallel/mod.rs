//! Process-level communication for distributed algebra.
//!
//! Every collective and point-to-point operation goes through the [`Comm`] trait. Messages are
//! opaque byte payloads addressed by (peer rank, [`CommTag`]); delivery between one pair of ranks
//! on one tag is FIFO. Receives block until a message arrives.
//!
//! Backends:
//! - [`SerialComm`]: a single rank; self-sends are queued, a receive on an empty queue is an error.
//! - [`ThreadComm`]: several ranks as threads of one process, sharing a mailbox.
//! - `MpiComm` (feature `mpi`): one rank per MPI process.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::PmgError;

pub mod buffer;
pub mod global_id;
pub mod layout;
pub mod overlap;
pub mod policy;
pub mod thread_comm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

pub use buffer::{BufferReader, BufferWriter};
pub use global_id::{GlobalId, GlobalIdHash, generate_global_ids};
pub use layout::{AlgebraLayouts, IndexLayout, Interface, LayoutRole};
pub use overlap::{OverlapReport, create_overlap};
pub use policy::{CommunicationPolicy, InterfaceCommunicator, VecAdd, VecCopy};
pub use thread_comm::{ThreadComm, run_ranks};

/// Message tag separating concurrent exchange channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const GLOBAL_IDS: CommTag = CommTag(0x10);
    pub const GLOBAL_IDS_OVERLAP: CommTag = CommTag(0x11);
    pub const OVERLAP_ROWS: CommTag = CommTag(0x20);
    pub const OVERLAP_IDS: CommTag = CommTag(0x21);
    pub const ROW_COPY: CommTag = CommTag(0x22);
    pub const OVERLAP_SYNC: CommTag = CommTag(0x23);
    pub const VEC_ADD: CommTag = CommTag(0x30);
    pub const VEC_COPY: CommTag = CommTag(0x31);
    pub const VEC_OVERLAP: CommTag = CommTag(0x32);
    pub const VERTICAL_DOWN: CommTag = CommTag(0x40);
    pub const VERTICAL_UP: CommTag = CommTag(0x41);
    pub const ALL_REDUCE: CommTag = CommTag(0x50);
}

/// Message-passing interface of one rank.
pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// Queue `payload` for `peer`. Never waits for the matching receive.
    fn send(&self, peer: usize, tag: CommTag, payload: Bytes) -> Result<(), PmgError>;
    /// Block until the next message from `peer` on `tag` is available.
    fn recv(&self, peer: usize, tag: CommTag) -> Result<Bytes, PmgError>;
    /// Sum of `x` over all ranks.
    fn all_reduce(&self, x: f64) -> Result<f64, PmgError>;
    fn barrier(&self) -> Result<(), PmgError> {
        self.all_reduce(0.0).map(|_| ())
    }
    fn dot(&self, a: &[f64], b: &[f64]) -> Result<f64, PmgError> {
        let local = a.iter().zip(b).map(|(&x, &y)| x * y).sum::<f64>();
        self.all_reduce(local)
    }
}

/// Single-rank communicator.
#[derive(Debug, Default)]
pub struct SerialComm {
    queue: Mutex<HashMap<CommTag, VecDeque<Bytes>>>,
}

impl SerialComm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, peer: usize, tag: CommTag, payload: Bytes) -> Result<(), PmgError> {
        if peer != 0 {
            return Err(PmgError::Comm { peer, reason: "serial communicator has only rank 0".into() });
        }
        self.queue.lock().entry(tag).or_default().push_back(payload);
        Ok(())
    }

    fn recv(&self, peer: usize, tag: CommTag) -> Result<Bytes, PmgError> {
        if peer != 0 {
            return Err(PmgError::Comm { peer, reason: "serial communicator has only rank 0".into() });
        }
        self.queue
            .lock()
            .get_mut(&tag)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| PmgError::Comm { peer, reason: format!("no pending message on tag {:?}", tag) })
    }

    fn all_reduce(&self, x: f64) -> Result<f64, PmgError> {
        Ok(x)
    }
}
