//! MPI-based communicator.
//!
//! Wraps the MPI world communicator behind the [`Comm`](super::Comm) trait. Sends use MPI
//! buffered mode so that the send-all-then-receive-all pattern of interface exchanges cannot
//! deadlock on large payloads; the attached buffer must be large enough for all messages of one
//! exchange that are in flight at the same time.
//!
//! # Example
//! ```no_run
//! # #[cfg(feature = "mpi")]
//! # {
//! use pargmg::parallel::{Comm, MpiComm};
//! let comm = MpiComm::new(64 << 20).expect("MPI already initialized");
//! println!("Rank: {} / {}", comm.rank(), comm.size());
//! comm.barrier().unwrap();
//! # }
//! ```

use bytes::Bytes;
use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use super::{Comm, CommTag};
use crate::error::PmgError;

/// MPI communicator wrapper for distributed runs.
pub struct MpiComm {
    /// Keeps MPI initialized for as long as the communicator lives.
    _universe: Universe,
    /// The MPI world communicator (all processes in the job).
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// Initializes MPI and attaches a send buffer of `buffer_bytes`.
    ///
    /// Returns `None` when MPI was already initialized by someone else.
    pub fn new(buffer_bytes: usize) -> Option<Self> {
        let mut universe = mpi::initialize()?;
        universe.set_buffer_size(buffer_bytes);
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Some(MpiComm { _universe: universe, world, rank, size })
    }

    fn check_peer(&self, peer: usize) -> Result<(), PmgError> {
        if peer >= self.size {
            return Err(PmgError::Comm { peer, reason: format!("communicator has only {} ranks", self.size) });
        }
        Ok(())
    }
}

impl Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, peer: usize, tag: CommTag, payload: Bytes) -> Result<(), PmgError> {
        self.check_peer(peer)?;
        self.world
            .process_at_rank(peer as i32)
            .buffered_send_with_tag(&payload[..], i32::from(tag.0));
        Ok(())
    }

    fn recv(&self, peer: usize, tag: CommTag) -> Result<Bytes, PmgError> {
        self.check_peer(peer)?;
        let (data, _status) = self
            .world
            .process_at_rank(peer as i32)
            .receive_vec_with_tag::<u8>(i32::from(tag.0));
        Ok(Bytes::from(data))
    }

    fn all_reduce(&self, x: f64) -> Result<f64, PmgError> {
        let mut y = x;
        self.world.all_reduce_into(&x, &mut y, &SystemOperation::sum());
        Ok(y)
    }

    fn barrier(&self) -> Result<(), PmgError> {
        self.world.barrier();
        Ok(())
    }
}
