//! In-process ranks sharing one mailbox.
//!
//! `ThreadComm::world(n)` hands out `n` communicators that exchange messages through a shared
//! table keyed by (source, destination, tag). Each rank is meant to run on its own thread;
//! [`run_ranks`] does exactly that and propagates panics. A rank that panics marks the world as
//! aborted so that peers blocked in `recv` fail instead of waiting forever.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::{Bytes, BytesMut, BufMut, Buf};
use parking_lot::{Condvar, Mutex};

use super::{Comm, CommTag};
use crate::error::PmgError;

type Key = (usize, usize, CommTag); // (src, dst, tag)

#[derive(Default)]
struct Mailbox {
    slots: HashMap<Key, VecDeque<Bytes>>,
    aborted: bool,
}

struct Shared {
    mailbox: Mutex<Mailbox>,
    ready: Condvar,
}

impl Shared {
    fn abort(&self) {
        self.mailbox.lock().aborted = true;
        self.ready.notify_all();
    }
}

/// Communicator of one in-process rank.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm").field("rank", &self.rank).field("size", &self.size).finish()
    }
}

impl ThreadComm {
    /// Create the communicators of a world with `size` ranks, ordered by rank.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let shared = Arc::new(Shared { mailbox: Mutex::new(Mailbox::default()), ready: Condvar::new() });
        (0..size).map(|rank| ThreadComm { rank, size, shared: Arc::clone(&shared) }).collect()
    }

    /// Wake every blocked rank with an error.
    pub fn abort(&self) {
        self.shared.abort();
    }

    fn check_peer(&self, peer: usize) -> Result<(), PmgError> {
        if peer >= self.size {
            return Err(PmgError::Comm { peer, reason: format!("world has only {} ranks", self.size) });
        }
        Ok(())
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, peer: usize, tag: CommTag, payload: Bytes) -> Result<(), PmgError> {
        self.check_peer(peer)?;
        let mut mailbox = self.shared.mailbox.lock();
        mailbox.slots.entry((self.rank, peer, tag)).or_default().push_back(payload);
        drop(mailbox);
        self.shared.ready.notify_all();
        Ok(())
    }

    fn recv(&self, peer: usize, tag: CommTag) -> Result<Bytes, PmgError> {
        self.check_peer(peer)?;
        let key = (peer, self.rank, tag);
        let mut mailbox = self.shared.mailbox.lock();
        loop {
            if let Some(msg) = mailbox.slots.get_mut(&key).and_then(VecDeque::pop_front) {
                return Ok(msg);
            }
            if mailbox.aborted {
                return Err(PmgError::Comm { peer, reason: "world aborted while waiting".into() });
            }
            self.shared.ready.wait(&mut mailbox);
        }
    }

    fn all_reduce(&self, x: f64) -> Result<f64, PmgError> {
        // Rank 0 sums in rank order so every run reduces identically.
        if self.rank == 0 {
            let mut acc = x;
            for peer in 1..self.size {
                let mut msg = self.recv(peer, CommTag::ALL_REDUCE)?;
                acc += msg.get_f64_ne();
            }
            for peer in 1..self.size {
                let mut out = BytesMut::with_capacity(8);
                out.put_f64_ne(acc);
                self.send(peer, CommTag::ALL_REDUCE, out.freeze())?;
            }
            Ok(acc)
        } else {
            let mut out = BytesMut::with_capacity(8);
            out.put_f64_ne(x);
            self.send(0, CommTag::ALL_REDUCE, out.freeze())?;
            let mut msg = self.recv(0, CommTag::ALL_REDUCE)?;
            Ok(msg.get_f64_ne())
        }
    }
}

/// Run `f` once per rank of a fresh `size`-rank world, each on its own thread.
///
/// Results are returned in rank order. A panic on any rank aborts the world and is re-raised
/// on the calling thread once all ranks have finished.
pub fn run_ranks<F, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(Arc<dyn Comm>) -> R + Sync,
    R: Send,
{
    let comms = ThreadComm::world(size);
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || {
                    let guard = comm.clone();
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        f(Arc::new(comm) as Arc<dyn Comm>)
                    }));
                    if result.is_err() {
                        guard.abort();
                    }
                    result
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join()).collect();
        outcomes
            .into_iter()
            .map(|joined| match joined {
                Ok(Ok(value)) => value,
                Ok(Err(panic)) | Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}
