//! Thin façade over intra-process (Rayon-style threads) or inter-process (MPI)
//! message passing.
//!
//! Messages are *contiguous byte vectors*. A receive handle yields the whole
//! message when waited on; collectives in [`crate::algs::collective`] are built
//! on these two point-to-point primitives only.

use crate::registry_error::RegistryError;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Typed message tag. Each protocol owns one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Point-to-point interface of one process group.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this process inside the group.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// Collective split of the group. Processes passing the same color end up
    /// in the same sub-group, ordered by their rank here; `None` opts out.
    fn split(&self, color: Option<u32>) -> Result<Option<Self>, RegistryError>
    where
        Self: Sized;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Single-process group for serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16) {}

    fn split(&self, color: Option<u32>) -> Result<Option<Self>, RegistryError> {
        Ok(color.map(|_| NoComm))
    }
}

// --- RayonComm: in-process ranks, one thread each ---

type Key = (u64, usize, usize, u16); // (group, src, dst, tag)

static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);
static NEXT_GROUP: AtomicU64 = AtomicU64::new(1);

/// Pending in-process receive; the message is taken from the mailbox on `wait`.
pub struct LocalHandle {
    key: Key,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            let popped = MAILBOX.get_mut(&self.key).and_then(|mut queue| queue.pop_front());
            if let Some(bytes) = popped {
                // the shard lock is released; a send racing in keeps the key
                MAILBOX.remove_if(&self.key, |_, queue| queue.is_empty());
                return Some(bytes.to_vec());
            }
            std::thread::yield_now();
        }
    }
}

/// Process group whose ranks are threads of this process.
///
/// Messages between the same `(src, dst, tag)` are delivered in send order.
/// Every group gets its own id, so concurrent groups never see each other's
/// traffic.
#[derive(Clone, Debug)]
pub struct RayonComm {
    group: u64,
    rank: usize,
    size: usize,
}

impl RayonComm {
    /// Create the `size` rank handles of a fresh group. Hand one to each thread.
    pub fn world(size: usize) -> Vec<RayonComm> {
        let group = NEXT_GROUP.fetch_add(1, Ordering::Relaxed);
        (0..size.max(1))
            .map(|rank| RayonComm {
                group,
                rank,
                size: size.max(1),
            })
            .collect()
    }

    pub fn group_id(&self) -> u64 {
        self.group
    }

    /// Run `f` once per rank of a fresh `size`-rank group, each on its own
    /// thread, and return the results in rank order. A panic on any rank is
    /// propagated.
    pub fn spmd<R, F>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(RayonComm) -> R + Sync,
        R: Send,
    {
        let comms = Self::world(size);
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    scope.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
                .collect()
        })
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.group, self.rank, peer, tag);
        MAILBOX
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16) -> LocalHandle {
        LocalHandle {
            key: (self.group, peer, self.rank, tag),
        }
    }

    fn split(&self, color: Option<u32>) -> Result<Option<Self>, RegistryError> {
        use crate::algs::collective::{allgather_pod, broadcast_bytes};
        let wire = color.map_or(u64::MAX, u64::from);
        let colors = allgather_pod(self, &[wire])?;
        let mut distinct: Vec<u64> = colors.iter().copied().filter(|&c| c != u64::MAX).collect();
        distinct.sort_unstable();
        distinct.dedup();

        let base = if self.rank == 0 {
            NEXT_GROUP.fetch_add(distinct.len().max(1) as u64, Ordering::Relaxed)
        } else {
            0
        };
        let base_bytes = broadcast_bytes(self, 0, base.to_le_bytes().to_vec())?;
        let base = u64::from_le_bytes(
            base_bytes
                .as_slice()
                .try_into()
                .map_err(|_| RegistryError::Comm("malformed split group id".into()))?,
        );

        let Some(color) = color else {
            return Ok(None);
        };
        let wire = u64::from(color);
        let slot = distinct.iter().position(|&c| c == wire).unwrap_or(0) as u64;
        let rank = colors[..self.rank].iter().filter(|&&c| c == wire).count();
        let size = colors.iter().filter(|&&c| c == wire).count();
        Ok(Some(RayonComm {
            group: base + slot,
            rank,
            size,
        }))
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::registry_error::RegistryError;
    use mpi::topology::{Color, SimpleCommunicator};
    use mpi::traits::*;

    /// Process group backed by an MPI communicator.
    ///
    /// Sends and receives are blocking; the collectives order their pairwise
    /// exchanges so that this never deadlocks.
    pub struct MpiComm {
        comm: SimpleCommunicator,
    }

    impl MpiComm {
        /// Wrap `MPI_COMM_WORLD`. MPI must already be initialized.
        pub fn world() -> Self {
            Self {
                comm: SimpleCommunicator::world(),
            }
        }

        pub fn from_communicator(comm: SimpleCommunicator) -> Self {
            Self { comm }
        }
    }

    pub struct MpiRecv(Option<Vec<u8>>);

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecv;

        fn rank(&self) -> usize {
            self.comm.rank() as usize
        }
        fn size(&self) -> usize {
            self.comm.size() as usize
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.comm
                .process_at_rank(peer as i32)
                .send_with_tag(buf, i32::from(tag));
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecv {
            let (data, _status) = self
                .comm
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(i32::from(tag));
            MpiRecv(Some(data))
        }

        fn split(&self, color: Option<u32>) -> Result<Option<Self>, RegistryError> {
            let color = match color {
                Some(c) => Color::with_value(c as i32),
                None => Color::undefined(),
            };
            Ok(self
                .comm
                .split_by_color(color)
                .map(|comm| MpiComm { comm }))
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let comms = RayonComm::world(2);
        let tag = CommTag::new(7);
        comms[0].isend(1, tag.as_u16(), &[1, 2, 3, 4]);
        let data = comms[1]
            .irecv(0, tag.as_u16())
            .wait()
            .expect("Expected to receive data from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn groups_do_not_share_traffic() {
        let a = RayonComm::world(2);
        let b = RayonComm::world(2);
        assert_ne!(a[0].group_id(), b[0].group_id());
        a[0].isend(1, 3, b"from-a");
        b[0].isend(1, 3, b"from-b");
        assert_eq!(b[1].irecv(0, 3).wait().unwrap(), b"from-b".to_vec());
        assert_eq!(a[1].irecv(0, 3).wait().unwrap(), b"from-a".to_vec());
    }

    #[test]
    fn fifo_per_tag() {
        let comms = RayonComm::world(2);
        for i in 0..10u8 {
            comms[0].isend(1, 11, &[i]);
        }
        let got: Vec<u8> = (0..10)
            .map(|_| comms[1].irecv(0, 11).wait().unwrap()[0])
            .collect();
        assert_eq!(got, (0u8..10).collect::<Vec<_>>());
    }

    #[test]
    fn drained_queues_leave_the_mailbox() {
        let comms = RayonComm::world(2);
        let key = (comms[0].group_id(), 0, 1, 21);
        comms[0].isend(1, 21, b"a");
        comms[0].isend(1, 21, b"b");
        assert_eq!(comms[1].irecv(0, 21).wait().unwrap(), b"a".to_vec());
        assert!(MAILBOX.contains_key(&key));
        assert_eq!(comms[1].irecv(0, 21).wait().unwrap(), b"b".to_vec());
        assert!(!MAILBOX.contains_key(&key));
    }

    #[test]
    fn split_by_parity() {
        let handles: Vec<_> = RayonComm::world(5)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let color = if comm.rank() == 4 { None } else { Some((comm.rank() % 2) as u32) };
                    let sub = comm.split(color).unwrap();
                    sub.map(|s| (comm.rank(), s.rank(), s.size()))
                })
            })
            .collect();
        let mut got: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        got.sort();
        assert_eq!(
            got,
            vec![None, Some((0, 0, 2)), Some((1, 0, 2)), Some((2, 1, 2)), Some((3, 1, 2))]
        );
    }

    #[test]
    fn nocomm_is_single_rank() {
        let c = NoComm;
        assert_eq!((c.rank(), c.size()), (0, 1));
        assert!(c.split(None).unwrap().is_none());
        assert!(c.split(Some(2)).unwrap().is_some());
    }
}
