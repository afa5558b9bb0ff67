//! Collective operations over a [`Communicator`].
//!
//! Every function here must be entered by all ranks of the group in the same
//! order. Pairwise exchanges are ordered (the lower rank sends first) so the
//! same code runs on buffered and on blocking backends.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{cast_slice, decode_vec};
use crate::registry_error::RegistryError;
use bytemuck::Pod;

const BCAST_TAG: CommTag = CommTag::new(0xB100);
const GATHER_TAG: CommTag = CommTag::new(0xB200);
const ALLTOALL_TAG: CommTag = CommTag::new(0xB300);

/// Reduction applied by the all-reduce helpers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

fn recv_from<C: Communicator>(comm: &C, peer: usize, tag: CommTag) -> Result<Vec<u8>, RegistryError> {
    comm.irecv(peer, tag.as_u16()).wait().ok_or_else(|| {
        RegistryError::Comm(format!(
            "rank {} got no message from rank {peer} (tag {:#x})",
            comm.rank(),
            tag.as_u16()
        ))
    })
}

fn send_to<C: Communicator>(comm: &C, peer: usize, tag: CommTag, buf: &[u8]) {
    let _ = comm.isend(peer, tag.as_u16(), buf).wait();
}

/// Broadcast `data` from `root`; the value passed on other ranks is ignored.
pub fn broadcast_bytes<C: Communicator>(
    comm: &C,
    root: usize,
    data: Vec<u8>,
) -> Result<Vec<u8>, RegistryError> {
    if comm.size() == 1 {
        return Ok(data);
    }
    if comm.rank() == root {
        for peer in (0..comm.size()).filter(|&p| p != root) {
            send_to(comm, peer, BCAST_TAG, &data);
        }
        Ok(data)
    } else {
        recv_from(comm, root, BCAST_TAG)
    }
}

/// Broadcast a serde value from `root`.
pub fn broadcast_value<C, T>(comm: &C, root: usize, value: Option<&T>) -> Result<T, RegistryError>
where
    C: Communicator,
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let bytes = match value {
        Some(v) if comm.rank() == root => bincode::serialize(v)?,
        None if comm.rank() == root => {
            return Err(RegistryError::Internal("broadcast root has no value".into()));
        }
        _ => Vec::new(),
    };
    let bytes = broadcast_bytes(comm, root, bytes)?;
    Ok(bincode::deserialize(&bytes)?)
}

/// Gather one buffer per rank on `root`, in rank order. Other ranks get `None`.
pub fn gather_bytes<C: Communicator>(
    comm: &C,
    root: usize,
    data: &[u8],
) -> Result<Option<Vec<Vec<u8>>>, RegistryError> {
    if comm.rank() != root {
        send_to(comm, root, GATHER_TAG, data);
        return Ok(None);
    }
    let mut out = Vec::with_capacity(comm.size());
    for peer in 0..comm.size() {
        if peer == root {
            out.push(data.to_vec());
        } else {
            out.push(recv_from(comm, peer, GATHER_TAG)?);
        }
    }
    Ok(Some(out))
}

/// Every rank receives every rank's buffer, in rank order.
pub fn allgather_bytes<C: Communicator>(
    comm: &C,
    data: &[u8],
) -> Result<Vec<Vec<u8>>, RegistryError> {
    if comm.size() == 1 {
        return Ok(vec![data.to_vec()]);
    }
    let gathered = gather_bytes(comm, 0, data)?;
    let packed = match gathered {
        Some(parts) => bincode::serialize(&parts)?,
        None => Vec::new(),
    };
    let packed = broadcast_bytes(comm, 0, packed)?;
    Ok(bincode::deserialize(&packed)?)
}

/// Concatenation of every rank's records, in rank order.
pub fn allgather_pod<C: Communicator, T: Pod>(comm: &C, local: &[T]) -> Result<Vec<T>, RegistryError> {
    let parts = allgather_bytes(comm, cast_slice(local))?;
    let mut out = Vec::new();
    for part in parts {
        out.extend(decode_vec::<T>(&part)?);
    }
    Ok(out)
}

/// Element-wise reduction of equally sized slices, folded in rank order.
pub fn allreduce_with<C, T, F>(comm: &C, local: &[T], f: F) -> Result<Vec<T>, RegistryError>
where
    C: Communicator,
    T: Pod,
    F: Fn(T, T) -> T,
{
    let parts = allgather_bytes(comm, cast_slice(local))?;
    let mut acc: Option<Vec<T>> = None;
    for part in parts {
        let values = decode_vec::<T>(&part)?;
        if values.len() != local.len() {
            return Err(RegistryError::Comm(format!(
                "all-reduce length mismatch: {} vs {}",
                values.len(),
                local.len()
            )));
        }
        acc = Some(match acc {
            None => values,
            Some(a) => a.into_iter().zip(values).map(|(x, y)| f(x, y)).collect(),
        });
    }
    Ok(acc.unwrap_or_default())
}

pub fn allreduce_i64_slice<C: Communicator>(
    comm: &C,
    local: &[i64],
    op: ReduceOp,
) -> Result<Vec<i64>, RegistryError> {
    match op {
        ReduceOp::Sum => allreduce_with(comm, local, |a, b| a + b),
        ReduceOp::Min => allreduce_with(comm, local, i64::min),
        ReduceOp::Max => allreduce_with(comm, local, i64::max),
    }
}

pub fn allreduce_i64<C: Communicator>(comm: &C, local: i64, op: ReduceOp) -> Result<i64, RegistryError> {
    Ok(allreduce_i64_slice(comm, &[local], op)?[0])
}

pub fn allreduce_f64_slice<C: Communicator>(
    comm: &C,
    local: &[f64],
    op: ReduceOp,
) -> Result<Vec<f64>, RegistryError> {
    match op {
        ReduceOp::Sum => allreduce_with(comm, local, |a, b| a + b),
        ReduceOp::Min => allreduce_with(comm, local, f64::min),
        ReduceOp::Max => allreduce_with(comm, local, f64::max),
    }
}

/// Modular sum, used to combine order-independent checksum contributions.
pub fn allreduce_wrapping_u64<C: Communicator>(
    comm: &C,
    local: &[u64],
) -> Result<Vec<u64>, RegistryError> {
    allreduce_with(comm, local, u64::wrapping_add)
}

pub fn barrier<C: Communicator>(comm: &C) -> Result<(), RegistryError> {
    allgather_bytes(comm, &[]).map(|_| ())
}

/// Personalised exchange: `sends[p]` goes to rank `p`; the result holds what
/// every rank sent to this one.
pub fn alltoallv_bytes<C: Communicator>(
    comm: &C,
    mut sends: Vec<Vec<u8>>,
) -> Result<Vec<Vec<u8>>, RegistryError> {
    let (me, size) = (comm.rank(), comm.size());
    if sends.len() != size {
        return Err(RegistryError::Internal(format!(
            "all-to-all needs {size} send buffers, got {}",
            sends.len()
        )));
    }
    let mut recvs = vec![Vec::new(); size];
    recvs[me] = std::mem::take(&mut sends[me]);
    for peer in (0..size).filter(|&p| p != me) {
        if me < peer {
            send_to(comm, peer, ALLTOALL_TAG, &sends[peer]);
            recvs[peer] = recv_from(comm, peer, ALLTOALL_TAG)?;
        } else {
            recvs[peer] = recv_from(comm, peer, ALLTOALL_TAG)?;
            send_to(comm, peer, ALLTOALL_TAG, &sends[peer]);
        }
    }
    Ok(recvs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    #[test]
    fn broadcast_from_nonzero_root() {
        let got = RayonComm::spmd(4, |comm| {
            let mine = if comm.rank() == 2 { b"grid".to_vec() } else { Vec::new() };
            broadcast_bytes(&comm, 2, mine).unwrap()
        });
        assert!(got.iter().all(|g| g == b"grid"));
    }

    #[test]
    fn gather_keeps_rank_order() {
        let got = RayonComm::spmd(3, |comm| {
            gather_bytes(&comm, 1, &[comm.rank() as u8 * 10]).unwrap()
        });
        assert!(got[0].is_none() && got[2].is_none());
        assert_eq!(got[1].clone().unwrap(), vec![vec![0], vec![10], vec![20]]);
    }

    #[test]
    fn reductions() {
        let got = RayonComm::spmd(4, |comm| {
            let r = comm.rank() as i64;
            (
                allreduce_i64(&comm, r + 1, ReduceOp::Sum).unwrap(),
                allreduce_i64(&comm, r, ReduceOp::Max).unwrap(),
                allreduce_f64_slice(&comm, &[r as f64, -(r as f64)], ReduceOp::Min).unwrap(),
            )
        });
        for (sum, max, mins) in got {
            assert_eq!(sum, 10);
            assert_eq!(max, 3);
            assert_eq!(mins, vec![0.0, -3.0]);
        }
    }

    #[test]
    fn wrapping_sum_overflows_quietly() {
        let got = RayonComm::spmd(2, |comm| allreduce_wrapping_u64(&comm, &[u64::MAX]).unwrap());
        assert_eq!(got[0], vec![u64::MAX - 1]);
    }

    #[test]
    fn alltoallv_delivers_personalised_buffers() {
        let got = RayonComm::spmd(3, |comm| {
            let me = comm.rank() as u8;
            let sends = (0..3u8).map(|p| vec![me, p]).collect();
            alltoallv_bytes(&comm, sends).unwrap()
        });
        for (rank, recvs) in got.iter().enumerate() {
            for (src, buf) in recvs.iter().enumerate() {
                assert_eq!(buf, &vec![src as u8, rank as u8]);
            }
        }
    }

    #[test]
    fn serial_group_short_circuits() {
        let comm = NoComm;
        assert_eq!(allreduce_i64(&comm, 5, ReduceOp::Sum).unwrap(), 5);
        assert_eq!(allgather_pod(&comm, &[1u32, 2]).unwrap(), vec![1, 2]);
        barrier(&comm).unwrap();
        let v: String = broadcast_value(&comm, 0, Some(&"x".to_string())).unwrap();
        assert_eq!(v, "x");
    }
}
