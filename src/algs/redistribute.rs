//! Distributed duplicate-key detection.
//!
//! Each rank contributes `(key, value)` pairs. Pairs are sent to the rank that
//! owns the key's block of the key space, sorted there, and scanned for equal
//! neighbours, so every copy of a key meets every other copy on exactly one
//! rank. Nothing here knows about grids or decompositions.

use crate::algs::collective::{allgather_pod, alltoallv_bytes};
use crate::algs::communicator::Communicator;
use crate::algs::wire::{WirePair, cast_slice, decode_vec};
use crate::registry_error::RegistryError;
use itertools::Itertools;

/// Two pairs sharing a key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DuplicateKey {
    pub key: u64,
    pub first: u64,
    pub second: u64,
}

/// Rank collecting `key` when keys lie in `[0, key_space)`: keys are split
/// into `nprocs` blocks of `ceil(key_space / nprocs)`.
pub fn target_rank(key: u64, key_space: u64, nprocs: usize) -> usize {
    let nprocs = nprocs.max(1);
    let block = key_space.div_ceil(nprocs as u64).max(1);
    ((key / block) as usize).min(nprocs - 1)
}

/// Send every pair to `target(key)` and return what this rank received.
pub fn redistribute_by_target<C, F>(
    comm: &C,
    pairs: &[(u64, u64)],
    target: F,
) -> Result<Vec<(u64, u64)>, RegistryError>
where
    C: Communicator,
    F: Fn(u64) -> usize,
{
    let size = comm.size();
    let mut buckets: Vec<Vec<WirePair>> = vec![Vec::new(); size];
    for &(key, value) in pairs {
        let dst = target(key);
        if dst >= size {
            return Err(RegistryError::Internal(format!(
                "key {key} mapped to rank {dst} of a {size}-rank group"
            )));
        }
        buckets[dst].push(WirePair::new(key, value));
    }
    let sends = buckets.iter().map(|b| cast_slice(b).to_vec()).collect();
    let mut out = Vec::new();
    for buf in alltoallv_bytes(comm, sends)? {
        out.extend(decode_vec::<WirePair>(&buf)?.into_iter().map(|p| (p.key(), p.value())));
    }
    Ok(out)
}

/// Sort `pairs` by key (then value) and report every adjacent equal-key pair.
pub fn adjacent_duplicates(pairs: &mut [(u64, u64)]) -> Vec<DuplicateKey> {
    pairs.sort_unstable();
    pairs
        .iter()
        .tuple_windows()
        .filter(|(a, b)| a.0 == b.0)
        .map(|(a, b)| DuplicateKey {
            key: a.0,
            first: a.1,
            second: b.1,
        })
        .collect()
}

/// Collective: find the smallest key held more than once across the group.
/// Every rank returns the same answer.
pub fn find_duplicate_key<C: Communicator>(
    comm: &C,
    pairs: &[(u64, u64)],
    key_space: u64,
) -> Result<Option<DuplicateKey>, RegistryError> {
    let size = comm.size();
    let mut received = redistribute_by_target(comm, pairs, |k| target_rank(k, key_space, size))?;
    let local = adjacent_duplicates(&mut received).into_iter().next();
    let wire = local.map_or([u64::MAX; 3], |d| [d.key, d.first, d.second]);
    let all = allgather_pod(comm, &wire)?;
    Ok(all
        .chunks_exact(3)
        .filter(|c| c[0] != u64::MAX)
        .min_by_key(|c| c[0])
        .map(|c| DuplicateKey {
            key: c[0],
            first: c[1],
            second: c[2],
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};
    use proptest::prelude::*;

    #[test]
    fn target_rank_blocks() {
        // 10 keys over 4 ranks: blocks of 3
        let owners: Vec<_> = (0..10).map(|k| target_rank(k, 10, 4)).collect();
        assert_eq!(owners, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3]);
        assert_eq!(target_rank(0, 0, 3), 0);
    }

    #[test]
    fn local_scan_reports_each_adjacent_pair() {
        let mut pairs = vec![(5, 1), (2, 0), (5, 0), (7, 2), (5, 3)];
        let dups = adjacent_duplicates(&mut pairs);
        assert_eq!(dups.len(), 2);
        assert!(dups.iter().all(|d| d.key == 5));
        assert_eq!((dups[0].first, dups[0].second), (0, 1));
    }

    #[test]
    fn serial_group() {
        assert_eq!(find_duplicate_key(&NoComm, &[(1, 0), (2, 0)], 3).unwrap(), None);
        let d = find_duplicate_key(&NoComm, &[(1, 0), (1, 0)], 3).unwrap().unwrap();
        assert_eq!(d.key, 1);
    }

    #[test]
    fn disjoint_ownership_across_ranks() {
        let got = RayonComm::spmd(3, |comm| {
            let r = comm.rank() as u64;
            let pairs: Vec<_> = (0..4).map(|i| (i * 3 + r, r)).collect();
            find_duplicate_key(&comm, &pairs, 12).unwrap()
        });
        assert!(got.iter().all(Option::is_none));
    }

    #[test]
    fn shared_key_found_on_every_rank() {
        let got = RayonComm::spmd(4, |comm| {
            let r = comm.rank() as u64;
            let mut pairs = vec![(r, r)];
            if r == 1 || r == 3 {
                pairs.push((9, r));
            }
            find_duplicate_key(&comm, &pairs, 10).unwrap()
        });
        for d in got {
            assert_eq!(d, Some(DuplicateKey { key: 9, first: 1, second: 3 }));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]
        #[test]
        fn injected_duplicate_is_the_reported_one(
            n in 4u64..60,
            nprocs in 1usize..5,
            dup_seed in any::<u64>(),
        ) {
            let dup = dup_seed % n;
            let got = RayonComm::spmd(nprocs, |comm| {
                let r = comm.rank();
                let mut pairs: Vec<(u64, u64)> = (0..n)
                    .filter(|k| (*k as usize) % comm.size() == r)
                    .map(|k| (k, r as u64))
                    .collect();
                if r == comm.size() - 1 {
                    pairs.push((dup, r as u64));
                }
                find_duplicate_key(&comm, &pairs, n).unwrap()
            });
            for d in got {
                prop_assert_eq!(d.map(|d| d.key), Some(dup));
            }
        }
    }
}
