//! Order-independent distributed checksums.
//!
//! Every cell contributes `mix(global_index, value)`. Contributions are added
//! modulo 2^64 locally and across ranks, so the result depends only on the
//! set of `(global_index, value)` pairs and not on how cells are distributed
//! or ordered.

use crate::algs::collective::allreduce_wrapping_u64;
use crate::algs::communicator::Communicator;
use crate::geometry::CellData;
use crate::registry_error::RegistryError;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[inline]
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[inline]
pub fn mix(global_index: u64, bits: u64) -> u64 {
    splitmix64(global_index ^ splitmix64(bits))
}

/// Bit pattern of a coordinate; `-0.0` and `0.0` hash alike.
#[inline]
pub fn f64_bits(v: f64) -> u64 {
    if v == 0.0 { 0 } else { v.to_bits() }
}

/// The three horizontal checksums.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct H2dChecksums {
    pub mask: u64,
    pub center_lon: u64,
    pub center_lat: u64,
}

/// This rank's `[mask, lon, lat]` contributions.
pub fn local_contributions(cells: &CellData, rank: usize, size: usize) -> [u64; 3] {
    let range = cells.contributing_range(rank, size);
    let one = |i: usize| {
        let g = cells.global_of(i) as u64;
        [
            mix(g, cells.mask_of(i) as u64),
            mix(g, f64_bits(cells.center_lon[i])),
            mix(g, f64_bits(cells.center_lat[i])),
        ]
    };
    let add = |a: [u64; 3], b: [u64; 3]| {
        [
            a[0].wrapping_add(b[0]),
            a[1].wrapping_add(b[1]),
            a[2].wrapping_add(b[2]),
        ]
    };
    #[cfg(feature = "rayon")]
    {
        range.into_par_iter().map(one).reduce(|| [0; 3], add)
    }
    #[cfg(not(feature = "rayon"))]
    {
        range.map(one).fold([0; 3], add)
    }
}

/// Collective over the component that holds `cells`.
pub fn h2d_checksums<C: Communicator>(comm: &C, cells: &CellData) -> Result<H2dChecksums, RegistryError> {
    let local = local_contributions(cells, comm.rank(), comm.size());
    let total = allreduce_wrapping_u64(comm, &local)?;
    Ok(H2dChecksums {
        mask: total[0],
        center_lon: total[1],
        center_lat: total[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;

    fn global_cells(n: usize) -> CellData {
        CellData::replicated(
            (0..n).map(|i| (i * 15) as f64).collect(),
            (0..n).map(|i| -80.0 + i as f64).collect(),
            Some((0..n).map(|i| (i % 3 != 0) as i32).collect()),
        )
    }

    fn local_view(all: &CellData, owned: &[usize]) -> CellData {
        CellData {
            global_index: Some(owned.to_vec()),
            center_lon: owned.iter().map(|&g| all.center_lon[g]).collect(),
            center_lat: owned.iter().map(|&g| all.center_lat[g]).collect(),
            mask: all.mask.as_ref().map(|m| owned.iter().map(|&g| m[g]).collect()),
        }
    }

    #[test]
    fn sensitive_to_values_and_positions() {
        let a = h2d_checksums(&NoComm, &global_cells(10)).unwrap();
        let mut moved = global_cells(10);
        moved.center_lat.swap(2, 3);
        let b = h2d_checksums(&NoComm, &moved).unwrap();
        assert_eq!(a.center_lon, b.center_lon);
        assert_ne!(a.center_lat, b.center_lat);
        assert_eq!(a.mask, b.mask);
    }

    #[test]
    fn replicated_and_distributed_agree() {
        let serial = h2d_checksums(&NoComm, &global_cells(24)).unwrap();
        let replicated = RayonComm::spmd(3, |comm| h2d_checksums(&comm, &global_cells(24)).unwrap());
        let distributed = RayonComm::spmd(3, |comm| {
            let all = global_cells(24);
            let owned: Vec<usize> = (0..24).filter(|g| g % 3 == comm.rank()).collect();
            h2d_checksums(&comm, &local_view(&all, &owned)).unwrap()
        });
        assert!(replicated.iter().all(|c| *c == serial));
        assert!(distributed.iter().all(|c| *c == serial));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn permuted_partition_same_checksums(seed in any::<u64>(), nprocs in 1usize..5) {
            let n = 37;
            let serial = h2d_checksums(&NoComm, &global_cells(n)).unwrap();
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut SmallRng::seed_from_u64(seed));
            let got = RayonComm::spmd(nprocs, |comm| {
                let all = global_cells(n);
                let owned: Vec<usize> = order
                    .iter()
                    .copied()
                    .enumerate()
                    .filter(|(pos, _)| pos % comm.size() == comm.rank())
                    .map(|(_, g)| g)
                    .collect();
                h2d_checksums(&comm, &local_view(&all, &owned)).unwrap()
            });
            for c in got {
                prop_assert_eq!(c, serial);
            }
        }
    }
}
