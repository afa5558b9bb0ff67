mod util;

use grid_registry::prelude::*;
use util::{assert_permutation, rect_spec};

/// Each rank owns a block of six cells, followed by two empty slots.
fn block_indexes(rank: usize) -> Vec<i64> {
    let mut out: Vec<i64> = (0..6).map(|k| (rank * 6 + k) as i64 + 1).collect();
    out.extend([CELL_INDEX_NULL, CELL_INDEX_NULL]);
    out
}

fn setup(comm: RayonComm, config: RegistryConfig) -> (Registry<RayonComm>, ComponentId, GridId) {
    let mut reg = Registry::new(config);
    let comp = reg.add_component("cpl@ocn", None, comm);
    let grid = reg
        .register_h2d_grid_via_global_data(comp, "ocn_grid", &rect_spec(6, 4), "setup")
        .unwrap();
    (reg, comp, grid)
}

#[test]
fn disjoint_blocks_cover_the_grid() {
    let owned = RayonComm::spmd(4, |comm| {
        let rank = comm.rank();
        let (mut reg, comp, grid) = setup(comm, RegistryConfig::default());
        let d = reg
            .register_h2d_parallel_decomposition("blocks", grid, None, &block_indexes(rank), None, "t")
            .unwrap();
        let decomp = reg.decomp(d).unwrap();
        assert_eq!(decomp.num_local_cells(), 8);
        assert_eq!(decomp.num_owned_cells(), 6);
        assert_eq!(decomp.global_indexes_one_based(), block_indexes(rank));
        assert_eq!(reg.decomp_id(comp, "blocks"), Some(d));
        decomp.cells().iter().flatten().copied().collect::<Vec<_>>()
    });
    let all: Vec<usize> = owned.into_iter().flatten().collect();
    assert_permutation(&all, &(0..24).collect::<Vec<_>>());
}

#[test]
fn shared_cell_is_reported_on_every_rank() {
    let results = RayonComm::spmd(4, |comm| {
        let rank = comm.rank();
        let (mut reg, _, grid) = setup(comm, RegistryConfig::default());
        let mut idx = block_indexes(rank);
        if rank == 3 {
            idx[6] = 8; // cell 8 is also in rank 1's block
        }
        reg.register_h2d_parallel_decomposition("blocks", grid, None, &idx, None, "t")
    });
    for res in results {
        match res {
            Err(RegistryError::DuplicateOwnership {
                global_index,
                first_rank,
                second_rank,
                ..
            }) => {
                assert_eq!(global_index, 8);
                assert_eq!((first_rank, second_rank), (1, 3));
            }
            other => panic!("expected a duplicate-ownership error, got {other:?}"),
        }
    }
}

#[test]
fn tolerant_and_production_modes_accept_shared_cells() {
    let tolerant = RegistryConfig {
        tolerant: true,
        ..Default::default()
    };
    for config in [tolerant, RegistryConfig::production()] {
        let counts = RayonComm::spmd(2, |comm| {
            let rank = comm.rank();
            let (mut reg, _, grid) = setup(comm, config.clone());
            let idx = if rank == 0 { vec![1, 2, 3] } else { vec![3, 4] };
            reg.register_h2d_parallel_decomposition("overlap", grid, None, &idx, None, "t")
                .unwrap();
            reg.diagnostics().len()
        });
        let expected = usize::from(config.tolerant);
        assert_eq!(counts, vec![expected, expected]);
    }
}

#[test]
fn halo_fills_the_empty_slots() {
    let results = RayonComm::spmd(2, |comm| {
        let rank = comm.rank();
        let (mut reg, _, grid) = setup(comm, RegistryConfig::default());
        let mut idx: Vec<i64> = (0..12).map(|k| (rank * 12 + k) as i64 + 1).collect();
        idx.extend([CELL_INDEX_NULL; 2]);
        let host = reg
            .register_h2d_parallel_decomposition("d", grid, None, &idx, Some(&[7, 7]), "t")
            .unwrap();
        // the first two cells of the other rank's block
        let other = (1 - rank) * 12;
        let halo = reg
            .register_halo_parallel_decomposition("halo", host, &[13, 14], &[other as i64 + 1, other as i64 + 2], "t")
            .unwrap();
        let h = reg.decomp(halo).unwrap();
        assert_eq!(h.name(), "d@halo");
        assert_eq!(h.halo_host(), Some(host));
        assert_eq!(h.chunks(), reg.decomp(host).unwrap().chunks());
        let mut want = vec![None; 14];
        want[12] = Some(other);
        want[13] = Some(other + 1);
        assert_eq!(h.cells(), want.as_slice());

        let clash = reg.register_halo_parallel_decomposition("bad", host, &[1], &[other as i64 + 1], "t");
        matches!(clash, Err(RegistryError::HaloConflict { .. }))
    });
    assert_eq!(results, vec![true, true]);
}

#[test]
fn full_and_empty_views_of_a_decomposition() {
    let results = RayonComm::spmd(3, |comm| {
        let rank = comm.rank();
        let (mut reg, comp, grid) = setup(comm, RegistryConfig::default());
        let parallel = reg.register_default_parallel_decomp(grid, comp, "t").unwrap();
        let full = reg.full_decomp(parallel).unwrap();
        let empty = reg.empty_decomp(parallel).unwrap();
        assert_eq!(reg.full_decomp(parallel).unwrap(), full);
        assert_eq!(reg.decomps().len(), 3);
        (
            rank,
            reg.decomp(parallel).unwrap().num_local_cells(),
            reg.decomp(full).unwrap().num_local_cells(),
            reg.decomp(empty).unwrap().num_local_cells(),
        )
    });
    assert_eq!(results, vec![(0, 8, 24, 0), (1, 8, 0, 0), (2, 8, 0, 0)]);
}
