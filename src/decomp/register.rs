//! Registration of caller-described decompositions and decomposition lookups.

use crate::algs::communicator::Communicator;
use crate::algs::redistribute::find_duplicate_key;
use crate::component::ComponentId;
use crate::decomp::entity::{CELL_INDEX_NULL, Chunks, Decomposition};
use crate::handle::{DecompId, GridId};
use crate::registry::{Registry, agree};
use crate::registry_error::RegistryError;

fn out_of_range(decomp: &str, index: i64, limit: usize, annotation: &str) -> RegistryError {
    RegistryError::CellIndexOutOfRange {
        decomp: decomp.to_string(),
        index,
        limit,
        annotation: annotation.to_string(),
    }
}

/// 1-based caller indices to 0-based cells; [`CELL_INDEX_NULL`] marks an
/// empty slot.
fn to_cells(global: &[i64], grid_size: usize, decomp: &str, annotation: &str) -> Result<Vec<Option<usize>>, RegistryError> {
    global
        .iter()
        .map(|&g| match g {
            CELL_INDEX_NULL => Ok(None),
            g if g >= 1 && g as u64 <= grid_size as u64 => Ok(Some((g - 1) as usize)),
            g => Err(out_of_range(decomp, g, grid_size, annotation)),
        })
        .collect()
}

/// Fields of a decomposition about to be pushed.
pub(crate) struct NewDecomp<'a> {
    pub name: &'a str,
    pub comp: ComponentId,
    pub grid: GridId,
    pub cells: Vec<Option<usize>>,
    pub chunks: Option<Chunks>,
    pub halo_host: Option<DecompId>,
    pub annotation: &'a str,
}

impl<C: Communicator> Registry<C> {
    /// Size of `grid`, which must be a horizontal grid.
    pub(crate) fn h2d_grid_size(&self, grid: GridId, annotation: &str) -> Result<usize, RegistryError> {
        let g = self.grids.get(grid)?;
        if !g.is_h2d() {
            return Err(RegistryError::NotHorizontal {
                grid: g.name().to_string(),
                annotation: annotation.to_string(),
            });
        }
        Ok(g.size())
    }

    pub(crate) fn check_decomp_name(&self, comp: ComponentId, name: &str, annotation: &str) -> Result<(), RegistryError> {
        if self.decomps.by_name(comp, name).is_some() {
            return Err(RegistryError::DuplicateDecompName {
                comp: self.components.full_name(comp)?.to_string(),
                name: name.to_string(),
                annotation: annotation.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn push_decomp(&mut self, new: NewDecomp<'_>) -> Result<DecompId, RegistryError> {
        let grid_size = self.grids.get(new.grid)?.size();
        let id = self.decomps.push(Decomposition {
            id: self.decomps.next_id()?,
            name: new.name.to_string(),
            comp: new.comp,
            grid: new.grid,
            grid_size,
            cells: new.cells,
            chunks: new.chunks,
            halo_host: new.halo_host,
            annotation: new.annotation.to_string(),
        })?;
        log::debug!(
            "registered decomposition \"{}\" of \"{}\" as {id} ({})",
            new.name,
            self.components.full_name(new.comp)?,
            new.annotation
        );
        Ok(id)
    }

    /// Collective over the host component: register how the cells of an H2D
    /// grid are spread over the host's processes.
    ///
    /// `global_indexes` holds one 1-based cell index per local slot, or
    /// [`CELL_INDEX_NULL`]. The host defaults to the grid's component. With
    /// error checking enabled, a cell held by two processes is reported.
    pub fn register_h2d_parallel_decomposition(
        &mut self,
        name: &str,
        grid: GridId,
        host: Option<ComponentId>,
        global_indexes: &[i64],
        chunk_sizes: Option<&[usize]>,
        annotation: &str,
    ) -> Result<DecompId, RegistryError> {
        const STEP: &str = "register_h2d_parallel_decomposition";
        let host = match host {
            Some(host) => host,
            None => self.grids.get(grid)?.comp(),
        };
        let comm = self.components.shared_comm(host)?;
        let comm = &*comm;

        let checked = (|| -> Result<_, RegistryError> {
            let grid_size = self.h2d_grid_size(grid, annotation)?;
            self.check_decomp_name(host, name, annotation)?;
            let cells = to_cells(global_indexes, grid_size, name, annotation)?;
            let chunks = chunk_sizes
                .map(|sizes| Chunks::from_sizes(sizes, cells.len(), name, annotation))
                .transpose()?;
            Ok((grid_size, cells, chunks))
        })();
        let (grid_size, cells, chunks) = agree(comm, STEP, checked)?;

        if self.config.report_error_enabled {
            let rank = comm.rank() as u64;
            let pairs: Vec<(u64, u64)> = cells.iter().flatten().map(|&g| (g as u64, rank)).collect();
            if let Some(dup) = find_duplicate_key(comm, &pairs, grid_size as u64)? {
                self.report(RegistryError::DuplicateOwnership {
                    what: format!("parallel decomposition \"{name}\""),
                    global_index: dup.key + 1,
                    first_rank: dup.first as usize,
                    second_rank: dup.second as usize,
                    annotation: annotation.to_string(),
                })?;
            }
        }

        self.push_decomp(NewDecomp {
            name,
            comp: host,
            grid,
            cells,
            chunks,
            halo_host: None,
            annotation,
        })
    }

    /// Collective over the host decomposition's component: extend `host`
    /// with halo cells.
    ///
    /// `local_indexes` are 1-based slots of `host` that must be empty there;
    /// `global_indexes` the 1-based cells placed in them. The result is named
    /// `<host>@<halo_name>` and keeps the host's chunks.
    pub fn register_halo_parallel_decomposition(
        &mut self,
        halo_name: &str,
        host: DecompId,
        local_indexes: &[i64],
        global_indexes: &[i64],
        annotation: &str,
    ) -> Result<DecompId, RegistryError> {
        const STEP: &str = "register_halo_parallel_decomposition";
        let base = self.decomps.get(host)?;
        let (comp, grid) = (base.comp(), base.grid());
        let name = format!("{}@{halo_name}", base.name());
        let comm = self.components.shared_comm(comp)?;

        let checked = (|| -> Result<_, RegistryError> {
            self.check_decomp_name(comp, &name, annotation)?;
            if local_indexes.len() != global_indexes.len() {
                return Err(RegistryError::ArraySize {
                    grid: name.clone(),
                    array: "global_indexes",
                    expected: local_indexes.len(),
                    actual: global_indexes.len(),
                    annotation: annotation.to_string(),
                });
            }
            let base = self.decomps.get(host)?;
            let slots = base.num_local_cells();
            let mut cells: Vec<Option<usize>> = vec![None; slots];
            for (&local, &global) in local_indexes.iter().zip(global_indexes) {
                if local < 1 || local as u64 > slots as u64 {
                    return Err(out_of_range(&name, local, slots, annotation));
                }
                if global < 1 || global as u64 > base.grid_size() as u64 {
                    return Err(out_of_range(&name, global, base.grid_size(), annotation));
                }
                let slot = (local - 1) as usize;
                let cell = (global - 1) as usize;
                let conflict = |detail: String| RegistryError::HaloConflict {
                    decomp: name.clone(),
                    slot: local as usize,
                    detail,
                    annotation: annotation.to_string(),
                };
                if let Some(owned) = base.global_index(slot) {
                    return Err(conflict(format!("the host already holds cell {} there", owned + 1)));
                }
                match cells[slot] {
                    Some(previous) if previous != cell => {
                        return Err(conflict(format!(
                            "given both cell {} and cell {global}",
                            previous + 1
                        )));
                    }
                    _ => cells[slot] = Some(cell),
                }
            }
            Ok((cells, base.chunks().cloned()))
        })();
        let (cells, chunks) = agree(&*comm, STEP, checked)?;

        self.push_decomp(NewDecomp {
            name: &name,
            comp,
            grid,
            cells,
            chunks,
            halo_host: Some(host),
            annotation,
        })
    }

    pub fn decomp(&self, id: DecompId) -> Result<&Decomposition, RegistryError> {
        self.decomps.get(id)
    }

    pub fn decomp_id(&self, comp: ComponentId, name: &str) -> Option<DecompId> {
        self.decomps.by_name(comp, name)
    }

    pub fn decomp_id_from_raw(&self, raw: u64) -> Result<DecompId, RegistryError> {
        DecompId::from_raw(raw)
            .filter(|id| self.decomps.contains(*id))
            .ok_or(RegistryError::InvalidDecompId { raw })
    }

    pub fn is_decomp_id_legal(&self, raw: u64) -> bool {
        self.decomp_id_from_raw(raw).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::RegistryConfig;
    use crate::grid::h2d::{H2dDims, H2dGridSpec};

    fn setup() -> (Registry<NoComm>, ComponentId, GridId) {
        let mut reg = Registry::new(RegistryConfig::default());
        let comp = reg.add_component("root@ocn", None, NoComm);
        let spec = H2dGridSpec::new(
            "LON_LAT",
            "degrees",
            true,
            H2dDims::Rectangular { lon_size: 4, lat_size: 3 },
            vec![0.0, 90.0, 180.0, 270.0],
            vec![-60.0, 0.0, 60.0],
        );
        let grid = reg.register_h2d_grid_via_global_data(comp, "ocn_grid", &spec, "a").unwrap();
        (reg, comp, grid)
    }

    #[test]
    fn indexes_are_stored_zero_based() {
        let (mut reg, comp, grid) = setup();
        let d = reg
            .register_h2d_parallel_decomposition("d", grid, None, &[12, CELL_INDEX_NULL, 1], Some(&[1, 2]), "a")
            .unwrap();
        let decomp = reg.decomp(d).unwrap();
        assert_eq!(decomp.cells(), &[Some(11), None, Some(0)]);
        assert_eq!(decomp.chunks().unwrap().chunk_of(2), Some(1));
        assert_eq!(reg.decomp_id(comp, "d"), Some(d));
        assert_eq!(reg.decomp_id_from_raw(d.raw()).unwrap(), d);
        assert!(!reg.is_decomp_id_legal(grid.raw()));
    }

    #[test]
    fn registration_errors() {
        let (mut reg, _, grid) = setup();
        assert!(matches!(
            reg.register_h2d_parallel_decomposition("d", grid, None, &[13], None, "a"),
            Err(RegistryError::CellIndexOutOfRange { index: 13, limit: 12, .. })
        ));
        assert!(matches!(
            reg.register_h2d_parallel_decomposition("d", grid, None, &[0], None, "a"),
            Err(RegistryError::CellIndexOutOfRange { index: 0, .. })
        ));
        assert!(matches!(
            reg.register_h2d_parallel_decomposition("d", grid, None, &[1, 2], Some(&[3]), "a"),
            Err(RegistryError::ChunkSizes { .. })
        ));
        reg.register_h2d_parallel_decomposition("d", grid, None, &[1], None, "a").unwrap();
        assert!(matches!(
            reg.register_h2d_parallel_decomposition("d", grid, None, &[2], None, "a"),
            Err(RegistryError::DuplicateDecompName { .. })
        ));
        assert!(matches!(
            reg.register_h2d_parallel_decomposition("dup", grid, None, &[2, 2], None, "a"),
            Err(RegistryError::DuplicateOwnership { global_index: 2, .. })
        ));
    }

    #[test]
    fn non_horizontal_grid_is_rejected() {
        let (mut reg, comp, _) = setup();
        let t = reg.register_time_grid(comp, "t", 4, "a").unwrap();
        assert!(matches!(
            reg.register_h2d_parallel_decomposition("d", t, None, &[1], None, "a"),
            Err(RegistryError::NotHorizontal { .. })
        ));
    }

    #[test]
    fn halo_fills_empty_host_slots() {
        let (mut reg, comp, grid) = setup();
        let host = reg
            .register_h2d_parallel_decomposition(
                "d",
                grid,
                None,
                &[1, 2, CELL_INDEX_NULL, CELL_INDEX_NULL],
                Some(&[2, 2]),
                "a",
            )
            .unwrap();
        let halo = reg
            .register_halo_parallel_decomposition("h", host, &[3, 4, 4], &[7, 8, 8], "b")
            .unwrap();
        let h = reg.decomp(halo).unwrap();
        assert_eq!(h.name(), "d@h");
        assert_eq!(h.cells(), &[None, None, Some(6), Some(7)]);
        assert_eq!(h.halo_host(), Some(host));
        assert_eq!(h.chunks(), reg.decomp(host).unwrap().chunks());
        assert_eq!(reg.decomp_id(comp, "d@h"), Some(halo));

        assert!(matches!(
            reg.register_halo_parallel_decomposition("x", host, &[1], &[5], "c"),
            Err(RegistryError::HaloConflict { slot: 1, .. })
        ));
        assert!(matches!(
            reg.register_halo_parallel_decomposition("y", host, &[3, 3], &[5, 6], "c"),
            Err(RegistryError::HaloConflict { slot: 3, .. })
        ));
        assert!(matches!(
            reg.register_halo_parallel_decomposition("z", host, &[5], &[5], "c"),
            Err(RegistryError::CellIndexOutOfRange { .. })
        ));
    }
}
