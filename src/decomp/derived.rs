//! Decompositions derived from a grid or from another decomposition.

use crate::algs::blocks::even_block;
use crate::algs::communicator::Communicator;
use crate::component::ComponentId;
use crate::decomp::register::NewDecomp;
use crate::handle::{DecompId, GridId};
use crate::registry::Registry;
use crate::registry_error::RegistryError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Derived {
    Full,
    Empty,
}

impl Derived {
    fn prefix(self) -> &'static str {
        match self {
            Derived::Full => "fully_decomp_for_",
            Derived::Empty => "empty_decomp_for_",
        }
    }
}

impl<C: Communicator> Registry<C> {
    /// The decomposition holding every cell of `source`'s grid on the first
    /// process of its component. Built once per source.
    pub fn full_decomp(&mut self, source: DecompId) -> Result<DecompId, RegistryError> {
        self.derived_decomp(source, Derived::Full)
    }

    /// The decomposition with no cells anywhere. Built once per source.
    pub fn empty_decomp(&mut self, source: DecompId) -> Result<DecompId, RegistryError> {
        self.derived_decomp(source, Derived::Empty)
    }

    fn derived_decomp(&mut self, source: DecompId, kind: Derived) -> Result<DecompId, RegistryError> {
        let memo = match kind {
            Derived::Full => &self.decomps.full_of,
            Derived::Empty => &self.decomps.empty_of,
        };
        if let Some(&id) = memo.get(&source) {
            return Ok(id);
        }
        let base = self.decomps.get(source)?;
        let (comp, grid, grid_size) = (base.comp(), base.grid(), base.grid_size());
        let name = format!("{}{}", kind.prefix(), base.name());
        if self.decomps.by_name(comp, &name).is_some() {
            return Err(RegistryError::DerivedDecompExists { name });
        }
        let cells = match kind {
            Derived::Full if self.components.comm(comp)?.rank() == 0 => (0..grid_size).map(Some).collect(),
            _ => Vec::new(),
        };
        let annotation = format!("derived from \"{}\"", base.name());
        let id = self.push_decomp(NewDecomp {
            name: &name,
            comp,
            grid,
            cells,
            chunks: None,
            halo_host: None,
            annotation: &annotation,
        })?;
        match kind {
            Derived::Full => self.decomps.full_of.insert(source, id),
            Derived::Empty => self.decomps.empty_of.insert(source, id),
        };
        Ok(id)
    }

    /// Every cell of H2D `grid` on the first process of its component.
    /// Returns the existing decomposition on later calls.
    pub fn register_default_serial_decomp(&mut self, grid: GridId, annotation: &str) -> Result<DecompId, RegistryError> {
        let grid_size = self.h2d_grid_size(grid, annotation)?;
        let g = self.grids.get(grid)?;
        let comp = g.comp();
        let name = format!("default_serial_decomp_of_{}", g.name());
        if let Some(id) = self.decomps.by_name(comp, &name) {
            return Ok(id);
        }
        let cells = if self.components.comm(comp)?.rank() == 0 {
            (0..grid_size).map(Some).collect()
        } else {
            Vec::new()
        };
        self.push_decomp(NewDecomp {
            name: &name,
            comp,
            grid,
            cells,
            chunks: None,
            halo_host: None,
            annotation,
        })
    }

    /// The cells of H2D `grid` split evenly over the processes of `host`,
    /// the lowest ranks taking the remainder. Returns the existing
    /// decomposition on later calls.
    pub fn register_default_parallel_decomp(
        &mut self,
        grid: GridId,
        host: ComponentId,
        annotation: &str,
    ) -> Result<DecompId, RegistryError> {
        let grid_size = self.h2d_grid_size(grid, annotation)?;
        let g = self.grids.get(grid)?;
        let name = if host == g.comp() {
            format!("default_parallel_decomp_of_{}", g.name())
        } else {
            format!(
                "default_parallel_decomp_of_{}_at_COMP_{}",
                g.name(),
                self.components.full_name(host)?
            )
        };
        if let Some(id) = self.decomps.by_name(host, &name) {
            return Ok(id);
        }
        let comm = self.components.comm(host)?;
        let cells = even_block(grid_size, comm.size(), comm.rank()).map(Some).collect();
        self.push_decomp(NewDecomp {
            name: &name,
            comp: host,
            grid,
            cells,
            chunks: None,
            halo_host: None,
            annotation,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    use crate::config::RegistryConfig;
    use crate::grid::h2d::{H2dDims, H2dGridSpec};
    use crate::registry::Registry;

    fn spec() -> H2dGridSpec {
        H2dGridSpec::new(
            "LON_LAT",
            "degrees",
            true,
            H2dDims::Unstructured { grid_size: 10 },
            (0..10).map(|i| i as f64 * 36.0).collect(),
            vec![0.0; 10],
        )
    }

    #[test]
    fn full_and_empty_are_memoised() {
        let mut reg = Registry::<NoComm>::new(RegistryConfig::default());
        let comp = reg.add_component("root@ice", None, NoComm);
        let grid = reg.register_h2d_grid_via_global_data(comp, "g", &spec(), "a").unwrap();
        let d = reg
            .register_h2d_parallel_decomposition("d", grid, None, &[1, 2, 3], None, "a")
            .unwrap();
        let full = reg.full_decomp(d).unwrap();
        assert_eq!(reg.full_decomp(d).unwrap(), full);
        assert_eq!(reg.decomp(full).unwrap().name(), "fully_decomp_for_d");
        assert_eq!(reg.decomp(full).unwrap().num_local_cells(), 10);
        let empty = reg.empty_decomp(d).unwrap();
        assert_eq!(reg.empty_decomp(d).unwrap(), empty);
        assert_eq!(reg.decomp(empty).unwrap().num_local_cells(), 0);
        assert_ne!(full, empty);
    }

    #[test]
    fn defaults_over_four_ranks() {
        let results = RayonComm::spmd(4, |comm| {
            let rank = comm.rank();
            let mut reg = Registry::new(RegistryConfig::default());
            let comp = reg.add_component("root@ice", None, comm);
            let grid = reg.register_h2d_grid_via_global_data(comp, "g", &spec(), "a").unwrap();
            let serial = reg.register_default_serial_decomp(grid, "a").unwrap();
            assert_eq!(reg.register_default_serial_decomp(grid, "b").unwrap(), serial);
            let parallel = reg.register_default_parallel_decomp(grid, comp, "a").unwrap();
            let d = reg.decomp(parallel).unwrap();
            assert_eq!(d.name(), "default_parallel_decomp_of_g");
            (
                rank,
                reg.decomp(serial).unwrap().num_local_cells(),
                d.cells().iter().flatten().copied().collect::<Vec<_>>(),
            )
        });
        for (rank, serial, cells) in results {
            assert_eq!(serial, if rank == 0 { 10 } else { 0 });
            let expected: Vec<usize> = match rank {
                0 => vec![0, 1, 2],
                1 => vec![3, 4, 5],
                2 => vec![6, 7],
                _ => vec![8, 9],
            };
            assert_eq!(cells, expected);
        }
    }
}
