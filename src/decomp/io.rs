//! I/O-oriented repartitioning of an H2D grid over a subset of processes.
//!
//! Every process of the grid's component takes part. The ones selected by
//! [`IoLayout`] receive cells, the rest register an empty slice. A grid has
//! at most one I/O decomposition; later requests return it with the layout
//! it was built with. Each call also splits the component's communicator
//! into an I/O group and a non-I/O group.

use crate::algs::blocks::even_block;
use crate::algs::communicator::Communicator;
use crate::component::ComponentId;
use crate::decomp::register::NewDecomp;
use crate::handle::{DecompId, GridId};
use crate::registry::Registry;
use crate::registry_error::RegistryError;

/// Which ranks of a group do I/O: every `stride`-th rank, up to
/// `num_io_procs` of them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IoLayout {
    pub num_io_procs: usize,
    pub stride: usize,
}

impl IoLayout {
    /// Clamp the requested counts to a group of `group_size` processes.
    pub fn new(num_io_procs: usize, stride: usize, group_size: usize) -> Self {
        let size = group_size.max(1);
        let num_io_procs = num_io_procs.clamp(1, size);
        let stride = stride.clamp(1, size / num_io_procs);
        IoLayout { num_io_procs, stride }
    }

    pub fn is_io(&self, rank: usize) -> bool {
        rank % self.stride == 0 && rank / self.stride < self.num_io_procs
    }

    pub fn io_index(&self, rank: usize) -> Option<usize> {
        self.is_io(rank).then_some(rank / self.stride)
    }
}

/// An I/O decomposition together with this process's side of the split.
#[derive(Debug)]
pub struct IoDecomposition<C> {
    pub decomp: DecompId,
    pub layout: IoLayout,
    /// Position among the I/O processes, `None` on the others.
    pub io_index: Option<usize>,
    /// The I/O group on I/O processes, the remaining processes elsewhere.
    pub group: C,
}

/// `(columns, rows)` of the tiling of a `lon_size x lat_size` grid for at
/// most `num_io` tiles. Tiles are roughly square.
pub fn tiling_shape(lon_size: usize, lat_size: usize, num_io: usize) -> (usize, usize) {
    let num_io = num_io.max(1);
    let side = (((lon_size * lat_size) as f64 / num_io as f64).sqrt().floor() as usize).max(1);
    let mut cols = (lon_size / side).max(1);
    let mut rows = (lat_size / side).max(1);
    while cols * rows > num_io {
        if cols >= rows && cols > 1 {
            cols -= 1;
        } else {
            rows -= 1;
        }
    }
    (cols, rows)
}

/// Zero-based global cells of tile `tile`, columns varying fastest over
/// tiles and latitude fastest within a tile.
pub fn tile_cells(lon_size: usize, lat_size: usize, (cols, rows): (usize, usize), tile: usize) -> Vec<usize> {
    if tile >= cols * rows {
        return Vec::new();
    }
    let lons = even_block(lon_size, cols, tile % cols);
    let lats = even_block(lat_size, rows, tile / cols);
    lons.flat_map(|i| lats.clone().map(move |j| i * lat_size + j)).collect()
}

fn io_decomp_name(grid: &str) -> String {
    format!("parallel_IO_decomp_name_of_{grid}")
}

fn split_io_group<C: Communicator>(comm: &C, io_index: Option<usize>) -> Result<C, RegistryError> {
    let color = if io_index.is_some() { 0 } else { 1 };
    comm.split(Some(color))?
        .ok_or_else(|| RegistryError::Internal("split with a colour returned no group".into()))
}

impl<C: Communicator> Registry<C> {
    /// Contiguous blocks of the global index range, one per I/O process.
    /// Collective over the grid's component.
    pub fn register_consecutive_io_decomp(
        &mut self,
        grid: GridId,
        num_io_procs: usize,
        stride: usize,
        annotation: &str,
    ) -> Result<IoDecomposition<C>, RegistryError> {
        let grid_size = self.h2d_grid_size(grid, annotation)?;
        let (comp, name) = {
            let g = self.grids.get(grid)?;
            (g.comp(), io_decomp_name(g.name()))
        };
        if let Some(existing) = self.existing_io_decomp(comp, &name, annotation)? {
            return Ok(existing);
        }
        let comm = self.components.shared_comm(comp)?;
        let layout = IoLayout::new(num_io_procs, stride, comm.size());
        let io_index = layout.io_index(comm.rank());
        let cells = io_index
            .map(|k| even_block(grid_size, layout.num_io_procs, k).map(Some).collect())
            .unwrap_or_default();
        self.finish_io_decomp(&name, comp, grid, cells, layout, io_index, &*comm, annotation)
    }

    /// Rectangular lon x lat tiles, one per I/O process. The grid must be
    /// logically rectangular. Collective over the grid's component.
    pub fn register_tiled_io_decomp(
        &mut self,
        grid: GridId,
        num_io_procs: usize,
        annotation: &str,
    ) -> Result<IoDecomposition<C>, RegistryError> {
        self.h2d_grid_size(grid, annotation)?;
        let (comp, name, dims) = {
            let g = self.grids.get(grid)?;
            let dims = g.geometry()?.horizontal_data().and_then(|h| h.dims);
            (g.comp(), io_decomp_name(g.name()), dims)
        };
        let Some((lon_size, lat_size)) = dims else {
            return Err(RegistryError::Unsupported {
                feature: format!("tiled I/O decomposition of the unstructured grid \"{name}\""),
                annotation: annotation.to_string(),
            });
        };
        if let Some(existing) = self.existing_io_decomp(comp, &name, annotation)? {
            return Ok(existing);
        }
        let comm = self.components.shared_comm(comp)?;
        let size = comm.size();
        let shape = tiling_shape(lon_size, lat_size, num_io_procs.clamp(1, size));
        let tiles = shape.0 * shape.1;
        let layout = IoLayout::new(tiles, size / tiles, size);
        let io_index = layout.io_index(comm.rank());
        let cells = io_index
            .map(|t| tile_cells(lon_size, lat_size, shape, t).into_iter().map(Some).collect())
            .unwrap_or_default();
        log::debug!(
            "tiling {lon_size}x{lat_size} cells of \"{name}\" as {}x{} tiles",
            shape.0,
            shape.1
        );
        self.finish_io_decomp(&name, comp, grid, cells, layout, io_index, &*comm, annotation)
    }

    /// The I/O decomposition already registered under `name`, with a fresh
    /// split of the component. A non-I/O decomposition holding the name is
    /// a name clash.
    fn existing_io_decomp(
        &mut self,
        comp: ComponentId,
        name: &str,
        annotation: &str,
    ) -> Result<Option<IoDecomposition<C>>, RegistryError> {
        let Some(decomp) = self.decomps.by_name(comp, name) else {
            return Ok(None);
        };
        let Some(&layout) = self.decomps.io_layouts.get(&decomp) else {
            return self.check_decomp_name(comp, name, annotation).map(|()| None);
        };
        let comm = self.components.shared_comm(comp)?;
        let io_index = layout.io_index(comm.rank());
        let group = split_io_group(&*comm, io_index)?;
        log::debug!("reusing I/O decomposition \"{name}\" ({decomp})");
        Ok(Some(IoDecomposition {
            decomp,
            layout,
            io_index,
            group,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_io_decomp(
        &mut self,
        name: &str,
        comp: ComponentId,
        grid: GridId,
        cells: Vec<Option<usize>>,
        layout: IoLayout,
        io_index: Option<usize>,
        comm: &C,
        annotation: &str,
    ) -> Result<IoDecomposition<C>, RegistryError> {
        let group = split_io_group(comm, io_index)?;
        let decomp = self.push_decomp(NewDecomp {
            name,
            comp,
            grid,
            cells,
            chunks: None,
            halo_host: None,
            annotation,
        })?;
        self.decomps.io_layouts.insert(decomp, layout);
        Ok(IoDecomposition {
            decomp,
            layout,
            io_index,
            group,
        })
    }
}
