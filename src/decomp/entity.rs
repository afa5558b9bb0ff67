//! The `Decomposition` entity.

use crate::component::ComponentId;
use crate::handle::{DecompId, GridId};
use crate::registry_error::RegistryError;

/// Caller-facing marker for a local slot that holds no cell.
pub const CELL_INDEX_NULL: i64 = -999_999;

/// Contiguous chunks over the local cell array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunks {
    starts: Vec<usize>,
    sizes: Vec<usize>,
    chunk_of_cell: Vec<usize>,
}

impl Chunks {
    /// Chunks of the given sizes, which must add up to `local_count`.
    pub fn from_sizes(sizes: &[usize], local_count: usize, decomp: &str, annotation: &str) -> Result<Self, RegistryError> {
        let sum: usize = sizes.iter().sum();
        if sum != local_count {
            return Err(RegistryError::ChunkSizes {
                decomp: decomp.to_string(),
                sum,
                local: local_count,
                annotation: annotation.to_string(),
            });
        }
        let mut starts = Vec::with_capacity(sizes.len());
        let mut chunk_of_cell = Vec::with_capacity(local_count);
        let mut next = 0;
        for (chunk, &size) in sizes.iter().enumerate() {
            starts.push(next);
            chunk_of_cell.extend(std::iter::repeat_n(chunk, size));
            next += size;
        }
        Ok(Chunks {
            starts,
            sizes: sizes.to_vec(),
            chunk_of_cell,
        })
    }

    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Chunk holding local slot `slot`.
    pub fn chunk_of(&self, slot: usize) -> Option<usize> {
        self.chunk_of_cell.get(slot).copied()
    }
}

/// How the cells of one H2D grid are spread over the processes of a
/// component, seen from this process.
#[derive(Clone, Debug)]
pub struct Decomposition {
    pub(crate) id: DecompId,
    pub(crate) name: String,
    pub(crate) comp: ComponentId,
    pub(crate) grid: GridId,
    pub(crate) grid_size: usize,
    /// 0-based global cell per local slot; `None` marks an empty slot.
    pub(crate) cells: Vec<Option<usize>>,
    pub(crate) chunks: Option<Chunks>,
    pub(crate) halo_host: Option<DecompId>,
    pub(crate) annotation: String,
}

impl Decomposition {
    pub fn id(&self) -> DecompId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Component whose processes hold the cells.
    pub fn comp(&self) -> ComponentId {
        self.comp
    }

    pub fn grid(&self) -> GridId {
        self.grid
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn annotation(&self) -> &str {
        &self.annotation
    }

    pub fn num_local_cells(&self) -> usize {
        self.cells.len()
    }

    /// Local slots that hold a cell.
    pub fn num_owned_cells(&self) -> usize {
        self.cells.iter().flatten().count()
    }

    pub fn cells(&self) -> &[Option<usize>] {
        &self.cells
    }

    /// 0-based global cell of local slot `slot`.
    pub fn global_index(&self, slot: usize) -> Option<usize> {
        self.cells.get(slot).copied().flatten()
    }

    /// Local cells as 1-based global indices with [`CELL_INDEX_NULL`] for
    /// empty slots.
    pub fn global_indexes_one_based(&self) -> Vec<i64> {
        self.cells
            .iter()
            .map(|c| c.map_or(CELL_INDEX_NULL, |g| g as i64 + 1))
            .collect()
    }

    pub fn chunks(&self) -> Option<&Chunks> {
        self.chunks.as_ref()
    }

    /// The decomposition this halo extends.
    pub fn halo_host(&self) -> Option<DecompId> {
        self.halo_host
    }

    pub fn is_halo(&self) -> bool {
        self.halo_host.is_some()
    }
}
