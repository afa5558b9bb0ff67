//! Append-only decomposition catalogue.

use crate::component::ComponentId;
use crate::debug_invariants::DebugInvariants;
use crate::decomp::entity::Decomposition;
use crate::decomp::io::IoLayout;
use crate::handle::DecompId;
use crate::registry_error::RegistryError;
use hashbrown::HashMap;

#[derive(Debug, Default)]
pub struct DecompCatalogue {
    decomps: Vec<Decomposition>,
    by_name: HashMap<(ComponentId, String), DecompId>,
    pub(crate) full_of: HashMap<DecompId, DecompId>,
    pub(crate) empty_of: HashMap<DecompId, DecompId>,
    /// Which processes hold cells of each I/O decomposition.
    pub(crate) io_layouts: HashMap<DecompId, IoLayout>,
}

impl DecompCatalogue {
    pub(crate) fn next_id(&self) -> Result<DecompId, RegistryError> {
        DecompId::from_index(self.decomps.len())
    }

    pub(crate) fn push(&mut self, decomp: Decomposition) -> Result<DecompId, RegistryError> {
        let id = decomp.id;
        let expected = self.next_id()?;
        if id != expected {
            return Err(RegistryError::Internal(format!(
                "decomposition \"{}\" built with id {id:?}, expected {expected:?}",
                decomp.name
            )));
        }
        self.by_name.insert((decomp.comp, decomp.name.clone()), id);
        self.decomps.push(decomp);
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        Ok(id)
    }

    pub fn get(&self, id: DecompId) -> Result<&Decomposition, RegistryError> {
        self.decomps
            .get(id.index())
            .ok_or(RegistryError::InvalidDecompId { raw: id.raw() })
    }

    pub fn by_name(&self, comp: ComponentId, name: &str) -> Option<DecompId> {
        self.by_name.get(&(comp, name.to_string())).copied()
    }

    pub fn contains(&self, id: DecompId) -> bool {
        id.index() < self.decomps.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Decomposition> + '_ {
        self.decomps.iter()
    }

    pub fn len(&self) -> usize {
        self.decomps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decomps.is_empty()
    }
}

impl DebugInvariants for DecompCatalogue {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DecompCatalogue invalid");
    }

    fn validate_invariants(&self) -> Result<(), RegistryError> {
        for (i, d) in self.decomps.iter().enumerate() {
            if d.id.index() != i {
                return Err(RegistryError::Internal(format!(
                    "decomposition \"{}\" at position {i} carries id {}",
                    d.name, d.id
                )));
            }
            if let Some(&cell) = d.cells.iter().flatten().find(|&&c| c >= d.grid_size) {
                return Err(RegistryError::Internal(format!(
                    "decomposition \"{}\" holds cell {cell} of a {}-cell grid",
                    d.name, d.grid_size
                )));
            }
            if let Some(chunks) = &d.chunks {
                let covered: usize = chunks.sizes().iter().sum();
                if covered != d.cells.len() {
                    return Err(RegistryError::Internal(format!(
                        "decomposition \"{}\": chunks cover {covered} of {} slots",
                        d.name,
                        d.cells.len()
                    )));
                }
            }
            // a halo is registered after its host
            if let Some(host) = d.halo_host {
                if host.index() >= i {
                    return Err(RegistryError::Internal(format!(
                        "halo \"{}\" names a later host {host}",
                        d.name
                    )));
                }
            }
        }
        for derived in self
            .full_of
            .values()
            .chain(self.empty_of.values())
            .chain(self.io_layouts.keys())
        {
            self.get(*derived)?;
        }
        Ok(())
    }
}
