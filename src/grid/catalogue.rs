//! Append-only grid catalogue with lookup by name and by geometry identity.

use crate::component::ComponentId;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::GeometryKey;
use crate::grid::entity::Grid;
use crate::grid::roles::Role;
use crate::handle::GridId;
use crate::registry_error::RegistryError;
use hashbrown::HashMap;

#[derive(Debug, Default)]
pub struct GridCatalogue {
    grids: Vec<Grid>,
    by_name: HashMap<(ComponentId, String), GridId>,
    by_geometry: HashMap<(ComponentId, GeometryKey), GridId>,
}

impl GridCatalogue {
    pub(crate) fn next_id(&self) -> Result<GridId, RegistryError> {
        GridId::from_index(self.grids.len())
    }

    /// Append `grid`, whose id must be [`next_id`](Self::next_id).
    pub(crate) fn push(&mut self, grid: Grid) -> Result<GridId, RegistryError> {
        let id = grid.id;
        let expected = self.next_id()?;
        if id != expected {
            return Err(RegistryError::Internal(format!(
                "grid \"{}\" built with id {id:?}, expected {expected:?}",
                grid.name
            )));
        }
        self.by_name.insert((grid.comp, grid.name.clone()), id);
        self.by_geometry.entry((grid.comp, grid.geometry_key)).or_insert(id);
        // a single-role grid also answers for its role's sub-geometry
        if grid.roles.count() == 1 {
            for role in Role::ALL {
                if let Some(sub) = grid.roles.geometry(role) {
                    self.by_geometry.entry((grid.comp, sub.key())).or_insert(id);
                }
            }
        }
        self.grids.push(grid);
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        Ok(id)
    }

    pub fn get(&self, id: GridId) -> Result<&Grid, RegistryError> {
        self.grids.get(id.index()).ok_or(RegistryError::InvalidGridId { raw: id.raw() })
    }

    pub(crate) fn get_mut(&mut self, id: GridId) -> Result<&mut Grid, RegistryError> {
        self.grids
            .get_mut(id.index())
            .ok_or(RegistryError::InvalidGridId { raw: id.raw() })
    }

    pub fn by_name(&self, comp: ComponentId, name: &str) -> Option<GridId> {
        self.by_name.get(&(comp, name.to_string())).copied()
    }

    pub fn by_geometry(&self, comp: ComponentId, key: GeometryKey) -> Option<GridId> {
        self.by_geometry.get(&(comp, key)).copied()
    }

    pub fn contains(&self, id: GridId) -> bool {
        id.index() < self.grids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Grid> + '_ {
        self.grids.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Grid> + '_ {
        self.grids.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }
}

impl DebugInvariants for GridCatalogue {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "GridCatalogue invalid");
    }

    fn validate_invariants(&self) -> Result<(), RegistryError> {
        // 1) ids are catalogue positions
        for (i, g) in self.grids.iter().enumerate() {
            if g.id.index() != i {
                return Err(RegistryError::Internal(format!(
                    "grid \"{}\" at position {i} carries id {}",
                    g.name, g.id
                )));
            }
        }
        // 2) name index points back at the named grid
        for ((comp, name), id) in &self.by_name {
            let g = self.get(*id)?;
            if g.comp != *comp || g.name != *name {
                return Err(RegistryError::Internal(format!("name index \"{name}\" points at \"{}\"", g.name)));
            }
        }
        // 3) links stay inside the catalogue and sub-grids inside the component
        for g in &self.grids {
            for &sub in &g.sub_grids {
                if self.get(sub)?.comp != g.comp {
                    return Err(RegistryError::Internal(format!(
                        "sub-grid {sub} of \"{}\" belongs to another component",
                        g.name
                    )));
                }
            }
            for link in [g.mid_point, g.interface_level, g.ensemble_member].into_iter().flatten() {
                self.get(link)?;
            }
        }
        Ok(())
    }
}
