//! Local, non-collective grid lookups.

use crate::algs::communicator::Communicator;
use crate::component::ComponentId;
use crate::grid::entity::Grid;
use crate::grid::roles::Role;
use crate::handle::GridId;
use crate::registry::Registry;
use crate::registry_error::RegistryError;

impl<C: Communicator> Registry<C> {
    pub fn grid(&self, id: GridId) -> Result<&Grid, RegistryError> {
        self.grids.get(id)
    }

    pub fn grid_id(&self, comp: ComponentId, name: &str) -> Option<GridId> {
        self.grids.by_name(comp, name)
    }

    /// Decode and range-check an opaque grid handle.
    pub fn grid_id_from_raw(&self, raw: u64) -> Result<GridId, RegistryError> {
        GridId::from_raw(raw)
            .filter(|id| self.grids.contains(*id))
            .ok_or(RegistryError::InvalidGridId { raw })
    }

    pub fn is_grid_id_legal(&self, raw: u64) -> bool {
        self.grid_id_from_raw(raw).is_ok()
    }

    pub fn grid_name(&self, id: GridId) -> Result<&str, RegistryError> {
        self.grids.get(id).map(|g| g.name())
    }

    pub fn grid_size(&self, id: GridId) -> Result<usize, RegistryError> {
        self.grids.get(id).map(|g| g.size())
    }

    pub fn grid_comp(&self, id: GridId) -> Result<ComponentId, RegistryError> {
        self.grids.get(id).map(|g| g.comp())
    }

    /// The horizontal part of `id`: the grid itself, one of its sub-grids, or
    /// the horizontal part of its interface-level grid.
    pub fn h2d_sub_grid(&self, id: GridId) -> Result<Option<GridId>, RegistryError> {
        self.sub_grid_with(id, Grid::is_h2d)
    }

    pub fn v1d_sub_grid(&self, id: GridId) -> Result<Option<GridId>, RegistryError> {
        self.sub_grid_with(id, Grid::is_v1d)
    }

    fn sub_grid_with(&self, id: GridId, pred: fn(&Grid) -> bool) -> Result<Option<GridId>, RegistryError> {
        let grid = self.grids.get(id)?;
        if pred(grid) {
            return Ok(Some(id));
        }
        for &sub in grid.sub_grids() {
            if pred(self.grids.get(sub)?) {
                return Ok(Some(sub));
            }
        }
        match grid.interface_level_grid() {
            Some(interface) => self.sub_grid_with(interface, pred),
            None => Ok(None),
        }
    }

    /// Cells per horizontal cell: the grid size divided by its H2D size.
    pub fn total_size_beyond_h2d(&self, id: GridId) -> Result<usize, RegistryError> {
        let grid = self.grids.get(id)?;
        match self.h2d_sub_grid(id)? {
            Some(h2d) => {
                let h2d_size = self.grids.get(h2d)?.size();
                Ok(if h2d_size == 0 { 0 } else { grid.size() / h2d_size })
            }
            None => Ok(grid.size()),
        }
    }

    /// Does the vertical dimension come after the horizontal ones?
    pub fn is_v1d_after_h2d(&self, id: GridId) -> Result<bool, RegistryError> {
        let roles = self.grids.get(id)?.roles();
        Ok(match (roles.get(Role::H2D), roles.get(Role::V1D)) {
            (Some(h), Some(v)) => v.position > h.position,
            _ => false,
        })
    }

    /// Drop the geometry of every grid owned by a component other than
    /// `comp` that has no process group here. Metadata, checksums and
    /// handles stay valid. Returns the number of grids released.
    pub fn release_foreign_geometries(&mut self, comp: ComponentId) -> usize {
        let foreign: Vec<ComponentId> = self
            .grids
            .iter()
            .map(|g| g.comp())
            .filter(|&c| c != comp && self.components.get(c).is_ok_and(|c| !c.is_local()))
            .collect();
        let mut released = 0;
        for grid in self.grids.iter_mut() {
            if grid.geometry.is_some() && foreign.contains(&grid.comp) {
                grid.geometry = None;
                grid.roles.release();
                released += 1;
            }
        }
        log::debug!("released {released} foreign grid geometries");
        released
    }
}

#[cfg(test)]
mod tests {
    use crate::algs::communicator::NoComm;
    use crate::config::RegistryConfig;
    use crate::geometry::{CoordLabel, CoordUnit, Geometry, VerticalCoord};
    use crate::grid::register::GridOptions;
    use crate::registry::Registry;
    use crate::registry_error::RegistryError;

    #[test]
    fn queries_on_a_3d_grid() {
        let mut reg = Registry::<NoComm>::new(RegistryConfig::default());
        let comp = reg.add_component("root@ocn", None, NoComm);
        let lon = Geometry::angular_axis("lon", CoordLabel::Lon, CoordUnit::Degrees, vec![0.0, 120.0, 240.0]);
        let lat = Geometry::angular_axis("lat", CoordLabel::Lat, CoordUnit::Degrees, vec![-10.0, 10.0]);
        let lev = Geometry::vertical(
            "depth",
            VerticalCoord::Levels {
                unit: "m".into(),
                values: vec![5.0, 15.0, 30.0, 60.0],
            },
        );
        let g = Geometry::product("ocn3d", vec![lev, lon, lat]);
        let id = reg.register_grid(comp, "ocn3d", g, GridOptions::default(), "a").unwrap();

        assert_eq!(reg.grid_id(comp, "ocn3d"), Some(id));
        assert_eq!(reg.grid_size(id).unwrap(), 24);
        assert_eq!(reg.total_size_beyond_h2d(id).unwrap(), 4);
        assert!(!reg.is_v1d_after_h2d(id).unwrap());
        let h2d = reg.h2d_sub_grid(id).unwrap().unwrap();
        assert_eq!(reg.grid_size(h2d).unwrap(), 6);
        assert!(reg.v1d_sub_grid(id).unwrap().is_some());

        assert_eq!(reg.grid_id_from_raw(id.raw()).unwrap(), id);
        assert!(matches!(
            reg.grid_id_from_raw(id.raw() + 100),
            Err(RegistryError::InvalidGridId { .. })
        ));
        assert!(!reg.is_grid_id_legal(0x2000_0000));
    }

    #[test]
    fn releasing_foreign_geometry_keeps_metadata() {
        let mut reg = Registry::<NoComm>::new(RegistryConfig::default());
        let local = reg.add_component("root@atm", None, NoComm);
        let remote = reg.add_foreign_component("root@ocn", None);
        let t = reg.register_time_grid(remote, "t", 3, "a").unwrap();
        let mine = reg.register_time_grid(local, "t", 3, "a").unwrap();
        assert_eq!(reg.release_foreign_geometries(local), 1);
        assert!(matches!(
            reg.grid(t).unwrap().geometry(),
            Err(RegistryError::GeometryReleased { .. })
        ));
        assert_eq!(reg.grid_size(t).unwrap(), 3);
        assert!(reg.grid(mine).unwrap().geometry().is_ok());
        assert_eq!(reg.release_foreign_geometries(local), 0);
    }
}
