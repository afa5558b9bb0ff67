//! Grid registration from geometry, checksum commits and the 1-D and
//! multi-dimensional registration paths.

use crate::algs::checksum::{H2dChecksums, h2d_checksums, local_contributions};
use crate::algs::communicator::Communicator;
use crate::component::ComponentId;
use crate::geometry::{CoordLabel, Geometry, GeometryRef, VerticalCoord};
use crate::grid::entity::Grid;
use crate::grid::roles::{Role, classify};
use crate::grid::validation::{Site, check_mask, check_vertical};
use crate::handle::GridId;
use crate::registry::Registry;
use crate::registry_error::RegistryError;
use std::sync::Arc;

/// Flags for [`Registry::register_grid`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GridOptions {
    /// Register every present role as its own sub-grid entity.
    pub recurse: bool,
    /// Compute and commit the horizontal checksums now.
    pub checksums: bool,
}

impl Default for GridOptions {
    fn default() -> Self {
        GridOptions {
            recurse: true,
            checksums: false,
        }
    }
}

impl<C: Communicator> Registry<C> {
    /// Register `geometry` as grid `name` of `comp`.
    ///
    /// Registering the same geometry object again for the same component
    /// returns the existing handle. A different geometry under a name already
    /// in use is rejected.
    pub fn register_grid(
        &mut self,
        comp: ComponentId,
        name: &str,
        geometry: GeometryRef,
        opts: GridOptions,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        let comp_full_name = self.components.full_name(comp)?.to_string();
        if let Some(existing) = self.grids.by_geometry(comp, geometry.key()) {
            if opts.checksums {
                self.ensure_checksums(existing)?;
            }
            return Ok(existing);
        }
        if let Some(existing) = self.grids.by_name(comp, name) {
            let previous = self.grids.get(existing)?.annotation().to_string();
            return Err(RegistryError::DuplicateGridName {
                comp: comp_full_name,
                name: name.to_string(),
                previous,
                annotation: annotation.to_string(),
            });
        }
        if geometry.num_dimensions() == 1
            && (geometry.axis_label() == Some(CoordLabel::Lon) || geometry.axis_label() == Some(CoordLabel::Lat))
        {
            return Err(RegistryError::DimensionLabels {
                grid: name.to_string(),
                detail: "a 1-D grid must carry a level, time or tracer label".into(),
                annotation: annotation.to_string(),
            });
        }

        let roles = classify(&geometry, name, annotation)?;
        if roles.count() > 1 && !opts.recurse {
            return Err(RegistryError::Internal(format!(
                "grid \"{name}\" has {} roles and must be registered with its sub-grids",
                roles.count()
            )));
        }
        let sub_geometries: Vec<GeometryRef> = if roles.count() > 1 {
            Role::LINK_ORDER
                .iter()
                .filter_map(|r| roles.geometry(*r).cloned())
                .collect()
        } else {
            Vec::new()
        };

        let grid = Grid::new(self.grids.next_id()?, name, comp, &comp_full_name, annotation, geometry, roles);
        let id = self.grids.push(grid)?;
        log::debug!("registered grid \"{name}\" of \"{comp_full_name}\" as {id} ({annotation})");

        for sub in sub_geometries {
            let sub_id = self.search_or_add_sub_grid(comp, name, sub, annotation)?;
            self.grids.get_mut(id)?.sub_grids.push(sub_id);
        }
        if self.grids.get(id)?.roles().count() > 1 && self.grids.get(id)?.sub_grids().is_empty() {
            return Err(RegistryError::Internal(format!("grid \"{name}\" has no sub-grids")));
        }
        if opts.checksums {
            self.ensure_checksums(id)?;
        }
        Ok(id)
    }

    fn search_or_add_sub_grid(
        &mut self,
        comp: ComponentId,
        parent: &str,
        sub: GeometryRef,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        if let Some(id) = self.grids.by_geometry(comp, sub.key()) {
            return Ok(id);
        }
        let name = if self.grids.by_name(comp, sub.name()).is_some() {
            format!("{}@{parent}", sub.name())
        } else {
            sub.name().to_string()
        };
        let opts = GridOptions {
            recurse: true,
            checksums: false,
        };
        self.register_grid(comp, &name, sub, opts, annotation)
    }

    /// Compute the horizontal checksums of `id` if they are not committed yet.
    ///
    /// Replicated coordinate data is summed locally. Distributed data makes
    /// this collective over the owning component. Grids without a horizontal
    /// part have no checksums.
    pub fn ensure_checksums(&mut self, id: GridId) -> Result<Option<H2dChecksums>, RegistryError> {
        let grid = self.grids.get(id)?;
        if let Some(sums) = grid.checksums() {
            return Ok(Some(sums));
        }
        let Some(h2d) = self.h2d_sub_grid(id)? else {
            return Ok(None);
        };
        if h2d != id {
            let sums = self.ensure_checksums(h2d)?;
            if let Some(sums) = sums {
                self.grids.get(id)?.commit_checksums(sums)?;
            }
            return Ok(sums);
        }

        let grid = self.grids.get(id)?;
        let h2d_geometry = grid
            .roles()
            .geometry(Role::H2D)
            .cloned()
            .ok_or_else(|| RegistryError::GeometryReleased {
                grid: grid.name().to_string(),
            })?;
        let Some(data) = h2d_geometry.horizontal_data() else {
            return Err(RegistryError::Internal(format!(
                "horizontal sub-geometry of \"{}\" has no coordinate data",
                grid.name()
            )));
        };
        let sums = if data.cells.is_replicated() {
            let [mask, center_lon, center_lat] = local_contributions(&data.cells, 0, 1);
            H2dChecksums {
                mask,
                center_lon,
                center_lat,
            }
        } else {
            let comm = self.components.shared_comm(grid.comp())?;
            h2d_checksums(&*comm, &data.cells)?
        };
        self.grids.get(id)?.commit_checksums(sums)?;
        Ok(Some(sums))
    }

    /// Register a vertical 1-D grid.
    pub fn register_v1d_grid(
        &mut self,
        comp: ComponentId,
        name: &str,
        coord: VerticalCoord,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        check_vertical(&coord, Site::new(name, annotation))?;
        self.register_grid(comp, name, Geometry::vertical(name, coord), GridOptions::default(), annotation)
    }

    pub fn register_time_grid(
        &mut self,
        comp: ComponentId,
        name: &str,
        size: usize,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        self.register_axis_grid(comp, name, CoordLabel::Time, size, annotation)
    }

    pub fn register_tracer_grid(
        &mut self,
        comp: ComponentId,
        name: &str,
        size: usize,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        self.register_axis_grid(comp, name, CoordLabel::Tracer, size, annotation)
    }

    fn register_axis_grid(
        &mut self,
        comp: ComponentId,
        name: &str,
        label: CoordLabel,
        size: usize,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        if size == 0 {
            return Err(Site::new(name, annotation).array_size("size", 1, 0));
        }
        self.register_grid(comp, name, Geometry::axis(name, label, size), GridOptions::default(), annotation)
    }

    /// Compose two or three registered grids of `comp` into one grid.
    ///
    /// A part may itself span several roles (a 3-D grid), but each role may
    /// be filled by at most one part. The parts are marked as used by a
    /// multi-dimensional grid, and the first surface field found among them
    /// is carried over. A mask is checked and then rejected: masked
    /// multi-dimensional grids are not supported.
    pub fn register_md_grid_via_multi_grids(
        &mut self,
        comp: ComponentId,
        name: &str,
        sub_grids: &[GridId],
        mask: Option<&[i32]>,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        let site = Site::new(name, annotation);
        let composition = |detail: String| RegistryError::Composition {
            grid: name.to_string(),
            detail,
            annotation: annotation.to_string(),
        };
        if !(2..=3).contains(&sub_grids.len()) {
            return Err(composition(format!(
                "{} grids given, 2 or 3 are required",
                sub_grids.len()
            )));
        }
        let mut seen: Vec<Role> = Vec::with_capacity(Role::ALL.len());
        let mut parts = Vec::with_capacity(sub_grids.len());
        let mut bottom = None;
        for &sub in sub_grids {
            let grid = self.grids.get(sub)?;
            if grid.comp() != comp {
                return Err(composition(format!(
                    "grid \"{}\" belongs to component \"{}\"",
                    grid.name(),
                    grid.comp_full_name()
                )));
            }
            if grid.roles().count() > 1 && grid.sub_grids().is_empty() {
                return Err(RegistryError::Internal(format!(
                    "grid \"{}\" has {} roles but no sub-grids",
                    grid.name(),
                    grid.roles().count()
                )));
            }
            for role in Role::ALL.into_iter().filter(|r| grid.roles().has(*r)) {
                if seen.contains(&role) {
                    return Err(composition(format!("more than one {role} grid")));
                }
                seen.push(role);
            }
            if bottom.is_none() {
                bottom = grid.bottom_field().cloned();
            }
            parts.push(Arc::clone(grid.geometry()?));
        }
        let geometry = Geometry::product(name, parts);

        if let Some(mask) = mask {
            if mask.len() != geometry.size() {
                return Err(site.array_size("mask", geometry.size(), mask.len()));
            }
            check_mask(mask, site)?;
            if seen.contains(&Role::Time1D) || seen.contains(&Role::Tracer1D) {
                return Err(composition("a mask cannot span a time or tracer dimension".into()));
            }
            return Err(RegistryError::Unsupported {
                feature: format!("a mask on multi-dimensional grid \"{name}\""),
                annotation: annotation.to_string(),
            });
        }

        let id = self.register_grid(comp, name, geometry, GridOptions::default(), annotation)?;
        for &sub in sub_grids {
            self.grids.get_mut(sub)?.used_in_md = true;
        }
        if let Some(bottom) = bottom {
            let md = self.grids.get_mut(id)?;
            if md.bottom_field.is_none() {
                md.bottom_field = Some(bottom);
            }
        }
        let h2d_sums = match self.h2d_sub_grid(id)? {
            Some(h2d) if h2d != id => self.grids.get(h2d)?.checksums(),
            _ => None,
        };
        if let Some(sums) = h2d_sums {
            if self.grids.get(id)?.checksums().is_none() {
                self.grids.get(id)?.commit_checksums(sums)?;
            }
        }
        Ok(id)
    }
}
