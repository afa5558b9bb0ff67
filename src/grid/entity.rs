//! The `Grid` entity.

use crate::algs::checksum::H2dChecksums;
use crate::component::ComponentId;
use crate::geometry::{GeometryKey, GeometryRef, VerticalCoord};
use crate::grid::roles::{Role, RoleSlots};
use crate::handle::{DecompId, FieldId, GridId};
use crate::registry_error::RegistryError;
use once_cell::sync::OnceCell;

/// How the surface field of a sigma/hybrid 3-D grid changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BottomVariation {
    Static,
    Dynamic,
    /// Supplied from outside the component; no field is attached.
    External,
}

/// How the per-cell level values of a 3-D grid change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LevelVariation {
    Static,
    Dynamic,
}

/// A field attached to a grid, together with where it was attached.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachedField<V> {
    pub field: Option<FieldId>,
    pub variation: V,
    pub annotation: String,
}

/// One registered grid of one component.
///
/// Fields after construction are late-bound and write-once (checksums, field
/// attachments, mid-point links) or grow monotonically (`sub_grids`).
#[derive(Debug)]
pub struct Grid {
    pub(crate) id: GridId,
    pub(crate) name: String,
    pub(crate) comp: ComponentId,
    pub(crate) comp_full_name: String,
    pub(crate) annotation: String,
    pub(crate) geometry: Option<GeometryRef>,
    pub(crate) geometry_key: GeometryKey,
    pub(crate) size: usize,
    pub(crate) num_dimensions: usize,
    pub(crate) roles: RoleSlots,
    pub(crate) vertical: Option<VerticalCoord>,
    pub(crate) sub_grids: Vec<GridId>,
    pub(crate) checksums: OnceCell<H2dChecksums>,
    pub(crate) bottom_field: Option<AttachedField<BottomVariation>>,
    pub(crate) level_field: Option<AttachedField<LevelVariation>>,
    pub(crate) mid_point: Option<GridId>,
    pub(crate) interface_level: Option<GridId>,
    pub(crate) ensemble_member: Option<GridId>,
    pub(crate) shared_decomp: Option<DecompId>,
    pub(crate) used_in_md: bool,
    pub(crate) cell_mask: Option<Vec<i32>>,
}

impl Grid {
    pub(crate) fn new(
        id: GridId,
        name: &str,
        comp: ComponentId,
        comp_full_name: &str,
        annotation: &str,
        geometry: GeometryRef,
        roles: RoleSlots,
    ) -> Self {
        let vertical = roles
            .geometry(Role::V1D)
            .and_then(|g| g.vertical_coord())
            .cloned();
        Grid {
            id,
            name: name.to_string(),
            comp,
            comp_full_name: comp_full_name.to_string(),
            annotation: annotation.to_string(),
            geometry_key: geometry.key(),
            size: geometry.size(),
            num_dimensions: geometry.num_dimensions(),
            geometry: Some(geometry),
            roles,
            vertical,
            sub_grids: Vec::new(),
            checksums: OnceCell::new(),
            bottom_field: None,
            level_field: None,
            mid_point: None,
            interface_level: None,
            ensemble_member: None,
            shared_decomp: None,
            used_in_md: false,
            cell_mask: None,
        }
    }

    pub fn id(&self) -> GridId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comp(&self) -> ComponentId {
        self.comp
    }

    pub fn comp_full_name(&self) -> &str {
        &self.comp_full_name
    }

    /// Provenance string of the registration call.
    pub fn annotation(&self) -> &str {
        &self.annotation
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    pub fn geometry_key(&self) -> GeometryKey {
        self.geometry_key
    }

    /// The geometry, unless it was released.
    pub fn geometry(&self) -> Result<&GeometryRef, RegistryError> {
        self.geometry
            .as_ref()
            .ok_or_else(|| RegistryError::GeometryReleased {
                grid: self.name.clone(),
            })
    }

    pub fn roles(&self) -> &RoleSlots {
        &self.roles
    }

    pub fn sub_grids(&self) -> &[GridId] {
        &self.sub_grids
    }

    pub fn checksums(&self) -> Option<H2dChecksums> {
        self.checksums.get().copied()
    }

    /// Commit the checksums; a second commit is a software error.
    pub(crate) fn commit_checksums(&self, sums: H2dChecksums) -> Result<(), RegistryError> {
        self.checksums
            .set(sums)
            .map_err(|_| RegistryError::ChecksumCommitted {
                grid: self.name.clone(),
                which: "horizontal",
            })?;
        log::debug!(
            "grid \"{}\" of \"{}\": checksums {:#x}/{:#x}/{:#x}",
            self.name,
            self.comp_full_name,
            sums.mask,
            sums.center_lon,
            sums.center_lat
        );
        Ok(())
    }

    pub fn vertical_coord(&self) -> Option<&VerticalCoord> {
        self.vertical.as_ref()
    }

    pub fn bottom_field(&self) -> Option<&AttachedField<BottomVariation>> {
        self.bottom_field.as_ref()
    }

    pub fn level_field(&self) -> Option<&AttachedField<LevelVariation>> {
        self.level_field.as_ref()
    }

    pub fn mid_point_grid(&self) -> Option<GridId> {
        self.mid_point
    }

    pub fn interface_level_grid(&self) -> Option<GridId> {
        self.interface_level
    }

    /// The member grid a set-level grid was promoted from.
    pub fn ensemble_member(&self) -> Option<GridId> {
        self.ensemble_member
    }

    pub fn shared_decomp(&self) -> Option<DecompId> {
        self.shared_decomp
    }

    pub fn used_in_md(&self) -> bool {
        self.used_in_md
    }

    /// Per-cell mask given at registration, for grids that carry their own.
    pub fn mask(&self) -> Option<&[i32]> {
        self.cell_mask.as_deref()
    }

    fn only(&self, role: Role) -> bool {
        self.roles.count() == 1 && self.roles.has(role)
    }

    pub fn is_h2d(&self) -> bool {
        self.only(Role::H2D)
    }

    pub fn is_v1d(&self) -> bool {
        self.only(Role::V1D)
    }

    pub fn is_time_1d(&self) -> bool {
        self.only(Role::Time1D)
    }

    pub fn is_tracer_1d(&self) -> bool {
        self.only(Role::Tracer1D)
    }

    /// Horizontal plus vertical and nothing else.
    pub fn is_v3d(&self) -> bool {
        self.roles.count() == 2 && self.roles.has(Role::H2D) && self.roles.has(Role::V1D)
    }

    pub fn is_sigma(&self) -> bool {
        self.vertical.as_ref().is_some_and(|v| v.is_sigma_or_hybrid())
    }

    pub fn is_mid_point_grid(&self) -> bool {
        self.interface_level.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CoordLabel, CoordUnit, Geometry};
    use crate::grid::roles::classify;

    fn grid_of(g: GeometryRef) -> Grid {
        let roles = classify(&g, "g", "t").unwrap();
        Grid::new(GridId::from_index(0).unwrap(), "g", ComponentId::from_index(0), "root", "t", g, roles)
    }

    #[test]
    fn predicates() {
        let lon = Geometry::angular_axis("lon", CoordLabel::Lon, CoordUnit::Degrees, vec![0.0, 180.0]);
        let lat = Geometry::angular_axis("lat", CoordLabel::Lat, CoordUnit::Degrees, vec![0.0]);
        let sigma = Geometry::vertical(
            "s",
            VerticalCoord::Sigma {
                top: 100.0,
                sigma: vec![0.0, 0.5, 1.0],
            },
        );
        let h2d = grid_of(Geometry::product("h", vec![lon.clone(), lat.clone()]));
        assert!(h2d.is_h2d());
        assert!(!h2d.is_v3d());
        let v3d = grid_of(Geometry::product("v", vec![lon, lat, sigma]));
        assert!(v3d.is_v3d());
        assert!(v3d.is_sigma());
        assert_eq!(v3d.size(), 6);
        assert_eq!(v3d.num_dimensions(), 3);
    }

    #[test]
    fn checksum_commit_is_write_once() {
        let g = grid_of(Geometry::axis("t", CoordLabel::Time, 4));
        let sums = H2dChecksums {
            mask: 1,
            center_lon: 2,
            center_lat: 3,
        };
        g.commit_checksums(sums).unwrap();
        assert_eq!(g.checksums(), Some(sums));
        assert!(matches!(
            g.commit_checksums(sums),
            Err(RegistryError::ChecksumCommitted { .. })
        ));
    }
}
