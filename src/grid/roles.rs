//! Canonical sub-grid roles and their discovery from leaf dimensions.

use crate::geometry::{CoordLabel, GeometryRef, Leaf, Shape};
use crate::registry_error::RegistryError;
use std::fmt;
use std::sync::Arc;

/// The four canonical orthogonal sub-grids.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    H2D,
    V1D,
    Time1D,
    Tracer1D,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::H2D, Role::V1D, Role::Time1D, Role::Tracer1D];

    /// Order in which sub-grids are materialised as child entities.
    pub const LINK_ORDER: [Role; 4] = [Role::Time1D, Role::V1D, Role::H2D, Role::Tracer1D];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::H2D => "H2D",
            Role::V1D => "V1D",
            Role::Time1D => "time 1-D",
            Role::Tracer1D => "tracer 1-D",
        })
    }
}

/// One present role: the sub-geometry filling it, its ordinal position among
/// the leaf dimensions and its size.
#[derive(Clone, Debug)]
pub struct RoleSlot {
    pub geometry: Option<GeometryRef>,
    pub position: usize,
    pub size: usize,
}

#[derive(Clone, Debug, Default)]
pub struct RoleSlots {
    h2d: Option<RoleSlot>,
    v1d: Option<RoleSlot>,
    time: Option<RoleSlot>,
    tracer: Option<RoleSlot>,
}

impl RoleSlots {
    pub fn get(&self, role: Role) -> Option<&RoleSlot> {
        match role {
            Role::H2D => self.h2d.as_ref(),
            Role::V1D => self.v1d.as_ref(),
            Role::Time1D => self.time.as_ref(),
            Role::Tracer1D => self.tracer.as_ref(),
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<RoleSlot> {
        match role {
            Role::H2D => &mut self.h2d,
            Role::V1D => &mut self.v1d,
            Role::Time1D => &mut self.time,
            Role::Tracer1D => &mut self.tracer,
        }
    }

    pub fn has(&self, role: Role) -> bool {
        self.get(role).is_some()
    }

    /// Ordinal position of each role in [`Role::ALL`] order.
    pub fn positions(&self) -> [Option<usize>; 4] {
        Role::ALL.map(|r| self.get(r).map(|s| s.position))
    }

    pub fn count(&self) -> usize {
        Role::ALL.iter().filter(|r| self.has(**r)).count()
    }

    pub fn geometry(&self, role: Role) -> Option<&GeometryRef> {
        self.get(role).and_then(|s| s.geometry.as_ref())
    }

    /// Drop the geometry references, keep positions and sizes.
    pub fn release(&mut self) {
        for role in Role::ALL {
            if let Some(slot) = self.slot_mut(role) {
                slot.geometry = None;
            }
        }
    }
}

fn dup(grid: &str, what: &str, annotation: &str) -> RegistryError {
    RegistryError::Composition {
        grid: grid.to_string(),
        detail: format!("more than one {what} dimension"),
        annotation: annotation.to_string(),
    }
}

/// Innermost part of `geometry` holding both horizontal labels. The
/// synthesized horizontal geometry is cached there, so every product built
/// from the same lon/lat pair shares one horizontal identity.
fn horizontal_owner(geometry: &GeometryRef) -> GeometryRef {
    if let Shape::Product(parts) = geometry.shape() {
        if let Some(part) = parts
            .iter()
            .find(|p| p.has_label(CoordLabel::Lon) && p.has_label(CoordLabel::Lat))
        {
            return horizontal_owner(part);
        }
    }
    Arc::clone(geometry)
}

/// Split `geometry` into canonical roles.
///
/// Separate longitude and latitude leaves are combined into one horizontal
/// sub-geometry; both must be present. A geometry with no recognised
/// dimension is a software error.
pub fn classify(geometry: &GeometryRef, grid: &str, annotation: &str) -> Result<RoleSlots, RegistryError> {
    let leaves = geometry.leaves();
    let mut slots = RoleSlots::default();
    let mut lon: Option<(usize, Leaf)> = None;
    let mut lat: Option<(usize, Leaf)> = None;

    for (pos, leaf) in leaves.into_iter().enumerate() {
        let (has_lon, has_lat) = (leaf.has(CoordLabel::Lon), leaf.has(CoordLabel::Lat));
        if has_lon && has_lat {
            if slots.h2d.is_some() || lon.is_some() || lat.is_some() {
                return Err(dup(grid, "horizontal", annotation));
            }
            slots.h2d = Some(RoleSlot {
                position: pos,
                size: leaf.size,
                geometry: Some(leaf.source),
            });
        } else if has_lon {
            if lon.is_some() || slots.h2d.is_some() {
                return Err(dup(grid, "longitude", annotation));
            }
            lon = Some((pos, leaf));
        } else if has_lat {
            if lat.is_some() || slots.h2d.is_some() {
                return Err(dup(grid, "latitude", annotation));
            }
            lat = Some((pos, leaf));
        } else {
            let (role, what) = if leaf.has(CoordLabel::Lev) {
                (Role::V1D, "vertical")
            } else if leaf.has(CoordLabel::Time) {
                (Role::Time1D, "time")
            } else {
                (Role::Tracer1D, "tracer")
            };
            let slot = slots.slot_mut(role);
            if slot.is_some() {
                return Err(dup(grid, what, annotation));
            }
            *slot = Some(RoleSlot {
                position: pos,
                size: leaf.size,
                geometry: Some(leaf.source),
            });
        }
    }

    match (lon, lat) {
        (None, None) => {}
        (Some((lon_pos, lon)), Some((lat_pos, lat))) => {
            let h2d = if Arc::ptr_eq(&lon.source, &lat.source) {
                lon.source
            } else {
                horizontal_owner(geometry).synthesized_horizontal(&lon.source, &lat.source)
            };
            slots.h2d = Some(RoleSlot {
                position: lon_pos.min(lat_pos),
                size: lon.size * lat.size,
                geometry: Some(h2d),
            });
        }
        _ => {
            return Err(RegistryError::DimensionLabels {
                grid: grid.to_string(),
                detail: "longitude and latitude dimensions must both be present".into(),
                annotation: annotation.to_string(),
            });
        }
    }

    if slots.count() == 0 {
        return Err(RegistryError::NoRecognisedDimension {
            grid: grid.to_string(),
        });
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CoordUnit, Geometry, VerticalCoord};

    fn lon() -> GeometryRef {
        Geometry::angular_axis("lon", CoordLabel::Lon, CoordUnit::Degrees, vec![0.0, 90.0, 180.0, 270.0])
    }
    fn lat() -> GeometryRef {
        Geometry::angular_axis("lat", CoordLabel::Lat, CoordUnit::Degrees, vec![-45.0, 0.0, 45.0])
    }
    fn lev() -> GeometryRef {
        Geometry::vertical(
            "lev",
            VerticalCoord::Levels {
                unit: "m".into(),
                values: vec![0.0, 10.0],
            },
        )
    }

    #[test]
    fn lon_lat_lev_time() {
        let time = Geometry::axis("time", CoordLabel::Time, 12);
        let g = Geometry::product("g", vec![lev(), lon(), lat(), time]);
        let slots = classify(&g, "g", "test").unwrap();
        assert_eq!(slots.positions(), [Some(1), Some(0), Some(3), None]);
        assert_eq!(slots.get(Role::H2D).unwrap().size, 12);
        assert_eq!(slots.count(), 3);
        // synthesized once
        let again = classify(&g, "g", "test").unwrap();
        assert_eq!(
            slots.geometry(Role::H2D).unwrap().key(),
            again.geometry(Role::H2D).unwrap().key()
        );
    }

    #[test]
    fn nested_products_share_the_horizontal() {
        let h2d = Geometry::product("h2d", vec![lon(), lat()]);
        let flat = classify(&h2d, "h2d", "t").unwrap();
        let nested = Geometry::product("g3d", vec![h2d, lev()]);
        let slots = classify(&nested, "g3d", "t").unwrap();
        assert_eq!(
            flat.geometry(Role::H2D).unwrap().key(),
            slots.geometry(Role::H2D).unwrap().key()
        );
    }

    #[test]
    fn lone_longitude_is_rejected() {
        let g = Geometry::product("g", vec![lon(), lev()]);
        assert!(matches!(
            classify(&g, "g", "t"),
            Err(RegistryError::DimensionLabels { .. })
        ));
    }

    #[test]
    fn two_vertical_dimensions() {
        let g = Geometry::product("g", vec![lev(), lev()]);
        assert!(matches!(classify(&g, "g", "t"), Err(RegistryError::Composition { .. })));
    }

    #[test]
    fn release_keeps_positions() {
        let g = Geometry::product("g", vec![lon(), lat()]);
        let mut slots = classify(&g, "g", "t").unwrap();
        slots.release();
        assert!(slots.geometry(Role::H2D).is_none());
        assert_eq!(slots.positions()[0], Some(0));
    }
}
