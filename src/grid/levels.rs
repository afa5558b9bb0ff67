//! Level staggering and the fields attached to 3-D grids.

use crate::algs::communicator::Communicator;
use crate::geometry::Geometry;
use crate::grid::entity::{AttachedField, BottomVariation, LevelVariation};
use crate::grid::register::GridOptions;
use crate::grid::roles::Role;
use crate::grid::validation::{Site, check_mask};
use crate::handle::{FieldId, GridId};
use crate::registry::Registry;
use crate::registry_error::RegistryError;

fn attachment(grid: &str, detail: &str, annotation: &str) -> RegistryError {
    RegistryError::FieldAttachment {
        grid: grid.to_string(),
        detail: detail.to_string(),
        annotation: annotation.to_string(),
    }
}

impl<C: Communicator> Registry<C> {
    /// Register the mid-point grids of an interface-level 3-D grid.
    ///
    /// Returns `(mid-point 3-D grid, mid-point 1-D grid)`. The vertical
    /// coordinates are the averages of adjacent interface levels; the
    /// horizontal part and the dimension order are those of `id`.
    pub fn register_mid_point_grid(
        &mut self,
        id: GridId,
        mask: Option<&[i32]>,
        annotation: &str,
    ) -> Result<(GridId, GridId), RegistryError> {
        let grid = self.grids.get(id)?;
        let name = grid.name().to_string();
        let comp = grid.comp();
        let mid_err = |detail: &str| RegistryError::MidPoint {
            grid: name.clone(),
            detail: detail.to_string(),
            annotation: annotation.to_string(),
        };
        if !grid.is_v3d() {
            return Err(RegistryError::NotThreeDimensional {
                grid: name.clone(),
                annotation: annotation.to_string(),
            });
        }
        if grid.is_mid_point_grid() {
            return Err(mid_err("the grid is itself a mid-point grid"));
        }
        if let Some(existing) = grid.mid_point_grid() {
            let existing = self.grids.get(existing)?.name().to_string();
            return Err(mid_err(&format!("the mid-point grid \"{existing}\" is already registered")));
        }
        let levels = grid.vertical_coord().map_or(0, |v| v.len());
        if levels < 2 {
            return Err(mid_err(&format!("{levels} interface level(s); at least 2 are needed")));
        }
        let h2d_geometry = grid
            .roles()
            .geometry(Role::H2D)
            .cloned()
            .ok_or_else(|| RegistryError::GeometryReleased { grid: name.clone() })?;
        let v1d_after_h2d = self.is_v1d_after_h2d(id)?;
        let interface_v1d = self
            .v1d_sub_grid(id)?
            .ok_or_else(|| RegistryError::Internal(format!("3-D grid \"{name}\" has no vertical sub-grid")))?;

        let mid_size = h2d_geometry.size() * (levels - 1);
        if let Some(mask) = mask {
            let site = Site::new(&name, annotation);
            if mask.len() != mid_size {
                return Err(site.array_size("mask", mid_size, mask.len()));
            }
            check_mask(mask, site)?;
        }

        let mid_v1d = match self.grids.get(interface_v1d)?.mid_point_grid() {
            Some(existing) => existing,
            None => {
                let v1d = self.grids.get(interface_v1d)?;
                let coord = v1d
                    .vertical_coord()
                    .ok_or_else(|| RegistryError::Internal(format!("vertical grid \"{}\" has no levels", v1d.name())))?
                    .mid_points();
                let mid_name = format!("mid_grid_for_{}", v1d.name());
                let mid = self.register_grid(
                    comp,
                    &mid_name,
                    Geometry::vertical(&mid_name, coord),
                    GridOptions::default(),
                    annotation,
                )?;
                self.grids.get_mut(mid)?.interface_level = Some(interface_v1d);
                self.grids.get_mut(interface_v1d)?.mid_point = Some(mid);
                mid
            }
        };
        let mid_v1d_geometry = self.grids.get(mid_v1d)?.geometry()?.clone();

        let mid_name = format!("mid_grid_for_{name}");
        let parts = if v1d_after_h2d {
            vec![h2d_geometry, mid_v1d_geometry]
        } else {
            vec![mid_v1d_geometry, h2d_geometry]
        };
        let mid_3d = self.register_grid(
            comp,
            &mid_name,
            Geometry::product(&mid_name, parts),
            GridOptions::default(),
            annotation,
        )?;

        let bottom = self.grids.get(id)?.bottom_field().cloned();
        let sums = self.ensure_checksums(id)?;
        {
            let mid = self.grids.get_mut(mid_3d)?;
            mid.interface_level = Some(id);
            mid.cell_mask = mask.map(<[i32]>::to_vec);
            if mid.bottom_field.is_none() {
                mid.bottom_field = bottom;
            }
        }
        self.grids.get_mut(id)?.mid_point = Some(mid_3d);
        if let Some(sums) = sums {
            let mid = self.grids.get(mid_3d)?;
            if mid.checksums().is_none() {
                mid.commit_checksums(sums)?;
            }
        }
        log::debug!("grid \"{name}\": mid-point grid \"{mid_name}\" registered as {mid_3d}");
        Ok((mid_3d, mid_v1d))
    }

    /// Attach the surface field of a sigma or hybrid 3-D grid.
    ///
    /// Except for externally supplied surfaces, `field` must be given and
    /// must lie on the grid's horizontal sub-grid. The attachment is
    /// write-once and propagates to the mid-point and interface-level grids.
    pub fn set_bottom_field(
        &mut self,
        id: GridId,
        field: Option<FieldId>,
        field_grid: Option<GridId>,
        variation: BottomVariation,
        annotation: &str,
    ) -> Result<(), RegistryError> {
        match self.check_bottom_field(id, field, field_grid, variation, annotation) {
            Ok(()) => {}
            Err(e) => return self.report(e),
        }
        let attached = AttachedField {
            field: if variation == BottomVariation::External { None } else { field },
            variation,
            annotation: annotation.to_string(),
        };
        self.attach_bottom(id, attached)
    }

    fn check_bottom_field(
        &self,
        id: GridId,
        field: Option<FieldId>,
        field_grid: Option<GridId>,
        variation: BottomVariation,
        annotation: &str,
    ) -> Result<(), RegistryError> {
        let grid = self.grids.get(id)?;
        let name = grid.name();
        if !grid.is_v3d() {
            return Err(RegistryError::NotThreeDimensional {
                grid: name.to_string(),
                annotation: annotation.to_string(),
            });
        }
        if !grid.is_sigma() {
            return Err(attachment(name, "only sigma and hybrid grids have a surface field", annotation));
        }
        if grid.used_in_md() {
            return Err(attachment(
                name,
                "the grid is already part of a multi-dimensional grid",
                annotation,
            ));
        }
        if let Some(previous) = grid.bottom_field() {
            return Err(RegistryError::FieldAlreadySet {
                grid: name.to_string(),
                what: "surface field",
                previous: previous.annotation.clone(),
                annotation: annotation.to_string(),
            });
        }
        if variation == BottomVariation::External {
            return Ok(());
        }
        let (Some(_), Some(field_grid)) = (field, field_grid) else {
            return Err(attachment(name, "a static or dynamic surface needs its field", annotation));
        };
        if self.h2d_sub_grid(id)? != Some(field_grid) {
            let on = self.grids.get(field_grid)?.name();
            return Err(attachment(
                name,
                &format!("the surface field lies on \"{on}\", not on the horizontal sub-grid"),
                annotation,
            ));
        }
        Ok(())
    }

    fn attach_bottom(&mut self, id: GridId, attached: AttachedField<BottomVariation>) -> Result<(), RegistryError> {
        let grid = self.grids.get_mut(id)?;
        grid.bottom_field = Some(attached.clone());
        let linked = [grid.mid_point, grid.interface_level];
        for other in linked.into_iter().flatten() {
            let other = self.grids.get_mut(other)?;
            if other.bottom_field.is_none() {
                other.bottom_field = Some(attached.clone());
            }
        }
        Ok(())
    }

    /// Attach the per-cell level values of a non-sigma 3-D grid.
    pub fn set_level_field(
        &mut self,
        id: GridId,
        field: FieldId,
        field_grid: GridId,
        variation: LevelVariation,
        annotation: &str,
    ) -> Result<(), RegistryError> {
        let grid = self.grids.get(id)?;
        let name = grid.name();
        let check = if !grid.is_v3d() {
            Err(RegistryError::NotThreeDimensional {
                grid: name.to_string(),
                annotation: annotation.to_string(),
            })
        } else if grid.is_sigma() {
            Err(attachment(name, "sigma and hybrid grids derive their levels from the surface", annotation))
        } else if let Some(previous) = grid.level_field() {
            Err(RegistryError::FieldAlreadySet {
                grid: name.to_string(),
                what: "3-D level field",
                previous: previous.annotation.clone(),
                annotation: annotation.to_string(),
            })
        } else if field_grid != id {
            Err(attachment(name, "the level field must lie on the grid itself", annotation))
        } else {
            Ok(())
        };
        if let Err(e) = check {
            return self.report(e);
        }
        self.grids.get_mut(id)?.level_field = Some(AttachedField {
            field: Some(field),
            variation,
            annotation: annotation.to_string(),
        });
        Ok(())
    }

    /// Copy the surface field of `from` onto `id`; both grids must be
    /// [similar](Self::is_similar_grid_with).
    pub fn inherit_bottom_field(&mut self, id: GridId, from: GridId, annotation: &str) -> Result<(), RegistryError> {
        let similar = self.is_similar_grid_with(id, from)?;
        let source = match self.inheritable(similar, id, from, annotation)? {
            Some(()) => self.grids.get(from)?.bottom_field().cloned(),
            None => return Ok(()),
        };
        let name = self.grids.get(id)?.name().to_string();
        let check = match (&source, self.grids.get(id)?.bottom_field()) {
            (None, _) => Err(attachment(&name, "the source grid has no surface field", annotation)),
            (Some(_), Some(previous)) => Err(RegistryError::FieldAlreadySet {
                grid: name.clone(),
                what: "surface field",
                previous: previous.annotation.clone(),
                annotation: annotation.to_string(),
            }),
            (Some(_), None) => Ok(()),
        };
        if let Err(e) = check {
            return self.report(e);
        }
        match source {
            Some(attached) => self.attach_bottom(id, attached),
            None => Ok(()),
        }
    }

    /// Copy the 3-D level field of `from` onto `id`; both grids must describe
    /// the same structure.
    pub fn inherit_level_field(&mut self, id: GridId, from: GridId, annotation: &str) -> Result<(), RegistryError> {
        let same = self.is_the_same_as_another_grid(id, from)?;
        if self.inheritable(same, id, from, annotation)?.is_none() {
            return Ok(());
        }
        let source = self.grids.get(from)?.level_field().cloned();
        let target = self.grids.get(id)?;
        let check = match (&source, target.level_field()) {
            (None, _) => Err(attachment(target.name(), "the source grid has no 3-D level field", annotation)),
            (Some(_), Some(previous)) => Err(RegistryError::FieldAlreadySet {
                grid: target.name().to_string(),
                what: "3-D level field",
                previous: previous.annotation.clone(),
                annotation: annotation.to_string(),
            }),
            (Some(_), None) => Ok(()),
        };
        if let Err(e) = check {
            return self.report(e);
        }
        self.grids.get_mut(id)?.level_field = source;
        Ok(())
    }

    /// `Some(())` when `id` may inherit from `from`; `None` when the mismatch
    /// was recorded in tolerant mode.
    fn inheritable(
        &mut self,
        matching: bool,
        id: GridId,
        from: GridId,
        annotation: &str,
    ) -> Result<Option<()>, RegistryError> {
        if matching {
            return Ok(Some(()));
        }
        let (to_name, from_name) = (self.grid_name(id)?.to_string(), self.grid_name(from)?.to_string());
        self.report(attachment(
            &to_name,
            &format!("cannot inherit from \"{from_name}\", which has a different structure"),
            annotation,
        ))?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use crate::algs::communicator::NoComm;
    use crate::config::RegistryConfig;
    use crate::geometry::{CoordLabel, CoordUnit, Geometry, GeometryRef, VerticalCoord};
    use crate::grid::entity::{BottomVariation, LevelVariation};
    use crate::grid::register::GridOptions;
    use crate::handle::{FieldId, GridId};
    use crate::registry::Registry;
    use crate::registry_error::RegistryError;

    fn horizontal() -> Vec<GeometryRef> {
        vec![
            Geometry::angular_axis("lon", CoordLabel::Lon, CoordUnit::Degrees, vec![0.0, 120.0, 240.0]),
            Geometry::angular_axis("lat", CoordLabel::Lat, CoordUnit::Degrees, vec![-20.0, 20.0]),
        ]
    }

    fn sigma() -> VerticalCoord {
        VerticalCoord::Sigma {
            top: 10.0,
            sigma: vec![0.0, 0.25, 0.5, 1.0],
        }
    }

    fn grid_3d(reg: &mut Registry<NoComm>, name: &str, coord: VerticalCoord) -> GridId {
        let comp = reg.component_by_name("root@atm").unwrap();
        let mut parts = horizontal();
        parts.push(Geometry::vertical(format!("{name}_lev"), coord));
        reg.register_grid(comp, name, Geometry::product(name, parts), GridOptions::default(), "a")
            .unwrap()
    }

    fn registry() -> Registry<NoComm> {
        let mut reg = Registry::new(RegistryConfig::default());
        reg.add_component("root@atm", None, NoComm);
        reg
    }

    #[test]
    fn mid_point_grid_links_both_ways() {
        let mut reg = registry();
        let g = grid_3d(&mut reg, "atm3d", sigma());
        let h2d = reg.h2d_sub_grid(g).unwrap().unwrap();
        reg.set_bottom_field(g, Some(FieldId(7)), Some(h2d), BottomVariation::Dynamic, "b")
            .unwrap();

        let (mid, mid_lev) = reg.register_mid_point_grid(g, None, "m").unwrap();
        let grid = reg.grid(mid).unwrap();
        assert_eq!(grid.name(), "mid_grid_for_atm3d");
        assert_eq!(grid.size(), 18);
        assert_eq!(grid.interface_level_grid(), Some(g));
        assert!(grid.is_mid_point_grid());
        assert_eq!(reg.grid(g).unwrap().mid_point_grid(), Some(mid));
        assert_eq!(reg.grid(mid_lev).unwrap().name(), "mid_grid_for_atm3d_lev");
        assert_eq!(
            reg.grid(mid).unwrap().bottom_field().and_then(|b| b.field),
            Some(FieldId(7))
        );
        // same horizontal sub-grid as the interface grid
        assert_eq!(reg.h2d_sub_grid(mid).unwrap(), Some(h2d));
        assert_eq!(reg.grid(mid).unwrap().checksums(), reg.grid(g).unwrap().checksums());
        assert!(reg.is_v1d_after_h2d(mid).unwrap());

        assert!(matches!(
            reg.register_mid_point_grid(g, None, "m"),
            Err(RegistryError::MidPoint { .. })
        ));
        assert!(matches!(
            reg.register_mid_point_grid(mid, None, "m"),
            Err(RegistryError::MidPoint { .. })
        ));
    }

    #[test]
    fn mid_point_mask_and_dimension_checks() {
        let mut reg = registry();
        let g = grid_3d(&mut reg, "atm3d", sigma());
        assert!(matches!(
            reg.register_mid_point_grid(g, Some(&[1; 5]), "m"),
            Err(RegistryError::ArraySize { .. })
        ));
        let mut mask = vec![1; 18];
        mask[3] = 0;
        let (mid, _) = reg.register_mid_point_grid(g, Some(&mask), "m").unwrap();
        assert_eq!(reg.grid(mid).unwrap().mask(), Some(&mask[..]));

        let h2d = reg.h2d_sub_grid(g).unwrap().unwrap();
        assert!(matches!(
            reg.register_mid_point_grid(h2d, None, "m"),
            Err(RegistryError::NotThreeDimensional { .. })
        ));
        let one_level = grid_3d(
            &mut reg,
            "thin",
            VerticalCoord::Levels {
                unit: "m".into(),
                values: vec![10.0],
            },
        );
        assert!(matches!(
            reg.register_mid_point_grid(one_level, None, "m"),
            Err(RegistryError::MidPoint { .. })
        ));
    }

    #[test]
    fn bottom_field_rules() {
        let mut reg = registry();
        let g = grid_3d(&mut reg, "atm3d", sigma());
        let h2d = reg.h2d_sub_grid(g).unwrap().unwrap();
        assert!(matches!(
            reg.set_bottom_field(g, Some(FieldId(1)), Some(g), BottomVariation::Static, "b"),
            Err(RegistryError::FieldAttachment { .. })
        ));
        assert!(matches!(
            reg.set_bottom_field(g, None, None, BottomVariation::Static, "b"),
            Err(RegistryError::FieldAttachment { .. })
        ));
        reg.set_bottom_field(g, None, None, BottomVariation::External, "b").unwrap();
        assert!(matches!(
            reg.set_bottom_field(g, Some(FieldId(1)), Some(h2d), BottomVariation::Static, "c"),
            Err(RegistryError::FieldAlreadySet { .. })
        ));

        let levels = grid_3d(
            &mut reg,
            "z3d",
            VerticalCoord::Levels {
                unit: "m".into(),
                values: vec![0.0, 10.0, 30.0],
            },
        );
        let h = reg.h2d_sub_grid(levels).unwrap().unwrap();
        assert!(matches!(
            reg.set_bottom_field(levels, Some(FieldId(2)), Some(h), BottomVariation::Static, "b"),
            Err(RegistryError::FieldAttachment { .. })
        ));
    }

    #[test]
    fn level_field_and_inheritance() {
        let mut reg = registry();
        let z = || VerticalCoord::Levels {
            unit: "m".into(),
            values: vec![0.0, 10.0, 30.0],
        };
        let a = grid_3d(&mut reg, "a3d", z());
        let b = grid_3d(&mut reg, "b3d", z());
        assert!(matches!(
            reg.set_level_field(a, FieldId(3), b, LevelVariation::Static, "l"),
            Err(RegistryError::FieldAttachment { .. })
        ));
        reg.set_level_field(a, FieldId(3), a, LevelVariation::Dynamic, "l").unwrap();
        assert!(matches!(
            reg.set_level_field(a, FieldId(4), a, LevelVariation::Static, "l"),
            Err(RegistryError::FieldAlreadySet { .. })
        ));
        reg.inherit_level_field(b, a, "i").unwrap();
        assert_eq!(reg.grid(b).unwrap().level_field().and_then(|f| f.field), Some(FieldId(3)));

        let s = grid_3d(&mut reg, "s3d", sigma());
        assert!(matches!(
            reg.inherit_level_field(s, a, "i"),
            Err(RegistryError::FieldAttachment { .. })
        ));
    }

    #[test]
    fn bottom_field_is_inherited_between_similar_grids() {
        let mut reg = registry();
        let a = grid_3d(&mut reg, "a3d", sigma());
        let b = grid_3d(&mut reg, "b3d", sigma());
        let h2d = reg.h2d_sub_grid(a).unwrap().unwrap();
        assert!(!reg.is_the_same_as_another_grid(a, b).unwrap());
        reg.set_bottom_field(a, Some(FieldId(5)), Some(h2d), BottomVariation::Static, "b")
            .unwrap();
        let (mid_b, _) = reg.register_mid_point_grid(b, None, "m").unwrap();

        reg.inherit_bottom_field(b, a, "i").unwrap();
        let inherited = reg.grid(b).unwrap().bottom_field().cloned().unwrap();
        assert_eq!(inherited.field, Some(FieldId(5)));
        assert_eq!(inherited.variation, BottomVariation::Static);
        assert_eq!(
            reg.grid(mid_b).unwrap().bottom_field().and_then(|f| f.field),
            Some(FieldId(5))
        );
        assert!(matches!(
            reg.inherit_bottom_field(b, a, "i"),
            Err(RegistryError::FieldAlreadySet { .. })
        ));

        let other = grid_3d(
            &mut reg,
            "c3d",
            VerticalCoord::Sigma {
                top: 50.0,
                sigma: vec![0.0, 0.25, 0.5, 1.0],
            },
        );
        assert!(matches!(
            reg.inherit_bottom_field(other, a, "i"),
            Err(RegistryError::FieldAttachment { .. })
        ));
    }

    #[test]
    fn used_in_md_blocks_bottom_field() {
        let mut reg = registry();
        let g = grid_3d(&mut reg, "atm3d", sigma());
        reg.grids.get_mut(g).unwrap().used_in_md = true;
        assert!(matches!(
            reg.set_bottom_field(g, None, None, BottomVariation::External, "b"),
            Err(RegistryError::FieldAttachment { .. })
        ));

        let mut tolerant = Registry::<NoComm>::new(RegistryConfig {
            tolerant: true,
            ..Default::default()
        });
        tolerant.add_component("root@atm", None, NoComm);
        let g = grid_3d(&mut tolerant, "atm3d", sigma());
        tolerant.grids.get_mut(g).unwrap().used_in_md = true;
        tolerant
            .set_bottom_field(g, None, None, BottomVariation::External, "b")
            .unwrap();
        assert!(tolerant.grid(g).unwrap().bottom_field().is_none());
        assert_eq!(tolerant.diagnostics().len(), 1);
    }
}
