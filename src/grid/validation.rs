//! Checks applied to horizontal and vertical coordinate input.
//!
//! Everything here is pure. Functions returning `Result` report failures that
//! leave nothing sensible to build; [`resolve_bounds`] instead collects
//! range violations so that tolerant registries can record them and carry on.

use crate::geometry::{Bounds, CoordUnit, EdgeType, NULL_COORD_VALUE, VerticalCoord};
use crate::registry_error::RegistryError;

/// Relative slack on angular limits.
pub const EPS: f64 = 1.000_000_1;

/// Grid name and registration-site annotation carried into every error.
#[derive(Copy, Clone, Debug)]
pub struct Site<'a> {
    pub grid: &'a str,
    pub annotation: &'a str,
}

impl<'a> Site<'a> {
    pub fn new(grid: &'a str, annotation: &'a str) -> Self {
        Site { grid, annotation }
    }

    fn out_of_range(&self, what: &str, value: f64, min: f64, max: f64) -> RegistryError {
        RegistryError::ValueOutOfRange {
            grid: self.grid.to_string(),
            what: what.to_string(),
            value,
            min,
            max,
            annotation: self.annotation.to_string(),
        }
    }

    pub(crate) fn array_size(&self, array: &'static str, expected: usize, actual: usize) -> RegistryError {
        RegistryError::ArraySize {
            grid: self.grid.to_string(),
            array,
            expected,
            actual,
            annotation: self.annotation.to_string(),
        }
    }
}

/// Parse the edge type and the coordinate unit and check that they fit together.
pub fn edge_and_unit(edge: &str, unit: &str, cyclic: bool, site: Site<'_>) -> Result<(EdgeType, CoordUnit), RegistryError> {
    let edge_err = |detail: &str| RegistryError::EdgeType {
        edge: edge.to_string(),
        detail: detail.to_string(),
        annotation: site.annotation.to_string(),
    };
    let edge_type = EdgeType::parse(edge)
        .ok_or_else(|| edge_err("must be one of LON_LAT, GREAT_ARC, XY and TriPolar"))?;
    let parsed = CoordUnit::parse(unit);
    if edge_type == EdgeType::Xy {
        if cyclic {
            return Err(edge_err("an XY grid must be acyclic"));
        }
        if parsed.is_some() {
            return Err(edge_err("an XY grid cannot use degrees or radians"));
        }
        return Err(RegistryError::Unsupported {
            feature: format!("H2D grid \"{}\" with edge type XY", site.grid),
            annotation: site.annotation.to_string(),
        });
    }
    let unit = parsed.ok_or_else(|| RegistryError::UnsupportedUnit {
        unit: unit.to_string(),
        annotation: site.annotation.to_string(),
    })?;
    Ok((edge_type, unit))
}

/// Every mask value must be 0 or 1.
pub fn check_mask(mask: &[i32], site: Site<'_>) -> Result<(), RegistryError> {
    match mask.iter().find(|&&m| m != 0 && m != 1) {
        Some(&value) => Err(RegistryError::InvalidMask {
            grid: site.grid.to_string(),
            value,
            annotation: site.annotation.to_string(),
        }),
        None => Ok(()),
    }
}

/// Number of vertices per cell implied by the array lengths.
pub fn vertices_per_cell(num_vertex_values: usize, num_centers: usize, site: Site<'_>) -> Result<usize, RegistryError> {
    let err = |detail: String| RegistryError::VertexCount {
        grid: site.grid.to_string(),
        detail,
        annotation: site.annotation.to_string(),
    };
    if num_vertex_values == 0 {
        return Ok(0);
    }
    if num_centers == 0 || num_vertex_values % num_centers != 0 {
        return Err(err(format!(
            "{num_vertex_values} vertex values are not a multiple of {num_centers} cell centers"
        )));
    }
    let per_cell = num_vertex_values / num_centers;
    if per_cell < 2 {
        return Err(err("a cell needs at least 2 vertices".into()));
    }
    Ok(per_cell)
}

/// Explicit bounds come in pairs: both or neither of min/max per axis.
pub fn check_bound_pairs(given: &Bounds, site: Site<'_>) -> Result<(), RegistryError> {
    let set = |v: f64| v != NULL_COORD_VALUE;
    for (axis, lo, hi) in [
        ("longitude", given.min_lon, given.max_lon),
        ("latitude", given.min_lat, given.max_lat),
    ] {
        if set(lo) != set(hi) {
            return Err(RegistryError::DimensionLabels {
                grid: site.grid.to_string(),
                detail: format!("the minimum and maximum {axis} bounds must be given together"),
                annotation: site.annotation.to_string(),
            });
        }
    }
    Ok(())
}

/// Coordinates to check against resolved bounds. The vertex slices may be empty.
#[derive(Copy, Clone, Debug)]
pub struct CoordArrays<'a> {
    pub center_lon: &'a [f64],
    pub center_lat: &'a [f64],
    pub vertex_lon: &'a [f64],
    pub vertex_lat: &'a [f64],
}

fn first_outside(values: &[f64], lo: f64, hi: f64) -> Option<f64> {
    let inside = |v: f64| {
        if lo <= hi {
            v >= lo && v <= hi
        } else {
            v >= lo || v <= hi
        }
    };
    values
        .iter()
        .copied()
        .find(|&v| v != NULL_COORD_VALUE && !inside(v))
}

/// Final bounds of an H2D grid plus every range violation found on the way.
///
/// `given` holds the caller's bounds (unset values are [`NULL_COORD_VALUE`]),
/// `real` the extent of all centers and vertices of the grid. Latitude bounds
/// other than exactly a pole collapse to the real extent; a cyclic grid ends
/// with longitude bounds of one full period starting at 0.
pub fn resolve_bounds(
    unit: CoordUnit,
    cyclic: bool,
    given: Bounds,
    real: Bounds,
    coords: CoordArrays<'_>,
    site: Site<'_>,
) -> (Bounds, Vec<RegistryError>) {
    let period = unit.period();
    let pole = unit.pole();
    let mut errs = Vec::new();
    let mut b = given;

    if given.min_lat != NULL_COORD_VALUE {
        if b.max_lat <= b.min_lat {
            errs.push(site.out_of_range("max_lat", b.max_lat, b.min_lat, pole));
        }
        for (what, values) in [("center_lat", coords.center_lat), ("vertex_lat", coords.vertex_lat)] {
            if let Some(v) = first_outside(values, b.min_lat, b.max_lat) {
                errs.push(site.out_of_range(what, v, b.min_lat, b.max_lat));
            }
        }
    } else {
        b.min_lat = real.min_lat;
        b.max_lat = real.max_lat;
    }
    if b.min_lat != -pole {
        b.min_lat = real.min_lat;
    }
    if b.max_lat != pole {
        b.max_lat = real.max_lat;
    }
    for (what, v) in [("min_lat", b.min_lat), ("max_lat", b.max_lat)] {
        if v != NULL_COORD_VALUE && (v < -pole * EPS || v > pole * EPS) {
            errs.push(site.out_of_range(what, v, -pole, pole));
        }
    }

    let lon_given = given.min_lon != NULL_COORD_VALUE;
    if lon_given {
        for (what, v) in [("min_lon", b.min_lon), ("max_lon", b.max_lon)] {
            if v < -period * EPS || v > period * EPS {
                errs.push(site.out_of_range(what, v, -period, period));
            }
        }
        let span = (b.max_lon - b.min_lon).abs();
        if span > period * EPS {
            errs.push(site.out_of_range("max_lon - min_lon", span, 0.0, period));
        }
    }
    if (b.min_lat == -pole || b.max_lat == pole) && !cyclic {
        errs.push(RegistryError::PoleNotCyclic {
            grid: site.grid.to_string(),
            annotation: site.annotation.to_string(),
        });
    }
    if cyclic {
        b.min_lon = -period;
        b.max_lon = period;
    } else if !lon_given {
        b.min_lon = real.min_lon;
        b.max_lon = real.max_lon;
    }
    for (what, values) in [("center_lon", coords.center_lon), ("vertex_lon", coords.vertex_lon)] {
        if let Some(v) = first_outside(values, b.min_lon, b.max_lon) {
            errs.push(site.out_of_range(what, v, b.min_lon, b.max_lon));
        }
    }

    if cyclic {
        b.min_lon = 0.0;
        b.max_lon = period;
    } else if b.min_lon < b.max_lon {
        b.min_lon = real.min_lon;
        b.max_lon = real.max_lon;
    }
    (b, errs)
}

/// Extent over centers and vertices, ignoring unset values.
pub fn real_extent(coords: CoordArrays<'_>) -> Bounds {
    fn fold(a: &[f64], b: &[f64]) -> (f64, f64) {
        a.iter()
            .chain(b)
            .copied()
            .filter(|v| *v != NULL_COORD_VALUE)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
    }
    let (min_lon, max_lon) = fold(coords.center_lon, coords.vertex_lon);
    let (min_lat, max_lat) = fold(coords.center_lat, coords.vertex_lat);
    finish_extent([min_lon, max_lon, min_lat, max_lat])
}

/// Turn `[min_lon, max_lon, min_lat, max_lat]` folds into bounds; an empty
/// fold (infinite values) means unset.
pub fn finish_extent(raw: [f64; 4]) -> Bounds {
    let fix = |v: f64| if v.is_finite() { v } else { NULL_COORD_VALUE };
    Bounds {
        min_lon: fix(raw[0]),
        max_lon: fix(raw[1]),
        min_lat: fix(raw[2]),
        max_lat: fix(raw[3]),
    }
}

/// Level values must be strictly monotonic, sigma values within [0, 1] and
/// hybrid coefficient arrays of equal length.
pub fn check_vertical(coord: &VerticalCoord, site: Site<'_>) -> Result<(), RegistryError> {
    let err = |detail: String| RegistryError::VerticalCoord {
        grid: site.grid.to_string(),
        detail,
        annotation: site.annotation.to_string(),
    };
    if coord.is_empty() {
        return Err(err("a vertical grid needs at least one level".into()));
    }
    match coord {
        VerticalCoord::Levels { unit, values } => {
            if unit.trim().is_empty() {
                return Err(err("level values need a unit".into()));
            }
            let up = values.windows(2).all(|w| w[0] < w[1]);
            let down = values.windows(2).all(|w| w[0] > w[1]);
            if !(up || down) {
                return Err(err("level values are not strictly monotonic".into()));
            }
        }
        VerticalCoord::Sigma { sigma, .. } => {
            if let Some(v) = sigma.iter().find(|v| !(0.0..=1.0).contains(*v)) {
                return Err(err(format!("sigma value {v} is outside [0, 1]")));
            }
        }
        VerticalCoord::Hybrid { coef_a, coef_b, .. } => {
            if coef_a.len() != coef_b.len() {
                return Err(err(format!(
                    "coefficient arrays have {} and {} entries",
                    coef_a.len(),
                    coef_b.len()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: Site<'static> = Site {
        grid: "ocn",
        annotation: "ocn_init",
    };

    fn arrays<'a>(lon: &'a [f64], lat: &'a [f64]) -> CoordArrays<'a> {
        CoordArrays {
            center_lon: lon,
            center_lat: lat,
            vertex_lon: &[],
            vertex_lat: &[],
        }
    }

    #[test]
    fn edge_type_rules() {
        assert!(edge_and_unit("LON_LAT", "degrees", true, SITE).is_ok());
        assert!(matches!(
            edge_and_unit("HEX", "degrees", true, SITE),
            Err(RegistryError::EdgeType { .. })
        ));
        assert!(matches!(
            edge_and_unit("GREAT_ARC", "meters", false, SITE),
            Err(RegistryError::UnsupportedUnit { .. })
        ));
        assert!(matches!(
            edge_and_unit("XY", "degrees", false, SITE),
            Err(RegistryError::EdgeType { .. })
        ));
        assert!(matches!(
            edge_and_unit("XY", "m", false, SITE),
            Err(RegistryError::Unsupported { .. })
        ));
    }

    #[test]
    fn masks_and_vertices() {
        assert!(check_mask(&[0, 1, 1], SITE).is_ok());
        assert!(matches!(check_mask(&[0, 2], SITE), Err(RegistryError::InvalidMask { value: 2, .. })));
        assert_eq!(vertices_per_cell(0, 5, SITE).unwrap(), 0);
        assert_eq!(vertices_per_cell(20, 5, SITE).unwrap(), 4);
        assert_eq!(vertices_per_cell(10, 5, SITE).unwrap(), 2);
        assert!(vertices_per_cell(7, 5, SITE).is_err());
        assert!(vertices_per_cell(5, 5, SITE).is_err());
    }

    #[test]
    fn cyclic_grid_gets_full_period() {
        let lon = [0.0, 90.0, 180.0, 270.0];
        let lat = [-60.0, 0.0, 60.0];
        let real = real_extent(arrays(&lon, &lat));
        let (b, errs) = resolve_bounds(CoordUnit::Degrees, true, Bounds::unset(), real, arrays(&lon, &lat), SITE);
        assert!(errs.is_empty());
        assert_eq!((b.min_lon, b.max_lon), (0.0, 360.0));
        assert_eq!((b.min_lat, b.max_lat), (-60.0, 60.0));
    }

    #[test]
    fn pole_requires_cyclic() {
        let lon = [0.0, 180.0];
        let lat = [-45.0, 45.0];
        let given = Bounds {
            min_lon: 0.0,
            max_lon: 360.0,
            min_lat: -90.0,
            max_lat: 90.0,
        };
        let real = real_extent(arrays(&lon, &lat));
        let (b, errs) = resolve_bounds(CoordUnit::Degrees, false, given, real, arrays(&lon, &lat), SITE);
        assert_eq!(b.min_lat, -90.0);
        assert!(errs.iter().any(|e| matches!(e, RegistryError::PoleNotCyclic { .. })));
        let (_, errs) = resolve_bounds(CoordUnit::Degrees, true, given, real, arrays(&lon, &lat), SITE);
        assert!(errs.is_empty());
    }

    #[test]
    fn latitude_outside_given_bounds() {
        let lon = [10.0, 20.0];
        let lat = [-10.0, 50.0];
        let given = Bounds {
            min_lon: NULL_COORD_VALUE,
            max_lon: NULL_COORD_VALUE,
            min_lat: -20.0,
            max_lat: 40.0,
        };
        let real = real_extent(arrays(&lon, &lat));
        let (b, errs) = resolve_bounds(CoordUnit::Degrees, false, given, real, arrays(&lon, &lat), SITE);
        assert_eq!(errs.len(), 1);
        assert!(matches!(&errs[0], RegistryError::ValueOutOfRange { what, .. } if what == "center_lat"));
        // not a pole: collapses to the real extent
        assert_eq!((b.min_lat, b.max_lat), (-10.0, 50.0));
        assert_eq!((b.min_lon, b.max_lon), (10.0, 20.0));
    }

    #[test]
    fn radians_limits() {
        let lon = [0.0, 7.0];
        let lat = [0.0, 0.5];
        let given = Bounds {
            min_lon: 0.0,
            max_lon: 7.0,
            min_lat: NULL_COORD_VALUE,
            max_lat: NULL_COORD_VALUE,
        };
        let real = real_extent(arrays(&lon, &lat));
        let (_, errs) = resolve_bounds(CoordUnit::Radians, false, given, real, arrays(&lon, &lat), SITE);
        assert!(errs.iter().any(|e| matches!(e, RegistryError::ValueOutOfRange { what, .. } if what == "max_lon")));
    }

    #[test]
    fn bound_pairs() {
        let mut b = Bounds::unset();
        assert!(check_bound_pairs(&b, SITE).is_ok());
        b.min_lat = -10.0;
        assert!(check_bound_pairs(&b, SITE).is_err());
    }

    #[test]
    fn vertical_rules() {
        let ok = VerticalCoord::Levels {
            unit: "Pa".into(),
            values: vec![1000.0, 850.0, 500.0],
        };
        assert!(check_vertical(&ok, SITE).is_ok());
        let bad = VerticalCoord::Levels {
            unit: "Pa".into(),
            values: vec![1000.0, 1000.0],
        };
        assert!(check_vertical(&bad, SITE).is_err());
        let sigma = VerticalCoord::Sigma {
            top: 0.0,
            sigma: vec![0.0, 1.2],
        };
        assert!(check_vertical(&sigma, SITE).is_err());
        let hybrid = VerticalCoord::Hybrid {
            top: 0.0,
            coef_a: vec![0.1],
            coef_b: vec![0.1, 0.2],
        };
        assert!(check_vertical(&hybrid, SITE).is_err());
    }
}
