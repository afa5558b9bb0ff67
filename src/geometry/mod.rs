//! In-memory grid geometry.
//!
//! A [`Geometry`] is an immutable, reference-counted description of a grid:
//! a single axis, a horizontal surface, or an outer product of other
//! geometries. The registry never copies geometry; it compares geometries by
//! object identity ([`GeometryKey`]) and splits them into leaf dimensions
//! to find the canonical sub-grid roles.
//!
//! Logically rectangular horizontal data is laid out with latitude varying
//! fastest: cell `(i_lon, i_lat)` has global index `i_lon * lat_size + i_lat`.

pub mod horizontal;
pub mod vertical;

pub use horizontal::{Bounds, CellData, CoordUnit, EdgeType, HorizontalData, NULL_COORD_VALUE, Vertices};
pub use vertical::VerticalCoord;

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a geometry object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryKey(u64);

impl GeometryKey {
    fn fresh() -> Self {
        GeometryKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

pub type GeometryRef = Arc<Geometry>;

/// Coordinate label of one dimension.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CoordLabel {
    Lon,
    Lat,
    Lev,
    Time,
    Tracer,
}

impl CoordLabel {
    pub fn is_horizontal(self) -> bool {
        matches!(self, CoordLabel::Lon | CoordLabel::Lat)
    }
}

/// Coordinate values carried by an axis.
#[derive(Clone, Debug, PartialEq)]
pub enum AxisCoords {
    None,
    Angular { unit: CoordUnit, centers: Vec<f64> },
    Vertical(VerticalCoord),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Axis {
    pub label: CoordLabel,
    pub size: usize,
    pub coords: AxisCoords,
}

#[derive(Clone, Debug)]
pub enum Shape {
    Axis(Axis),
    Horizontal(HorizontalData),
    Product(Vec<GeometryRef>),
}

/// One leaf dimension and the geometry object it comes from.
#[derive(Clone, Debug)]
pub struct Leaf {
    pub labels: Vec<CoordLabel>,
    pub size: usize,
    pub source: GeometryRef,
}

impl Leaf {
    pub fn has(&self, label: CoordLabel) -> bool {
        self.labels.contains(&label)
    }
}

pub struct Geometry {
    key: GeometryKey,
    name: String,
    shape: Shape,
    synthesized_h2d: OnceCell<GeometryRef>,
}

impl fmt::Debug for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Geometry")
            .field("key", &self.key.0)
            .field("name", &self.name)
            .field("dims", &self.num_dimensions())
            .finish()
    }
}

impl Geometry {
    fn build(name: impl Into<String>, shape: Shape) -> GeometryRef {
        Arc::new(Geometry {
            key: GeometryKey::fresh(),
            name: name.into(),
            shape,
            synthesized_h2d: OnceCell::new(),
        })
    }

    /// Axis without coordinate values (time, tracer).
    pub fn axis(name: impl Into<String>, label: CoordLabel, size: usize) -> GeometryRef {
        Self::build(
            name,
            Shape::Axis(Axis {
                label,
                size,
                coords: AxisCoords::None,
            }),
        )
    }

    /// Longitude or latitude axis with center values.
    pub fn angular_axis(
        name: impl Into<String>,
        label: CoordLabel,
        unit: CoordUnit,
        centers: Vec<f64>,
    ) -> GeometryRef {
        Self::build(
            name,
            Shape::Axis(Axis {
                label,
                size: centers.len(),
                coords: AxisCoords::Angular { unit, centers },
            }),
        )
    }

    pub fn vertical(name: impl Into<String>, coord: VerticalCoord) -> GeometryRef {
        Self::build(
            name,
            Shape::Axis(Axis {
                label: CoordLabel::Lev,
                size: coord.len(),
                coords: AxisCoords::Vertical(coord),
            }),
        )
    }

    pub fn horizontal(name: impl Into<String>, data: HorizontalData) -> GeometryRef {
        Self::build(name, Shape::Horizontal(data))
    }

    /// Outer product; leaf order follows `parts`.
    pub fn product(name: impl Into<String>, parts: Vec<GeometryRef>) -> GeometryRef {
        Self::build(name, Shape::Product(parts))
    }

    pub fn key(&self) -> GeometryKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn horizontal_data(&self) -> Option<&HorizontalData> {
        match &self.shape {
            Shape::Horizontal(h) => Some(h),
            _ => None,
        }
    }

    pub fn vertical_coord(&self) -> Option<&VerticalCoord> {
        match &self.shape {
            Shape::Axis(Axis {
                coords: AxisCoords::Vertical(v),
                ..
            }) => Some(v),
            _ => None,
        }
    }

    pub fn axis_label(&self) -> Option<CoordLabel> {
        match &self.shape {
            Shape::Axis(a) => Some(a.label),
            _ => None,
        }
    }

    /// Number of leaf dimensions.
    pub fn num_dimensions(&self) -> usize {
        match &self.shape {
            Shape::Axis(_) => 1,
            Shape::Horizontal(h) => {
                if h.dims.is_some() {
                    2
                } else {
                    1
                }
            }
            Shape::Product(parts) => parts.iter().map(|p| p.num_dimensions()).sum(),
        }
    }

    /// Total number of cells.
    pub fn size(&self) -> usize {
        match &self.shape {
            Shape::Axis(a) => a.size,
            Shape::Horizontal(h) => h.grid_size,
            Shape::Product(parts) => parts.iter().map(|p| p.size()).product(),
        }
    }

    pub fn has_label(&self, label: CoordLabel) -> bool {
        match &self.shape {
            Shape::Axis(a) => a.label == label,
            Shape::Horizontal(_) => label.is_horizontal(),
            Shape::Product(parts) => parts.iter().any(|p| p.has_label(label)),
        }
    }

    /// Leaf dimensions in order.
    pub fn leaves(self: &Arc<Self>) -> Vec<Leaf> {
        match &self.shape {
            Shape::Axis(a) => vec![Leaf {
                labels: vec![a.label],
                size: a.size,
                source: Arc::clone(self),
            }],
            Shape::Horizontal(h) => match h.dims {
                Some((nlon, nlat)) => vec![
                    Leaf {
                        labels: vec![CoordLabel::Lon],
                        size: nlon,
                        source: Arc::clone(self),
                    },
                    Leaf {
                        labels: vec![CoordLabel::Lat],
                        size: nlat,
                        source: Arc::clone(self),
                    },
                ],
                None => vec![Leaf {
                    labels: vec![CoordLabel::Lon, CoordLabel::Lat],
                    size: h.grid_size,
                    source: Arc::clone(self),
                }],
            },
            Shape::Product(parts) => parts.iter().flat_map(|p| p.leaves()).collect(),
        }
    }

    /// Horizontal surface built from separate longitude and latitude axes.
    /// Built once per geometry; later calls return the same object.
    pub fn synthesized_horizontal(&self, lon: &GeometryRef, lat: &GeometryRef) -> GeometryRef {
        Arc::clone(self.synthesized_h2d.get_or_init(|| {
            let (lon_unit, lon_c) = angular_centers(lon, CoordLabel::Lon);
            let (_, lat_c) = angular_centers(lat, CoordLabel::Lat);
            let (nlon, nlat) = (lon.size(), lat.size());
            let mut center_lon = Vec::with_capacity(nlon * nlat);
            let mut center_lat = Vec::with_capacity(nlon * nlat);
            for i in 0..nlon {
                for j in 0..nlat {
                    center_lon.push(lon_c.get(i).copied().unwrap_or(NULL_COORD_VALUE));
                    center_lat.push(lat_c.get(j).copied().unwrap_or(NULL_COORD_VALUE));
                }
            }
            let bounds = bounds_of(&center_lon, &center_lat);
            Geometry::horizontal(
                format!("H2D_sub_grid_of_{}", self.name),
                HorizontalData {
                    edge_type: EdgeType::LonLat,
                    unit: lon_unit,
                    cyclic: false,
                    grid_size: nlon * nlat,
                    dims: Some((nlon, nlat)),
                    bounds,
                    cells: CellData::replicated(center_lon, center_lat, None),
                    area: None,
                    vertices: None,
                },
            )
        }))
    }
}

fn angular_centers(g: &GeometryRef, label: CoordLabel) -> (CoordUnit, Vec<f64>) {
    match g.shape() {
        Shape::Axis(Axis {
            label: l,
            coords: AxisCoords::Angular { unit, centers },
            ..
        }) if *l == label => (*unit, centers.clone()),
        _ => (CoordUnit::Degrees, Vec::new()),
    }
}

/// Extent of the given centers, ignoring unset values.
pub fn bounds_of(center_lon: &[f64], center_lat: &[f64]) -> Bounds {
    fn min_max(v: &[f64]) -> (f64, f64) {
        v.iter()
            .copied()
            .filter(|x| *x != NULL_COORD_VALUE)
            .fold(None, |acc: Option<(f64, f64)>, x| match acc {
                None => Some((x, x)),
                Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
            })
            .unwrap_or((NULL_COORD_VALUE, NULL_COORD_VALUE))
    }
    let (min_lon, max_lon) = min_max(center_lon);
    let (min_lat, max_lat) = min_max(center_lat);
    Bounds {
        min_lon,
        max_lon,
        min_lat,
        max_lat,
    }
}
