//! Horizontal (lon/lat) surface data.

use crate::algs::blocks::even_block;
use std::f64::consts::PI;
use std::fmt;

/// Sentinel for a coordinate that has not been set.
pub const NULL_COORD_VALUE: f64 = -9_999_999.0;

/// How cell edges are drawn between vertices.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EdgeType {
    #[serde(rename = "LON_LAT")]
    LonLat,
    #[serde(rename = "GREAT_ARC")]
    GreatArc,
    #[serde(rename = "XY")]
    Xy,
    #[serde(rename = "TriPolar")]
    TriPolar,
}

impl EdgeType {
    pub fn parse(s: &str) -> Option<EdgeType> {
        match s {
            "LON_LAT" => Some(EdgeType::LonLat),
            "GREAT_ARC" => Some(EdgeType::GreatArc),
            "XY" => Some(EdgeType::Xy),
            "TriPolar" => Some(EdgeType::TriPolar),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::LonLat => "LON_LAT",
            EdgeType::GreatArc => "GREAT_ARC",
            EdgeType::Xy => "XY",
            EdgeType::TriPolar => "TriPolar",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Angular unit of horizontal coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CoordUnit {
    Degrees,
    Radians,
}

impl CoordUnit {
    /// Accepts `degrees`/`degree` and `radians`/`radian`, case-insensitively.
    pub fn parse(s: &str) -> Option<CoordUnit> {
        match s.trim().to_ascii_lowercase().as_str() {
            "degrees" | "degree" => Some(CoordUnit::Degrees),
            "radians" | "radian" => Some(CoordUnit::Radians),
            _ => None,
        }
    }

    /// One full turn of longitude.
    pub fn period(self) -> f64 {
        match self {
            CoordUnit::Degrees => 360.0,
            CoordUnit::Radians => 2.0 * PI,
        }
    }

    /// Latitude of the north pole.
    pub fn pole(self) -> f64 {
        self.period() / 4.0
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CoordUnit::Degrees => "degrees",
            CoordUnit::Radians => "radians",
        }
    }

    pub fn to_degrees(self, v: f64) -> f64 {
        match self {
            CoordUnit::Degrees => v,
            CoordUnit::Radians => v * 180.0 / PI,
        }
    }
}

/// Horizontal extent of a grid.
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl Bounds {
    pub fn unset() -> Self {
        Self {
            min_lon: NULL_COORD_VALUE,
            max_lon: NULL_COORD_VALUE,
            min_lat: NULL_COORD_VALUE,
            max_lat: NULL_COORD_VALUE,
        }
    }

    pub fn is_unset(&self) -> bool {
        self.min_lon == NULL_COORD_VALUE
    }
}

/// Cell-center data held by this process.
///
/// With `global_index == None` the arrays describe the whole grid in global
/// order and are replicated on every process of the component; otherwise
/// they describe only the listed (0-based) global cells.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CellData {
    pub global_index: Option<Vec<usize>>,
    pub center_lon: Vec<f64>,
    pub center_lat: Vec<f64>,
    pub mask: Option<Vec<i32>>,
}

impl CellData {
    pub fn replicated(center_lon: Vec<f64>, center_lat: Vec<f64>, mask: Option<Vec<i32>>) -> Self {
        Self {
            global_index: None,
            center_lon,
            center_lat,
            mask,
        }
    }

    pub fn is_replicated(&self) -> bool {
        self.global_index.is_none()
    }

    pub fn len(&self) -> usize {
        self.center_lon.len()
    }

    pub fn is_empty(&self) -> bool {
        self.center_lon.is_empty()
    }

    /// Local positions whose values this rank adds to distributed reductions.
    /// Replicated data is split evenly so that each cell is counted once.
    pub fn contributing_range(&self, rank: usize, size: usize) -> std::ops::Range<usize> {
        if self.is_replicated() {
            even_block(self.len(), size, rank)
        } else {
            0..self.len()
        }
    }

    /// 0-based global index of local position `i`.
    pub fn global_of(&self, i: usize) -> usize {
        match &self.global_index {
            Some(g) => g[i],
            None => i,
        }
    }

    /// Mask of local position `i`; cells without a mask are active.
    pub fn mask_of(&self, i: usize) -> i32 {
        self.mask.as_ref().map_or(1, |m| m[i])
    }
}

/// Polygon vertices, `per_cell` consecutive entries per local cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Vertices {
    pub per_cell: usize,
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
}

/// Everything the registry knows about a horizontal surface.
#[derive(Clone, Debug, PartialEq)]
pub struct HorizontalData {
    pub edge_type: EdgeType,
    pub unit: CoordUnit,
    pub cyclic: bool,
    pub grid_size: usize,
    /// `(lon_size, lat_size)` for logically rectangular grids.
    pub dims: Option<(usize, usize)>,
    pub bounds: Bounds,
    pub cells: CellData,
    pub area: Option<Vec<f64>>,
    pub vertices: Option<Vertices>,
}
