#![allow(dead_code)]
use grid_registry::geometry::Bounds;
use grid_registry::grid::{H2dDims, H2dGridSpec, LocalH2dSpec};
use std::path::PathBuf;

/// Longitude of column `i` of an evenly spaced cyclic grid.
pub fn lon_of(i: usize, lon_size: usize) -> f64 {
    360.0 * i as f64 / lon_size as f64
}

/// Latitude of row `j`, kept away from the poles.
pub fn lat_of(j: usize, lat_size: usize) -> f64 {
    -75.0 + 150.0 * (j as f64 + 0.5) / lat_size as f64
}

/// A cyclic lon/lat grid given by its axes.
pub fn rect_spec(lon_size: usize, lat_size: usize) -> H2dGridSpec {
    H2dGridSpec::new(
        "LON_LAT",
        "degrees",
        true,
        H2dDims::Rectangular { lon_size, lat_size },
        (0..lon_size).map(|i| lon_of(i, lon_size)).collect(),
        (0..lat_size).map(|j| lat_of(j, lat_size)).collect(),
    )
}

/// The cells with the given 0-based global indexes of [`rect_spec`].
pub fn local_spec(lon_size: usize, lat_size: usize, cells: &[usize]) -> LocalH2dSpec {
    LocalH2dSpec {
        edge_type: "LON_LAT".into(),
        coord_unit: "degrees".into(),
        cyclic: true,
        grid_size: lon_size * lat_size,
        dims: Some((lon_size, lat_size)),
        bounds: Bounds::unset(),
        global_index: cells.iter().map(|&c| c as i64 + 1).collect(),
        center_lon: cells.iter().map(|&c| lon_of(c / lat_size, lon_size)).collect(),
        center_lat: cells.iter().map(|&c| lat_of(c % lat_size, lat_size)).collect(),
        mask: None,
        area: None,
        vertex_lon: None,
        vertex_lat: None,
    }
}

/// A fresh, empty directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("grid-registry-tests")
        .join(format!("{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
