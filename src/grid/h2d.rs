//! Horizontal grid registration from caller-supplied coordinate arrays.
//!
//! Four paths all end in [`Registry::register_grid`]: whole-grid data on
//! every process, per-process local cells, a grid-data file, and a grid
//! published by another component.

use crate::algs::collective::{ReduceOp, allreduce_f64_slice, allreduce_i64, broadcast_value};
use crate::algs::communicator::Communicator;
use crate::algs::redistribute::find_duplicate_key;
use crate::component::ComponentId;
use crate::geometry::{Bounds, CellData, Geometry, HorizontalData, Vertices};
use crate::grid::exchange::{GridExchangeRecord, GridRendezvous};
use crate::grid::register::GridOptions;
use crate::grid::validation::{
    CoordArrays, Site, check_bound_pairs, check_mask, edge_and_unit, finish_extent, real_extent, resolve_bounds,
    vertices_per_cell,
};
use crate::handle::GridId;
use crate::registry::{Registry, agree};
use crate::registry_error::RegistryError;
use std::path::Path;

/// Shape of a horizontal grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum H2dDims {
    /// Logically rectangular, latitude varying fastest.
    Rectangular { lon_size: usize, lat_size: usize },
    Unstructured { grid_size: usize },
}

impl H2dDims {
    pub fn grid_size(self) -> usize {
        match self {
            H2dDims::Rectangular { lon_size, lat_size } => lon_size * lat_size,
            H2dDims::Unstructured { grid_size } => grid_size,
        }
    }

    fn pair(self) -> Option<(usize, usize)> {
        match self {
            H2dDims::Rectangular { lon_size, lat_size } => Some((lon_size, lat_size)),
            H2dDims::Unstructured { .. } => None,
        }
    }
}

/// A whole horizontal grid, as every process of the component supplies it.
///
/// On rectangular grids, centers (and vertices) may be given per axis
/// instead of per cell; per-axis vertices are the two edges of each axis
/// interval.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct H2dGridSpec {
    pub edge_type: String,
    pub coord_unit: String,
    pub cyclic: bool,
    pub dims: H2dDims,
    #[serde(default = "Bounds::unset")]
    pub bounds: Bounds,
    pub center_lon: Vec<f64>,
    pub center_lat: Vec<f64>,
    #[serde(default)]
    pub mask: Option<Vec<i32>>,
    #[serde(default)]
    pub area: Option<Vec<f64>>,
    #[serde(default)]
    pub vertex_lon: Option<Vec<f64>>,
    #[serde(default)]
    pub vertex_lat: Option<Vec<f64>>,
}

impl H2dGridSpec {
    pub fn new(edge_type: &str, coord_unit: &str, cyclic: bool, dims: H2dDims, center_lon: Vec<f64>, center_lat: Vec<f64>) -> Self {
        H2dGridSpec {
            edge_type: edge_type.to_string(),
            coord_unit: coord_unit.to_string(),
            cyclic,
            dims,
            bounds: Bounds::unset(),
            center_lon,
            center_lat,
            mask: None,
            area: None,
            vertex_lon: None,
            vertex_lat: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_mask(mut self, mask: Vec<i32>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_area(mut self, area: Vec<f64>) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_vertices(mut self, lon: Vec<f64>, lat: Vec<f64>) -> Self {
        self.vertex_lon = Some(lon);
        self.vertex_lat = Some(lat);
        self
    }
}

/// This process's share of a distributed horizontal grid.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalH2dSpec {
    pub edge_type: String,
    pub coord_unit: String,
    pub cyclic: bool,
    pub grid_size: usize,
    /// `(lon_size, lat_size)` when the global grid is logically rectangular.
    pub dims: Option<(usize, usize)>,
    pub bounds: Bounds,
    /// 1-based global index of each local cell.
    pub global_index: Vec<i64>,
    pub center_lon: Vec<f64>,
    pub center_lat: Vec<f64>,
    pub mask: Option<Vec<i32>>,
    pub area: Option<Vec<f64>>,
    pub vertex_lon: Option<Vec<f64>>,
    pub vertex_lat: Option<Vec<f64>>,
}

fn expand_axes(lon: &[f64], lat: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = lon.len() * lat.len();
    let mut out_lon = Vec::with_capacity(n);
    let mut out_lat = Vec::with_capacity(n);
    for &x in lon {
        for &y in lat {
            out_lon.push(x);
            out_lat.push(y);
        }
    }
    (out_lon, out_lat)
}

/// Four corners per cell from the two edges of each axis interval.
fn expand_axis_vertices(lon: &[f64], lat: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut out_lon = Vec::with_capacity(lon.len() * lat.len() * 2);
    let mut out_lat = Vec::with_capacity(out_lon.capacity());
    for x in lon.chunks_exact(2) {
        for y in lat.chunks_exact(2) {
            out_lon.extend_from_slice(&[x[0], x[1], x[1], x[0]]);
            out_lat.extend_from_slice(&[y[0], y[0], y[1], y[1]]);
        }
    }
    (out_lon, out_lat)
}

/// Validated whole-grid data plus the recoverable errors found on the way.
pub(crate) fn build_global(spec: &H2dGridSpec, site: Site<'_>) -> Result<(HorizontalData, Vec<RegistryError>), RegistryError> {
    let (edge_type, unit) = edge_and_unit(&spec.edge_type, &spec.coord_unit, spec.cyclic, site)?;
    let grid_size = spec.dims.grid_size();
    if grid_size == 0 {
        return Err(site.array_size("center_lon", 1, 0));
    }
    let per_axis = match spec.dims.pair() {
        Some((nlon, nlat)) if spec.center_lon.len() != grid_size || spec.center_lat.len() != grid_size => {
            if spec.center_lon.len() != nlon {
                return Err(site.array_size("center_lon", nlon, spec.center_lon.len()));
            }
            if spec.center_lat.len() != nlat {
                return Err(site.array_size("center_lat", nlat, spec.center_lat.len()));
            }
            true
        }
        _ => {
            for (name, arr) in [("center_lon", &spec.center_lon), ("center_lat", &spec.center_lat)] {
                if arr.len() != grid_size {
                    return Err(site.array_size(name, grid_size, arr.len()));
                }
            }
            false
        }
    };
    let (center_lon, center_lat) = if per_axis {
        expand_axes(&spec.center_lon, &spec.center_lat)
    } else {
        (spec.center_lon.clone(), spec.center_lat.clone())
    };

    let mut soft = Vec::new();
    if let Some(mask) = &spec.mask {
        if mask.len() != grid_size {
            return Err(site.array_size("mask", grid_size, mask.len()));
        }
        if let Err(e) = check_mask(mask, site) {
            soft.push(e);
        }
    }
    if let Some(area) = &spec.area {
        if area.len() != grid_size {
            return Err(site.array_size("area", grid_size, area.len()));
        }
    }
    let vertices = match (&spec.vertex_lon, &spec.vertex_lat) {
        (None, None) => None,
        (Some(vl), Some(vt)) if per_axis => {
            let (nlon, nlat) = spec.dims.pair().unwrap_or_default();
            if vl.len() != 2 * nlon {
                return Err(site.array_size("vertex_lon", 2 * nlon, vl.len()));
            }
            if vt.len() != 2 * nlat {
                return Err(site.array_size("vertex_lat", 2 * nlat, vt.len()));
            }
            let (lon, lat) = expand_axis_vertices(vl, vt);
            Some(Vertices { per_cell: 4, lon, lat })
        }
        (Some(vl), Some(vt)) => {
            if vl.len() != vt.len() {
                return Err(site.array_size("vertex_lat", vl.len(), vt.len()));
            }
            let per_cell = vertices_per_cell(vl.len(), grid_size, site)?;
            Some(Vertices {
                per_cell,
                lon: vl.clone(),
                lat: vt.clone(),
            })
        }
        (Some(v), None) => return Err(site.array_size("vertex_lat", v.len(), 0)),
        (None, Some(v)) => return Err(site.array_size("vertex_lon", v.len(), 0)),
    };

    check_bound_pairs(&spec.bounds, site)?;
    let coords = CoordArrays {
        center_lon: &center_lon,
        center_lat: &center_lat,
        vertex_lon: vertices.as_ref().map_or(&[][..], |v| &v.lon),
        vertex_lat: vertices.as_ref().map_or(&[][..], |v| &v.lat),
    };
    let real = real_extent(coords);
    let (bounds, range_errs) = resolve_bounds(unit, spec.cyclic, spec.bounds, real, coords, site);
    soft.extend(range_errs);

    let data = HorizontalData {
        edge_type,
        unit,
        cyclic: spec.cyclic,
        grid_size,
        dims: spec.dims.pair(),
        bounds,
        cells: CellData::replicated(center_lon, center_lat, spec.mask.clone()),
        area: spec.area.clone(),
        vertices,
    };
    Ok((data, soft))
}

/// Rank-local checks of a [`LocalH2dSpec`]; returns the vertices per cell.
fn check_local(spec: &LocalH2dSpec, site: Site<'_>) -> Result<(usize, Vec<RegistryError>), RegistryError> {
    edge_and_unit(&spec.edge_type, &spec.coord_unit, spec.cyclic, site)?;
    let n = spec.global_index.len();
    for (name, len) in [("center_lon", spec.center_lon.len()), ("center_lat", spec.center_lat.len())] {
        if len != n {
            return Err(site.array_size(name, n, len));
        }
    }
    if let Some((nlon, nlat)) = spec.dims {
        if nlon * nlat != spec.grid_size {
            return Err(site.array_size("grid_size", nlon * nlat, spec.grid_size));
        }
    }
    if let Some(&bad) = spec
        .global_index
        .iter()
        .find(|&&g| g < 1 || g as u64 > spec.grid_size as u64)
    {
        return Err(RegistryError::CellIndexOutOfRange {
            decomp: site.grid.to_string(),
            index: bad,
            limit: spec.grid_size,
            annotation: site.annotation.to_string(),
        });
    }
    let mut soft = Vec::new();
    if let Some(mask) = &spec.mask {
        if mask.len() != n {
            return Err(site.array_size("mask", n, mask.len()));
        }
        if let Err(e) = check_mask(mask, site) {
            soft.push(e);
        }
    }
    if let Some(area) = &spec.area {
        if area.len() != n {
            return Err(site.array_size("area", n, area.len()));
        }
    }
    let per_cell = match (&spec.vertex_lon, &spec.vertex_lat) {
        (None, None) => 0,
        (Some(vl), Some(vt)) if vl.len() == vt.len() => vertices_per_cell(vl.len(), n, site)?,
        (vl, vt) => {
            let len = |v: &Option<Vec<f64>>| v.as_ref().map_or(0, Vec::len);
            return Err(site.array_size("vertex_lat", len(vl), len(vt)));
        }
    };
    check_bound_pairs(&spec.bounds, site)?;
    Ok((per_cell, soft))
}

impl<C: Communicator> Registry<C> {
    /// Register a horizontal grid whose whole data every process supplies.
    pub fn register_h2d_grid_via_global_data(
        &mut self,
        comp: ComponentId,
        name: &str,
        spec: &H2dGridSpec,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        let (data, soft) = build_global(spec, Site::new(name, annotation))?;
        self.report_all(soft)?;
        let geometry = Geometry::horizontal(name, data);
        let opts = GridOptions {
            recurse: true,
            checksums: true,
        };
        let id = self.register_grid(comp, name, geometry, opts, annotation)?;
        self.output_h2d_grid_if_enabled(id)?;
        Ok(id)
    }

    /// Collective over `comp`: register a horizontal grid from each process's
    /// local cells.
    ///
    /// Local cell counts must add up to `grid_size`. With error checking
    /// enabled no global cell may be supplied by two processes. Bounds are
    /// resolved against the extent of all processes' coordinates.
    pub fn register_h2d_grid_via_local_data(
        &mut self,
        comp: ComponentId,
        name: &str,
        spec: &LocalH2dSpec,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        const STEP: &str = "register_h2d_grid_via_local_data";
        let site = Site::new(name, annotation);
        let comm = self.components.shared_comm(comp)?;
        let comm = &*comm;

        let (per_cell, soft) = agree(comm, STEP, check_local(spec, site))?;
        let outcome = self.report_all(soft);
        agree(comm, STEP, outcome)?;

        let n_local = spec.global_index.len();
        let total = allreduce_i64(comm, n_local as i64, ReduceOp::Sum)? as usize;
        if total != spec.grid_size {
            return Err(RegistryError::CellCountMismatch {
                grid: name.to_string(),
                expected: spec.grid_size,
                actual: total,
                annotation: annotation.to_string(),
            });
        }
        let holding = if n_local > 0 { per_cell as i64 } else { -1 };
        let max = allreduce_i64(comm, holding, ReduceOp::Max)?;
        let min = allreduce_i64(comm, if n_local > 0 { per_cell as i64 } else { i64::MAX }, ReduceOp::Min)?;
        if max >= 0 && max != min {
            return Err(RegistryError::VertexCount {
                grid: name.to_string(),
                detail: format!("processes disagree on vertices per cell ({min} and {max})"),
                annotation: annotation.to_string(),
            });
        }

        if self.config.report_error_enabled {
            let rank = comm.rank() as u64;
            let pairs: Vec<(u64, u64)> = spec.global_index.iter().map(|&g| (g as u64 - 1, rank)).collect();
            if let Some(dup) = find_duplicate_key(comm, &pairs, spec.grid_size as u64)? {
                self.report(RegistryError::DuplicateOwnership {
                    what: format!("H2D grid \"{name}\""),
                    global_index: dup.key + 1,
                    first_rank: dup.first as usize,
                    second_rank: dup.second as usize,
                    annotation: annotation.to_string(),
                })?;
            }
        }

        let empty: &[f64] = &[];
        let coords = CoordArrays {
            center_lon: &spec.center_lon,
            center_lat: &spec.center_lat,
            vertex_lon: spec.vertex_lon.as_deref().unwrap_or(empty),
            vertex_lat: spec.vertex_lat.as_deref().unwrap_or(empty),
        };
        let local = real_extent(coords);
        let wide = |v: f64, fallback: f64| if v == crate::geometry::NULL_COORD_VALUE { fallback } else { v };
        let mins = allreduce_f64_slice(
            comm,
            &[wide(local.min_lon, f64::INFINITY), wide(local.min_lat, f64::INFINITY)],
            ReduceOp::Min,
        )?;
        let maxs = allreduce_f64_slice(
            comm,
            &[wide(local.max_lon, f64::NEG_INFINITY), wide(local.max_lat, f64::NEG_INFINITY)],
            ReduceOp::Max,
        )?;
        let real = finish_extent([mins[0], maxs[0], mins[1], maxs[1]]);
        let (edge_type, unit) = edge_and_unit(&spec.edge_type, &spec.coord_unit, spec.cyclic, site)?;
        let (bounds, range_errs) = resolve_bounds(unit, spec.cyclic, spec.bounds, real, coords, site);
        let outcome = self.report_all(range_errs);
        agree(comm, STEP, outcome)?;

        // all ranks agree on the vertex count, including ranks without cells
        let per_cell_global = if max >= 0 { max as usize } else { 0 };
        let vertices = match (&spec.vertex_lon, &spec.vertex_lat) {
            (Some(lon), Some(lat)) => Some(Vertices {
                per_cell: per_cell_global,
                lon: lon.clone(),
                lat: lat.clone(),
            }),
            _ if per_cell_global > 0 => Some(Vertices {
                per_cell: per_cell_global,
                lon: Vec::new(),
                lat: Vec::new(),
            }),
            _ => None,
        };
        let data = HorizontalData {
            edge_type,
            unit,
            cyclic: spec.cyclic,
            grid_size: spec.grid_size,
            dims: spec.dims,
            bounds,
            cells: CellData {
                global_index: Some(spec.global_index.iter().map(|&g| (g - 1) as usize).collect()),
                center_lon: spec.center_lon.clone(),
                center_lat: spec.center_lat.clone(),
                mask: spec.mask.clone(),
            },
            area: spec.area.clone(),
            vertices,
        };
        let opts = GridOptions {
            recurse: true,
            checksums: true,
        };
        let id = self.register_grid(comp, name, Geometry::horizontal(name, data), opts, annotation)?;
        self.output_h2d_grid_if_enabled(id)?;
        Ok(id)
    }

    /// Collective over `comp`: register a horizontal grid from a grid-data
    /// file read on the component's first process.
    pub fn register_h2d_grid_via_file(
        &mut self,
        comp: ComponentId,
        name: &str,
        path: &Path,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        let comm = self.components.shared_comm(comp)?;
        let loaded = if comm.rank() == 0 {
            Some(GridExchangeRecord::read(path))
        } else {
            None
        };
        let record = self.share_record(&*comm, loaded, "register_h2d_grid_via_file")?;
        self.register_h2d_grid_from_record(comp, name, &record, annotation)
    }

    /// Collective over `comp`: wait until `remote_comp` publishes grid
    /// `remote_grid`, then register the same grid here.
    ///
    /// Blocks until the grid is published or the configured
    /// `remote_wait_timeout` expires. A misnamed remote component or grid
    /// blocks forever when no timeout is set.
    pub fn register_h2d_grid_via_comp(
        &mut self,
        comp: ComponentId,
        name: &str,
        remote_comp: &str,
        remote_grid: &str,
        rendezvous: &dyn GridRendezvous,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        let comm = self.components.shared_comm(comp)?;
        let loaded = if comm.rank() == 0 {
            log::info!("\"{name}\" waits for grid \"{remote_grid}\" of component \"{remote_comp}\"");
            Some(rendezvous.wait_for(remote_comp, remote_grid, self.config.remote_wait_timeout))
        } else {
            None
        };
        let record = self.share_record(&*comm, loaded, "register_h2d_grid_via_comp")?;
        self.register_h2d_grid_from_record(comp, name, &record, annotation)
    }

    /// Broadcast the root's record, or its failure, to the whole group.
    fn share_record(
        &self,
        comm: &C,
        loaded: Option<Result<GridExchangeRecord, RegistryError>>,
        step: &str,
    ) -> Result<GridExchangeRecord, RegistryError> {
        let (shared, root_err) = match loaded {
            Some(Ok(record)) => (Some(record), None),
            Some(Err(e)) => (None, Some(e)),
            None => (None, None),
        };
        let wire: Option<GridExchangeRecord> = broadcast_value(comm, 0, (comm.rank() == 0).then_some(&shared))?;
        match (wire, root_err) {
            (Some(record), _) => Ok(record),
            (None, Some(e)) => Err(e),
            (None, None) => Err(RegistryError::PeerFailed { step: step.to_string() }),
        }
    }

    fn register_h2d_grid_from_record(
        &mut self,
        comp: ComponentId,
        name: &str,
        record: &GridExchangeRecord,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        let id = self.register_h2d_grid_via_global_data(comp, name, &record.to_spec(), annotation)?;
        if self.config.report_error_enabled {
            if let (Some(published), Some(local)) = (record.checksums(), self.grids.get(id)?.checksums()) {
                for (which, remote, mine) in [
                    ("mask", published.mask, local.mask),
                    ("center_lon", published.center_lon, local.center_lon),
                    ("center_lat", published.center_lat, local.center_lat),
                ] {
                    if remote != mine {
                        return Err(RegistryError::ChecksumMismatch {
                            grid: name.to_string(),
                            which,
                            local: mine,
                            remote,
                        });
                    }
                }
            }
        }
        Ok(id)
    }
}
