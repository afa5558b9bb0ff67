//! Grid-exchange records and the rendezvous through which components share
//! horizontal grids.
//!
//! A publishing component writes a [`GridExchangeRecord`]; a receiving
//! component waits for it and registers an identical grid. Records carry
//! the publisher's checksums so that the receiver can confirm it rebuilt
//! the same grid.

use crate::algs::checksum::H2dChecksums;
use crate::algs::collective::gather_bytes;
use crate::algs::communicator::Communicator;
use crate::geometry::{Bounds, CellData, HorizontalData};
use crate::grid::h2d::{H2dDims, H2dGridSpec};
use crate::handle::GridId;
use crate::registry::{Registry, agree};
use crate::registry_error::RegistryError;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TITLE: &str = "horizontal grid exchange record";

/// Self-describing description of one horizontal grid.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GridExchangeRecord {
    pub title: String,
    pub grid_name: String,
    pub comp_full_name: String,
    pub edge_type: String,
    pub coord_unit: String,
    /// `"cyclic"` or `"acyclic"`.
    pub cyclic_or_acyclic: String,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
    #[serde(default)]
    pub mask_checksum: Option<u64>,
    #[serde(default)]
    pub center_lon_checksum: Option<u64>,
    #[serde(default)]
    pub center_lat_checksum: Option<u64>,
    pub dims: H2dDims,
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

impl GridExchangeRecord {
    /// Build a record from whole-grid data held in global-index order.
    pub fn from_global(
        grid_name: &str,
        comp_full_name: &str,
        data: &HorizontalData,
        cells: &CellData,
        checksums: Option<H2dChecksums>,
    ) -> Self {
        let dims = match data.dims {
            Some((lon_size, lat_size)) => H2dDims::Rectangular { lon_size, lat_size },
            None => H2dDims::Unstructured {
                grid_size: data.grid_size,
            },
        };
        let vertices = data.vertices.as_ref().filter(|v| !v.lon.is_empty());
        GridExchangeRecord {
            title: TITLE.to_string(),
            grid_name: grid_name.to_string(),
            comp_full_name: comp_full_name.to_string(),
            edge_type: data.edge_type.as_str().to_string(),
            coord_unit: data.unit.as_str().to_string(),
            cyclic_or_acyclic: if data.cyclic { "cyclic" } else { "acyclic" }.to_string(),
            min_lon: data.bounds.min_lon,
            max_lon: data.bounds.max_lon,
            min_lat: data.bounds.min_lat,
            max_lat: data.bounds.max_lat,
            mask_checksum: checksums.map(|c| c.mask),
            center_lon_checksum: checksums.map(|c| c.center_lon),
            center_lat_checksum: checksums.map(|c| c.center_lat),
            dims,
            center_lon: cells.center_lon.clone(),
            center_lat: cells.center_lat.clone(),
            mask: cells.mask.clone(),
            area: data.area.clone(),
            vertex_lon: vertices.map(|v| v.lon.clone()),
            vertex_lat: vertices.map(|v| v.lat.clone()),
        }
    }

    pub fn is_cyclic(&self) -> bool {
        self.cyclic_or_acyclic == "cyclic"
    }

    /// The registration input this record describes.
    ///
    /// Bounds are passed on only when the grid reaches a pole; other bounds
    /// were already resolved from the publisher's coordinates.
    pub fn to_spec(&self) -> H2dGridSpec {
        let mut bounds = Bounds::unset();
        if self.min_lon < self.max_lon && !self.is_cyclic() {
            bounds.min_lon = self.min_lon;
            bounds.max_lon = self.max_lon;
        }
        let pole = crate::geometry::CoordUnit::parse(&self.coord_unit).map(|u| u.pole());
        if pole.is_some_and(|p| self.min_lat == -p || self.max_lat == p) {
            bounds.min_lat = self.min_lat;
            bounds.max_lat = self.max_lat;
        }
        H2dGridSpec {
            edge_type: self.edge_type.clone(),
            coord_unit: self.coord_unit.clone(),
            cyclic: self.is_cyclic(),
            dims: self.dims,
            bounds,
            center_lon: self.center_lon.clone(),
            center_lat: self.center_lat.clone(),
            mask: self.mask.clone(),
            area: self.area.clone(),
            vertex_lon: self.vertex_lon.clone(),
            vertex_lat: self.vertex_lat.clone(),
        }
    }

    /// The publisher's checksums, when it recorded all three.
    pub fn checksums(&self) -> Option<H2dChecksums> {
        Some(H2dChecksums {
            mask: self.mask_checksum?,
            center_lon: self.center_lon_checksum?,
            center_lat: self.center_lat_checksum?,
        })
    }

    pub fn read(path: &Path) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|e| file_error(path, e))?;
        serde_json::from_str(&text).map_err(|e| file_error(path, e))
    }

    pub fn write(&self, path: &Path) -> Result<(), RegistryError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| file_error(dir, e))?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| file_error(path, e))?;
        std::fs::write(path, text).map_err(|e| file_error(path, e))
    }
}

fn file_error(path: &Path, e: impl std::fmt::Display) -> RegistryError {
    RegistryError::ExchangeFile {
        path: path.display().to_string(),
        detail: e.to_string(),
    }
}

/// Where components publish grids and wait for each other's.
pub trait GridRendezvous {
    fn publish(&self, record: &GridExchangeRecord) -> Result<(), RegistryError>;

    /// Block until `comp` has published `grid`, or `timeout` expires.
    fn wait_for(&self, comp: &str, grid: &str, timeout: Option<Duration>) -> Result<GridExchangeRecord, RegistryError>;
}

/// Rendezvous through a shared directory.
///
/// The record goes to `<dir>/<comp>/<grid>.grid.json`; an empty marker file
/// with an `.end` suffix is written afterwards, so a reader that sees the
/// marker always finds a complete record.
#[derive(Clone, Debug)]
pub struct FileRendezvous {
    dir: PathBuf,
    poll_interval: Duration,
}

impl FileRendezvous {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        FileRendezvous {
            dir: dir.into(),
            poll_interval,
        }
    }

    pub fn record_path(&self, comp: &str, grid: &str) -> PathBuf {
        self.dir.join(comp).join(format!("{grid}.grid.json"))
    }

    fn marker_path(&self, comp: &str, grid: &str) -> PathBuf {
        self.dir.join(comp).join(format!("{grid}.grid.json.end"))
    }
}

impl GridRendezvous for FileRendezvous {
    fn publish(&self, record: &GridExchangeRecord) -> Result<(), RegistryError> {
        let path = self.record_path(&record.comp_full_name, &record.grid_name);
        record.write(&path)?;
        let marker = self.marker_path(&record.comp_full_name, &record.grid_name);
        std::fs::write(&marker, b"").map_err(|e| file_error(&marker, e))?;
        log::debug!("published grid \"{}\" to {}", record.grid_name, path.display());
        Ok(())
    }

    fn wait_for(&self, comp: &str, grid: &str, timeout: Option<Duration>) -> Result<GridExchangeRecord, RegistryError> {
        let marker = self.marker_path(comp, grid);
        let start = Instant::now();
        let mut polls: u64 = 0;
        while !marker.exists() {
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    return Err(RegistryError::RemoteGridTimeout {
                        comp: comp.to_string(),
                        grid: grid.to_string(),
                        waited: start.elapsed(),
                    });
                }
            }
            polls += 1;
            if polls % 1000 == 0 {
                log::info!("still waiting for {}", marker.display());
            }
            std::thread::sleep(self.poll_interval);
        }
        GridExchangeRecord::read(&self.record_path(comp, grid))
    }
}

/// In-process rendezvous for components running as threads of one process.
#[derive(Clone, Default)]
pub struct MailboxRendezvous {
    inner: Arc<(Mutex<HashMap<(String, String), GridExchangeRecord>>, Condvar)>,
}

impl MailboxRendezvous {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GridRendezvous for MailboxRendezvous {
    fn publish(&self, record: &GridExchangeRecord) -> Result<(), RegistryError> {
        let (lock, cvar) = &*self.inner;
        lock.lock().insert(
            (record.comp_full_name.clone(), record.grid_name.clone()),
            record.clone(),
        );
        cvar.notify_all();
        Ok(())
    }

    fn wait_for(&self, comp: &str, grid: &str, timeout: Option<Duration>) -> Result<GridExchangeRecord, RegistryError> {
        let (lock, cvar) = &*self.inner;
        let key = (comp.to_string(), grid.to_string());
        let start = Instant::now();
        let deadline = timeout.map(|t| start + t);
        let mut published = lock.lock();
        loop {
            if let Some(record) = published.get(&key) {
                return Ok(record.clone());
            }
            match deadline {
                Some(deadline) => {
                    if cvar.wait_until(&mut published, deadline).timed_out() && !published.contains_key(&key) {
                        return Err(RegistryError::RemoteGridTimeout {
                            comp: comp.to_string(),
                            grid: grid.to_string(),
                            waited: start.elapsed(),
                        });
                    }
                }
                None => cvar.wait(&mut published),
            }
        }
    }
}

impl<C: Communicator> Registry<C> {
    /// Collective over the grid's component: publish an H2D grid.
    ///
    /// Distributed coordinates are gathered on the component's first
    /// process, which writes the record.
    pub fn publish_h2d_grid(&mut self, id: GridId, rendezvous: &dyn GridRendezvous) -> Result<(), RegistryError> {
        let comp = self.grids.get(id)?.comp();
        let h2d = self.h2d_sub_grid(id)?.ok_or_else(|| {
            let grid = self.grids.get(id).map(|g| g.name().to_string()).unwrap_or_default();
            RegistryError::NotHorizontal {
                grid,
                annotation: "publish_h2d_grid".into(),
            }
        })?;
        let checksums = self.ensure_checksums(h2d)?;
        let comm = self.components.shared_comm(comp)?;
        let grid = self.grids.get(h2d)?;
        let geometry = grid.geometry()?.clone();
        let data = geometry
            .horizontal_data()
            .ok_or_else(|| RegistryError::Internal(format!("grid \"{}\" has no horizontal data", grid.name())))?;

        let record = if data.cells.is_replicated() {
            (comm.rank() == 0).then(|| GridExchangeRecord::from_global(grid.name(), grid.comp_full_name(), data, &data.cells, checksums))
        } else {
            let local = bincode::serialize(&data.cells)?;
            match gather_bytes(&*comm, 0, &local)? {
                Some(parts) => {
                    // per-cell area and vertices stay with their owners
                    let whole = HorizontalData {
                        cells: assemble_global(data.grid_size, &parts)?,
                        area: None,
                        vertices: None,
                        ..data.clone()
                    };
                    Some(GridExchangeRecord::from_global(grid.name(), grid.comp_full_name(), &whole, &whole.cells, checksums))
                }
                None => None,
            }
        };
        let outcome = match record {
            Some(record) => rendezvous.publish(&record),
            None => Ok(()),
        };
        agree(&*comm, "publish_h2d_grid", outcome)
    }

    /// Write an exchange file for a newly registered H2D grid when the
    /// configuration asks for it.
    pub(crate) fn output_h2d_grid_if_enabled(&mut self, id: GridId) -> Result<(), RegistryError> {
        if !self.config.output_h2d_grids {
            return Ok(());
        }
        let Some(dir) = self.config.exchange_dir.clone() else {
            return Ok(());
        };
        let files = FileRendezvous::new(dir, self.config.poll_interval);
        self.publish_h2d_grid(id, &files)
    }
}

/// Reassemble per-rank cells into global-index order.
fn assemble_global(grid_size: usize, parts: &[Vec<u8>]) -> Result<CellData, RegistryError> {
    let mut lon = vec![crate::geometry::NULL_COORD_VALUE; grid_size];
    let mut lat = vec![crate::geometry::NULL_COORD_VALUE; grid_size];
    let mut mask = vec![1; grid_size];
    let mut has_mask = false;
    for part in parts {
        let cells: CellData = bincode::deserialize(part)?;
        has_mask |= cells.mask.is_some();
        for i in 0..cells.len() {
            let g = cells.global_of(i);
            if g >= grid_size {
                return Err(RegistryError::Internal(format!("gathered cell {g} outside grid of {grid_size}")));
            }
            lon[g] = cells.center_lon[i];
            lat[g] = cells.center_lat[i];
            mask[g] = cells.mask_of(i);
        }
    }
    Ok(CellData::replicated(lon, lat, has_mask.then_some(mask)))
}
