//! RegistryError: unified error type for the grid and decomposition registries.
//!
//! Errors fall into two classes. User errors describe bad registration input
//! (ranges, sizes, names, indices) and may be collected instead of returned
//! when the registry runs in tolerant mode. Internal errors mean the catalogue
//! or the process-group protocol is inconsistent and are always returned.

use std::time::Duration;
use thiserror::Error;

/// Which class an error belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// Bad parameters or configuration supplied by the caller.
    User,
    /// Corrupt catalogue state or a broken collective protocol.
    Internal,
}

/// Unified error type for registry operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    /// A component id that this process does not know.
    #[error("unknown component id {0}")]
    UnknownComponent(u32),
    /// A component operation needs the local process group, but this process is not a member.
    #[error("component \"{0}\" has no local process group on this process")]
    NotAMember(String),
    /// A raw grid handle with the wrong prefix or an out-of-range index.
    #[error("illegal grid handle {raw:#x}")]
    InvalidGridId { raw: u64 },
    /// A raw decomposition handle with the wrong prefix or an out-of-range index.
    #[error("illegal decomposition handle {raw:#x}")]
    InvalidDecompId { raw: u64 },
    /// A grid with the same name is already registered by the component.
    #[error("grid \"{name}\" has already been registered by component \"{comp}\" (at \"{previous}\"); see \"{annotation}\"")]
    DuplicateGridName {
        comp: String,
        name: String,
        previous: String,
        annotation: String,
    },
    /// A decomposition with the same name is already registered by the component.
    #[error("parallel decomposition \"{name}\" has already been registered by component \"{comp}\"; see \"{annotation}\"")]
    DuplicateDecompName {
        comp: String,
        name: String,
        annotation: String,
    },
    /// The operation requires a horizontal (H2D) grid.
    #[error("grid \"{grid}\" is not a horizontal 2-D grid; see \"{annotation}\"")]
    NotHorizontal { grid: String, annotation: String },
    /// The operation requires a 3-D grid with horizontal and vertical roles.
    #[error("grid \"{grid}\" is not a 3-D grid; see \"{annotation}\"")]
    NotThreeDimensional { grid: String, annotation: String },
    /// Coordinate labels do not match the declared dimensionality.
    #[error("grid \"{grid}\": {detail}; see \"{annotation}\"")]
    DimensionLabels {
        grid: String,
        detail: String,
        annotation: String,
    },
    /// An input array does not have the required length.
    #[error("grid \"{grid}\": array \"{array}\" has {actual} entries but {expected} are required; see \"{annotation}\"")]
    ArraySize {
        grid: String,
        array: &'static str,
        expected: usize,
        actual: usize,
        annotation: String,
    },
    /// A coordinate value or bound lies outside the legal range.
    #[error("grid \"{grid}\": {what} = {value} is outside [{min}, {max}]; see \"{annotation}\"")]
    ValueOutOfRange {
        grid: String,
        what: String,
        value: f64,
        min: f64,
        max: f64,
        annotation: String,
    },
    /// Mask values must be exactly 0 or 1.
    #[error("grid \"{grid}\": mask value {value} is not 0 or 1; see \"{annotation}\"")]
    InvalidMask {
        grid: String,
        value: i32,
        annotation: String,
    },
    /// A grid reaching a pole must be cyclic in longitude.
    #[error("grid \"{grid}\" reaches a pole but is not cyclic; see \"{annotation}\"")]
    PoleNotCyclic { grid: String, annotation: String },
    /// Only degrees and radians are accepted.
    #[error("coordinate unit \"{unit}\" is not supported (use degrees or radians); see \"{annotation}\"")]
    UnsupportedUnit { unit: String, annotation: String },
    /// Edge type is unknown or cannot be used with the given settings.
    #[error("edge type \"{edge}\": {detail}; see \"{annotation}\"")]
    EdgeType {
        edge: String,
        detail: String,
        annotation: String,
    },
    /// Vertex arrays are inconsistent with the cell centers.
    #[error("grid \"{grid}\": {detail}; see \"{annotation}\"")]
    VertexCount {
        grid: String,
        detail: String,
        annotation: String,
    },
    /// Vertical coordinate values are malformed.
    #[error("vertical grid \"{grid}\": {detail}; see \"{annotation}\"")]
    VerticalCoord {
        grid: String,
        detail: String,
        annotation: String,
    },
    /// Sub-grids cannot be combined into the requested grid.
    #[error("grid \"{grid}\": {detail}; see \"{annotation}\"")]
    Composition {
        grid: String,
        detail: String,
        annotation: String,
    },
    /// A global or local cell index is outside its legal range.
    #[error("decomposition \"{decomp}\": cell index {index} is outside [1, {limit}]; see \"{annotation}\"")]
    CellIndexOutOfRange {
        decomp: String,
        index: i64,
        limit: usize,
        annotation: String,
    },
    /// Local cell counts do not add up across the process group.
    #[error("grid \"{grid}\": processes hold {actual} cells in total but the grid has {expected}; see \"{annotation}\"")]
    CellCountMismatch {
        grid: String,
        expected: usize,
        actual: usize,
        annotation: String,
    },
    /// Chunk sizes must sum to the local cell count.
    #[error("decomposition \"{decomp}\": chunk sizes sum to {sum} but there are {local} local cells; see \"{annotation}\"")]
    ChunkSizes {
        decomp: String,
        sum: usize,
        local: usize,
        annotation: String,
    },
    /// A halo entry conflicts with the host decomposition or another halo entry.
    #[error("halo decomposition \"{decomp}\": local slot {slot}: {detail}; see \"{annotation}\"")]
    HaloConflict {
        decomp: String,
        slot: usize,
        detail: String,
        annotation: String,
    },
    /// A global cell is claimed by more than one process.
    #[error("{what}: global cell {global_index} (1-based) is held by both process {first_rank} and process {second_rank}; see \"{annotation}\"")]
    DuplicateOwnership {
        what: String,
        global_index: u64,
        first_rank: usize,
        second_rank: usize,
        annotation: String,
    },
    /// Checksums published by another component do not match local data.
    #[error("grid \"{grid}\": {which} checksum {local:#x} differs from the published {remote:#x}")]
    ChecksumMismatch {
        grid: String,
        which: &'static str,
        local: u64,
        remote: u64,
    },
    /// A write-once field attachment was already made.
    #[error("grid \"{grid}\": the {what} has already been set (at \"{previous}\"); see \"{annotation}\"")]
    FieldAlreadySet {
        grid: String,
        what: &'static str,
        previous: String,
        annotation: String,
    },
    /// A field cannot be attached to this grid.
    #[error("grid \"{grid}\": {detail}; see \"{annotation}\"")]
    FieldAttachment {
        grid: String,
        detail: String,
        annotation: String,
    },
    /// Mid-point grid registration is not possible.
    #[error("mid-point grid of \"{grid}\": {detail}; see \"{annotation}\"")]
    MidPoint {
        grid: String,
        detail: String,
        annotation: String,
    },
    /// A recognised but unimplemented capability.
    #[error("{feature} is not supported; see \"{annotation}\"")]
    Unsupported { feature: String, annotation: String },
    /// The remote grid was not published before the timeout expired.
    #[error("timed out after {waited:?} waiting for grid \"{grid}\" of component \"{comp}\"")]
    RemoteGridTimeout {
        comp: String,
        grid: String,
        waited: Duration,
    },
    /// Another process of the group failed the same collective step.
    #[error("\"{step}\" failed on another process of the group")]
    PeerFailed { step: String },
    /// A grid-exchange file could not be read or written.
    #[error("grid-exchange file \"{path}\": {detail}")]
    ExchangeFile { path: String, detail: String },

    /// A grid has no horizontal, vertical, time or tracer dimension.
    #[error("software error: grid \"{grid}\" has no recognised dimension")]
    NoRecognisedDimension { grid: String },
    /// A checksum was committed twice.
    #[error("software error: the {which} checksum of grid \"{grid}\" is already committed")]
    ChecksumCommitted { grid: String, which: &'static str },
    /// The geometry of a grid was released and is needed again.
    #[error("software error: the geometry of grid \"{grid}\" has been released")]
    GeometryReleased { grid: String },
    /// A derived decomposition already exists but was not memoized.
    #[error("software error: derived decomposition \"{name}\" already exists")]
    DerivedDecompExists { name: String },
    /// A collective exchange failed or delivered a malformed payload.
    #[error("communication error: {0}")]
    Comm(String),
    /// Any other broken catalogue invariant.
    #[error("software error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Classify the error.
    pub fn class(&self) -> ErrorClass {
        use RegistryError::*;
        match self {
            NoRecognisedDimension { .. }
            | ChecksumCommitted { .. }
            | GeometryReleased { .. }
            | DerivedDecompExists { .. }
            | Comm(_)
            | Internal(_) => ErrorClass::Internal,
            _ => ErrorClass::User,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.class() == ErrorClass::Internal
    }
}

impl From<bincode::Error> for RegistryError {
    fn from(e: bincode::Error) -> Self {
        RegistryError::Comm(format!("payload decoding failed: {e}"))
    }
}

/// User errors recorded in tolerant mode instead of being returned.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    entries: Vec<RegistryError>,
}

impl Diagnostics {
    pub fn push(&mut self, err: RegistryError) {
        self.entries.push(err);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryError> + '_ {
        self.entries.iter()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&mut self) -> Vec<RegistryError> {
        std::mem::take(&mut self.entries)
    }
}
