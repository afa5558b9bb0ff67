#![cfg_attr(docsrs, feature(doc_cfg))]
//! # grid-registry
//!
//! grid-registry is the grid-identity and parallel-decomposition registry of a
//! multi-component coupled model. Each component (a process group running one
//! model) registers the grids it computes on; the registry splits them into
//! canonical sub-grids, decides whether two components hold the *same* grid
//! by comparing distributed checksums, and records how the cells of a
//! horizontal grid are spread over a component's processes.
//!
//! ## Features
//! - Grid catalogue with horizontal 2-D, vertical 1-D, time and tracer roles
//! - Order-independent checksums of horizontal coordinates and masks
//! - Grid exchange between components through files or an in-process mailbox
//! - Parallel decompositions with halo, full, empty, default and I/O variants
//! - Distributed check that no cell is owned by two processes
//! - Pluggable communication backends (serial, threads, MPI)
//!
//! ## Collectives
//!
//! Registration calls that touch more than one process are collective: every
//! process of the component must make the same calls in the same order.
//! Lookups by handle are local.
//!
//! ## Usage
//! Add `grid-registry` as a dependency in your `Cargo.toml` and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! grid-registry = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```
//!
//! ```
//! use grid_registry::prelude::*;
//!
//! let mut reg = Registry::new(RegistryConfig::default());
//! let ocn = reg.add_component("cpl@ocn", None, NoComm);
//! let spec = H2dGridSpec::new(
//!     "LON_LAT",
//!     "degrees",
//!     true,
//!     H2dDims::Rectangular { lon_size: 4, lat_size: 2 },
//!     vec![0.0, 90.0, 180.0, 270.0],
//!     vec![-45.0, 45.0],
//! );
//! let grid = reg.register_h2d_grid_via_global_data(ocn, "ocn_grid", &spec, "example").unwrap();
//! let decomp = reg.register_default_parallel_decomp(grid, ocn, "example").unwrap();
//! assert_eq!(reg.decomp(decomp).unwrap().num_local_cells(), 8);
//! ```

pub mod algs;
pub mod component;
pub mod config;
pub mod debug_invariants;
pub mod decomp;
pub mod geometry;
pub mod grid;
pub mod handle;
pub mod registry;
pub mod registry_error;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::component::ComponentId;
    pub use crate::config::RegistryConfig;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::decomp::{CELL_INDEX_NULL, Decomposition, IoDecomposition, IoLayout};
    pub use crate::geometry::{Bounds, CoordLabel, CoordUnit, EdgeType, Geometry, GeometryRef, VerticalCoord};
    pub use crate::grid::{
        BottomVariation, FileRendezvous, Grid, GridOptions, GridRendezvous, H2dDims, H2dGridSpec, LevelVariation,
        LocalH2dSpec, MailboxRendezvous,
    };
    pub use crate::handle::{DecompId, FieldId, GridId};
    pub use crate::registry::Registry;
    pub use crate::registry_error::{ErrorClass, RegistryError};
}
