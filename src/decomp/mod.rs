//! Parallel decomposition registry: which process holds which cells of an
//! H2D grid.

pub mod catalogue;
pub mod derived;
pub mod entity;
pub mod io;
pub mod register;

pub use catalogue::DecompCatalogue;
pub use entity::{CELL_INDEX_NULL, Chunks, Decomposition};
pub use io::{IoDecomposition, IoLayout};
