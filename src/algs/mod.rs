//! Communication backends, collectives and the distributed algorithms the
//! registries are built on.

pub mod blocks;
pub mod checksum;
pub mod collective;
pub mod communicator;
pub mod redistribute;
pub mod wire;

pub use checksum::H2dChecksums;
pub use collective::ReduceOp;
pub use redistribute::{DuplicateKey, find_duplicate_key};
