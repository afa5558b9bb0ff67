//! Fixed little-endian wire records for the collective protocols.

use crate::registry_error::RegistryError;
use bytemuck::{Pod, Zeroable};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Decode a received byte buffer into records. Received buffers carry no
/// alignment guarantee, so every record is copied out.
pub fn decode_vec<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, RegistryError> {
    let size = std::mem::size_of::<T>();
    if size == 0 || bytes.len() % size != 0 {
        return Err(RegistryError::Comm(format!(
            "payload of {} bytes is not a whole number of {size}-byte records",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect())
}

/// A `(key, value)` pair as redistributed by the ownership check.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WirePair {
    pub key_le: u64,
    pub value_le: u64,
}

impl WirePair {
    pub fn new(key: u64, value: u64) -> Self {
        Self {
            key_le: key.to_le(),
            value_le: value.to_le(),
        }
    }
    pub fn key(&self) -> u64 {
        u64::from_le(self.key_le)
    }
    pub fn value(&self) -> u64 {
        u64::from_le(self.value_le)
    }
}
