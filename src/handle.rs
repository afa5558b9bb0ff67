//! Strongly typed catalogue handles.
//!
//! `GridId` and `DecompId` are dense indices into their catalogue. They are
//! distinct types, so a decomposition handle can never be passed where a grid
//! handle is expected. For callers that must store handles as plain integers,
//! `raw()` produces an opaque value carrying a per-kind prefix, and
//! `from_raw()` rejects values of the wrong kind.

use crate::registry_error::RegistryError;
use std::fmt;

/// Prefix carried by raw grid handles.
pub const GRID_ID_PREFIX: u64 = 0x1000_0000;
/// Prefix carried by raw decomposition handles.
pub const DECOMP_ID_PREFIX: u64 = 0x2000_0000;
/// Bits holding the catalogue index.
pub const ID_SUFFIX_MASK: u64 = 0x0FFF_FFFF;
const ID_PREFIX_MASK: u64 = !ID_SUFFIX_MASK;

macro_rules! catalogue_handle {
    ($name:ident, $prefix:expr, $label:literal) => {
        #[derive(
            Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Handle of catalogue position `index`, which must fit the
            /// raw suffix bits.
            pub(crate) fn from_index(index: usize) -> Result<Self, RegistryError> {
                match u32::try_from(index) {
                    Ok(i) if u64::from(i) <= ID_SUFFIX_MASK => Ok($name(i)),
                    _ => Err(RegistryError::Internal(format!(
                        "{} catalogue is full at index {index}",
                        $label
                    ))),
                }
            }

            /// Position in the catalogue.
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Opaque integer form.
            #[inline]
            pub const fn raw(self) -> u64 {
                $prefix | self.0 as u64
            }

            /// Decode an opaque integer. Only the prefix is checked here; the
            /// registry checks that the index is in range.
            pub fn from_raw(raw: u64) -> Option<Self> {
                if raw & ID_PREFIX_MASK != $prefix {
                    return None;
                }
                Some($name((raw & ID_SUFFIX_MASK) as u32))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple($label).field(&self.0).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.raw())
            }
        }
    };
}

catalogue_handle!(GridId, GRID_ID_PREFIX, "GridId");
catalogue_handle!(DecompId, DECOMP_ID_PREFIX, "DecompId");

/// Opaque id of a field instance managed outside the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FieldId(pub u32);

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(GridId, u32);
    assert_eq_size!(DecompId, u32);
}
