//! Structural equality of grids across components.

use crate::algs::communicator::Communicator;
use crate::geometry::VerticalCoord;
use crate::grid::roles::Role;
use crate::handle::GridId;
use crate::registry::Registry;
use crate::registry_error::RegistryError;

fn bits_eq(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

/// Explicit levels equal when unit and values match. Sigma and hybrid
/// coordinates never equal, unless `similar` asks for a plain comparison of
/// their kind and coefficients.
fn same_vertical(a: &VerticalCoord, b: &VerticalCoord, similar: bool) -> bool {
    use VerticalCoord::*;
    match (a, b) {
        (Levels { unit: ua, values: va }, Levels { unit: ub, values: vb }) => ua == ub && bits_eq(va, vb),
        (Sigma { top: ta, sigma: sa }, Sigma { top: tb, sigma: sb }) if similar => {
            ta.to_bits() == tb.to_bits() && bits_eq(sa, sb)
        }
        (
            Hybrid { top: ta, coef_a: aa, coef_b: ba },
            Hybrid { top: tb, coef_a: ab, coef_b: bb },
        ) if similar => ta.to_bits() == tb.to_bits() && bits_eq(aa, ab) && bits_eq(ba, bb),
        _ => false,
    }
}

impl<C: Communicator> Registry<C> {
    /// Do `a` and `b` describe the same physical grid?
    ///
    /// Role positions must match first. Horizontal parts compare by
    /// checksum, vertical parts by unit and exact level values; sigma and
    /// hybrid coordinates only equal themselves. Tracer parts compare by size
    /// and time parts always match. May compute missing checksums, which is
    /// collective for grids with distributed coordinates.
    pub fn is_the_same_as_another_grid(&mut self, a: GridId, b: GridId) -> Result<bool, RegistryError> {
        self.compare_grids(a, b, false)
    }

    /// Like [`is_the_same_as_another_grid`](Self::is_the_same_as_another_grid),
    /// but sigma and hybrid parts match when their coefficients do. Two
    /// such grids share a structure even though their levels depend on
    /// different surfaces.
    pub fn is_similar_grid_with(&mut self, a: GridId, b: GridId) -> Result<bool, RegistryError> {
        self.compare_grids(a, b, true)
    }

    fn compare_grids(&mut self, a: GridId, b: GridId, similar: bool) -> Result<bool, RegistryError> {
        if a == b {
            return Ok(true);
        }
        let (ga, gb) = (self.grids.get(a)?, self.grids.get(b)?);
        if ga.roles().positions() != gb.roles().positions() {
            return Ok(false);
        }
        if ga.geometry_key() == gb.geometry_key() {
            return Ok(true);
        }
        for role in Role::ALL {
            let (Some(ra), Some(rb)) = (ga.roles().get(role), gb.roles().get(role)) else {
                continue;
            };
            let equal = match role {
                Role::H2D => ra.size == rb.size,
                Role::V1D => match (ga.vertical_coord(), gb.vertical_coord()) {
                    (Some(va), Some(vb)) => same_vertical(va, vb, similar),
                    _ => false,
                },
                Role::Tracer1D => ra.size == rb.size,
                Role::Time1D => true,
            };
            if !equal {
                return Ok(false);
            }
        }
        if ga.roles().has(Role::H2D) {
            let sums_a = self.ensure_checksums(a)?;
            let sums_b = self.ensure_checksums(b)?;
            if sums_a.is_none() || sums_a != sums_b {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
