//! Promotion of an ensemble member's grid to the set component that groups
//! all members.

use crate::algs::checksum::H2dChecksums;
use crate::algs::collective::{allgather_bytes, allgather_pod, barrier, broadcast_value};
use crate::algs::communicator::Communicator;
use crate::component::ComponentId;
use crate::geometry::GeometryRef;
use crate::grid::register::GridOptions;
use crate::handle::GridId;
use crate::registry::{Registry, agree};
use crate::registry_error::RegistryError;
use std::sync::Arc;

/// Steps of the one-time handshake run on the set's process group.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PromotionStage {
    /// Find the set rank of every member's root process.
    Discover,
    /// Tell every process the full name of every member.
    BroadcastMembership,
    /// Register the grid for members this process does not run.
    EnsureRegistered,
    /// Check the members agree on the horizontal grid and decompose it
    /// over the whole set.
    BuildSharedDecomp,
    Done,
}

const NOT_A_ROOT: u64 = u64::MAX;

/// What the handshake learns along the way.
struct Handshake {
    set_grid: GridId,
    member_grid: GridId,
    member_comp: ComponentId,
    grid_name: String,
    geometry: GeometryRef,
    roots: Vec<usize>,
    members: Vec<String>,
}

impl<C: Communicator> Registry<C> {
    /// The grid of `set_comp` mirroring `member_grid`, which belongs to a
    /// child of `set_comp`. Collective over `set_comp` until a promotion of
    /// the grid completes; later calls return the cached handle without
    /// communicating.
    pub fn promote_ensemble_member_grid_to_set(
        &mut self,
        set_comp: ComponentId,
        member_grid: GridId,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        if let Some(&id) = self.promotions.get(&(set_comp, member_grid)) {
            return Ok(id);
        }
        let set_comm = self.components.shared_comm(set_comp)?;
        let mut linked = Vec::new();
        let mirrored = self.mirror_member_grid(set_comp, member_grid, &mut linked, annotation);
        let set_grid = agree(&*set_comm, "ensemble promotion", mirrored)?;

        let member = self.grids.get(member_grid)?;
        let mut hs = Handshake {
            set_grid,
            member_grid,
            member_comp: member.comp(),
            grid_name: member.name().to_string(),
            geometry: Arc::clone(member.geometry()?),
            roots: Vec::new(),
            members: Vec::new(),
        };
        let mut stage = PromotionStage::Discover;
        while stage != PromotionStage::Done {
            log::debug!("promoting \"{}\" to {set_grid}: {stage:?}", hs.grid_name);
            stage = match stage {
                PromotionStage::Discover => {
                    self.discover_member_roots(&*set_comm, &mut hs)?;
                    PromotionStage::BroadcastMembership
                }
                PromotionStage::BroadcastMembership => {
                    self.broadcast_membership(&*set_comm, &mut hs)?;
                    PromotionStage::EnsureRegistered
                }
                PromotionStage::EnsureRegistered => {
                    let local = self.register_for_foreign_members(set_comp, &hs, annotation);
                    agree(&*set_comm, "ensemble member registration", local)?;
                    PromotionStage::BuildSharedDecomp
                }
                PromotionStage::BuildSharedDecomp => {
                    self.build_shared_decomp(set_comp, &*set_comm, &hs, annotation)?;
                    PromotionStage::Done
                }
                PromotionStage::Done => PromotionStage::Done,
            };
        }
        // only a completed handshake is remembered, so a failed one is rerun
        for (member, set) in linked.clone() {
            linked.push((member, set));
        }
        Ok(set_grid)
    }

    /// Register the member's geometry under `set_comp` and link the copies.
    fn mirror_member_grid(
        &mut self,
        set_comp: ComponentId,
        member_grid: GridId,
        linked: &mut Vec<(GridId, GridId)>,
        annotation: &str,
    ) -> Result<GridId, RegistryError> {
        let member = self.grids.get(member_grid)?;
        let member_comp = member.comp();
        if !self.components.is_child(set_comp, member_comp) {
            return Err(RegistryError::Composition {
                grid: member.name().to_string(),
                detail: format!(
                    "\"{}\" is not a member of \"{}\"",
                    self.components.full_name(member_comp)?,
                    self.components.full_name(set_comp)?
                ),
                annotation: annotation.to_string(),
            });
        }
        let name = member.name().to_string();
        let geometry = Arc::clone(member.geometry()?);
        let set_grid = self.register_grid(set_comp, &name, geometry, GridOptions::default(), annotation)?;
        self.link_promoted(member_grid, set_grid, linked)?;
        Ok(set_grid)
    }

    /// Copy the late-bound state of `member` onto `set` and recurse into
    /// sub-grids with the same geometry. Every linked pair is appended to
    /// `linked`.
    fn link_promoted(
        &mut self,
        member: GridId,
        set: GridId,
        linked: &mut Vec<(GridId, GridId)>,
    ) -> Result<(), RegistryError> {
        let m = self.grids.get(member)?;
        let sums = m.checksums();
        let used_in_md = m.used_in_md();
        let bottom = m.bottom_field().cloned();
        let level = m.level_field().cloned();
        let member_subs = m
            .sub_grids()
            .iter()
            .map(|&s| Ok((s, self.grids.get(s)?.geometry_key())))
            .collect::<Result<Vec<_>, RegistryError>>()?;
        let set_subs = self.grids.get(set)?.sub_grids().to_vec();

        let g = self.grids.get_mut(set)?;
        g.ensemble_member = Some(member);
        g.used_in_md |= used_in_md;
        if g.bottom_field.is_none() {
            g.bottom_field = bottom;
        }
        if g.level_field.is_none() {
            g.level_field = level;
        }
        if let Some(sums) = sums {
            if g.checksums().is_none() {
                g.commit_checksums(sums)?;
            }
        }
        linked.push((member, set));

        for (member_sub, key) in member_subs {
            let mut matching = None;
            for &s in &set_subs {
                if self.grids.get(s)?.geometry_key() == key {
                    matching = Some(s);
                    break;
                }
            }
            if let Some(set_sub) = matching {
                self.link_promoted(member_sub, set_sub, linked)?;
            }
        }
        Ok(())
    }

    fn discover_member_roots(&self, set_comm: &C, hs: &mut Handshake) -> Result<(), RegistryError> {
        let is_root = self.components.comm(hs.member_comp)?.rank() == 0;
        let mine = if is_root { set_comm.rank() as u64 } else { NOT_A_ROOT };
        hs.roots = allgather_pod(set_comm, &[mine])?
            .into_iter()
            .filter(|&r| r != NOT_A_ROOT)
            .map(|r| r as usize)
            .collect();
        if hs.roots.is_empty() {
            return Err(RegistryError::Internal(format!(
                "no member of the ensemble owning \"{}\" has a root process",
                hs.grid_name
            )));
        }
        Ok(())
    }

    fn broadcast_membership(&self, set_comm: &C, hs: &mut Handshake) -> Result<(), RegistryError> {
        let is_root = self.components.comm(hs.member_comp)?.rank() == 0;
        let name = self.components.full_name(hs.member_comp)?;
        let payload = if is_root { name.as_bytes() } else { &[][..] };
        let all = allgather_bytes(set_comm, payload)?;
        hs.members = hs
            .roots
            .iter()
            .map(|&r| {
                let bytes = all.get(r).cloned().unwrap_or_default();
                String::from_utf8(bytes).map_err(|e| RegistryError::Comm(format!("member name: {e}")))
            })
            .collect::<Result<_, _>>()?;
        log::info!("ensemble of \"{}\" has {} members", hs.grid_name, hs.members.len());
        Ok(())
    }

    fn register_for_foreign_members(
        &mut self,
        set_comp: ComponentId,
        hs: &Handshake,
        annotation: &str,
    ) -> Result<(), RegistryError> {
        let own = self.components.full_name(hs.member_comp)?.to_string();
        for name in hs.members.iter().filter(|n| **n != own) {
            let comp = self.add_foreign_component(name, Some(set_comp));
            self.register_grid(comp, &hs.grid_name, Arc::clone(&hs.geometry), GridOptions::default(), annotation)?;
        }
        Ok(())
    }

    fn build_shared_decomp(
        &mut self,
        set_comp: ComponentId,
        set_comm: &C,
        hs: &Handshake,
        annotation: &str,
    ) -> Result<(), RegistryError> {
        let Some(set_h2d) = self.h2d_sub_grid(hs.set_grid)? else {
            return Ok(());
        };
        let local = self.h2d_sub_grid(hs.member_grid).and_then(|h| {
            let h = h.ok_or_else(|| RegistryError::Internal(format!("member grid \"{}\" lost its H2D", hs.grid_name)))?;
            let sums = self
                .ensure_checksums(h)?
                .ok_or_else(|| RegistryError::Internal(format!("no checksums for \"{}\"", hs.grid_name)))?;
            Ok((self.grids.get(h)?.size() as u64, sums))
        });
        let local = agree(set_comm, "ensemble checksums", local)?;

        let source = hs.roots[0];
        let first: (u64, H2dChecksums) = broadcast_value(set_comm, source, (set_comm.rank() == source).then_some(&local))?;
        let compared = match first_difference(local, first) {
            None => Ok(()),
            Some((which, mine, theirs)) => Err(RegistryError::ChecksumMismatch {
                grid: hs.grid_name.clone(),
                which,
                local: mine,
                remote: theirs,
            }),
        };
        agree(set_comm, "ensemble grid comparison", compared)?;

        let g = self.grids.get(set_h2d)?;
        if g.checksums().is_none() {
            g.commit_checksums(first.1)?;
        }
        let decomp = self.register_default_parallel_decomp(set_h2d, set_comp, annotation)?;
        self.grids.get_mut(hs.set_grid)?.shared_decomp = Some(decomp);
        self.grids.get_mut(set_h2d)?.shared_decomp = Some(decomp);
        barrier(set_comm)
    }
}

fn first_difference(a: (u64, H2dChecksums), b: (u64, H2dChecksums)) -> Option<(&'static str, u64, u64)> {
    [
        ("grid_size", a.0, b.0),
        ("mask", a.1.mask, b.1.mask),
        ("center_lon", a.1.center_lon, b.1.center_lon),
        ("center_lat", a.1.center_lat, b.1.center_lat),
    ]
    .into_iter()
    .find(|(_, x, y)| x != y)
}
