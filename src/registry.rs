//! The registry context.
//!
//! One `Registry` per process holds every catalogue the grid and
//! decomposition operations touch. Operations are implemented as methods in
//! the `grid` and `decomp` modules; this file only owns the state and the
//! error-reporting policy.

use crate::algs::collective::{ReduceOp, allreduce_i64};
use crate::algs::communicator::Communicator;
use crate::component::{Component, ComponentId, ComponentTable};
use crate::config::RegistryConfig;
use crate::debug_invariants::DebugInvariants;
use crate::decomp::catalogue::DecompCatalogue;
use crate::grid::catalogue::GridCatalogue;
use crate::handle::GridId;
use crate::registry_error::{Diagnostics, RegistryError};
use hashbrown::HashMap;

pub struct Registry<C: Communicator> {
    pub(crate) config: RegistryConfig,
    pub(crate) components: ComponentTable<C>,
    pub(crate) grids: GridCatalogue,
    pub(crate) decomps: DecompCatalogue,
    pub(crate) diagnostics: Diagnostics,
    /// Set-level grid per (set component, member grid).
    pub(crate) promotions: HashMap<(ComponentId, GridId), GridId>,
}

impl<C: Communicator> Registry<C> {
    pub fn new(config: RegistryConfig) -> Self {
        Registry {
            config,
            components: ComponentTable::default(),
            grids: GridCatalogue::default(),
            decomps: DecompCatalogue::default(),
            diagnostics: Diagnostics::default(),
            promotions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a component this process belongs to.
    pub fn add_component(&mut self, full_name: &str, parent: Option<ComponentId>, comm: C) -> ComponentId {
        self.components.add(full_name, parent, Some(comm))
    }

    /// Record a component this process is not part of.
    pub fn add_foreign_component(&mut self, full_name: &str, parent: Option<ComponentId>) -> ComponentId {
        self.components.add(full_name, parent, None)
    }

    pub fn component(&self, id: ComponentId) -> Result<&Component<C>, RegistryError> {
        self.components.get(id)
    }

    pub fn component_by_name(&self, full_name: &str) -> Option<ComponentId> {
        self.components.by_name(full_name)
    }

    pub fn grids(&self) -> &GridCatalogue {
        &self.grids
    }

    pub fn decomps(&self) -> &DecompCatalogue {
        &self.decomps
    }

    /// User errors recorded in tolerant mode.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<RegistryError> {
        self.diagnostics.drain()
    }

    /// Apply the tolerance policy: in tolerant mode a user error is logged
    /// and recorded and the caller continues; otherwise it is returned.
    pub(crate) fn report(&mut self, err: RegistryError) -> Result<(), RegistryError> {
        if self.config.tolerant && !err.is_internal() {
            log::warn!("{err}");
            self.diagnostics.push(err);
            Ok(())
        } else {
            Err(err)
        }
    }

    pub(crate) fn report_all(&mut self, errs: Vec<RegistryError>) -> Result<(), RegistryError> {
        for err in errs {
            self.report(err)?;
        }
        Ok(())
    }
}

impl<C: Communicator> DebugInvariants for Registry<C> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Registry invalid");
    }

    fn validate_invariants(&self) -> Result<(), RegistryError> {
        self.grids.validate_invariants()?;
        self.decomps.validate_invariants()?;
        for d in self.decomps.iter() {
            self.grids.get(d.grid())?;
        }
        for (&(set_comp, member), &promoted) in &self.promotions {
            let g = self.grids.get(promoted)?;
            if g.comp() != set_comp || g.ensemble_member() != Some(member) {
                return Err(RegistryError::Internal(format!(
                    "promotion of {member} to {promoted} is not linked"
                )));
            }
        }
        Ok(())
    }
}

/// Collective: make a rank-local outcome the group's outcome. If any rank
/// failed, ranks that succeeded get [`RegistryError::PeerFailed`].
pub(crate) fn agree<C: Communicator, T>(
    comm: &C,
    step: &str,
    local: Result<T, RegistryError>,
) -> Result<T, RegistryError> {
    let failed = allreduce_i64(comm, local.is_err() as i64, ReduceOp::Max)?;
    match local {
        Err(e) => Err(e),
        Ok(_) if failed != 0 => Err(RegistryError::PeerFailed { step: step.to_string() }),
        ok => ok,
    }
}
