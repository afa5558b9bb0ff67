//! Components known to this process.
//!
//! A component is a named process group. The process-group handle is present
//! only for components this process belongs to; components discovered from
//! other processes (for example sibling ensemble members) are recorded by
//! name alone.

use crate::algs::communicator::Communicator;
use crate::registry_error::RegistryError;
use hashbrown::HashMap;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ComponentId(u32);

impl ComponentId {
    pub(crate) fn from_index(index: usize) -> Self {
        ComponentId(index as u32)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
pub struct Component<C> {
    id: ComponentId,
    full_name: String,
    parent: Option<ComponentId>,
    comm: Option<Arc<C>>,
}

impl<C> Component<C> {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Hierarchical name, unique across the coupled run.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    pub fn comm(&self) -> Option<&C> {
        self.comm.as_deref()
    }

    pub fn is_local(&self) -> bool {
        self.comm.is_some()
    }
}

#[derive(Debug)]
pub struct ComponentTable<C> {
    comps: Vec<Component<C>>,
    by_name: HashMap<String, ComponentId>,
}

impl<C> Default for ComponentTable<C> {
    fn default() -> Self {
        Self {
            comps: Vec::new(),
            by_name: HashMap::new(),
        }
    }
}

impl<C: Communicator> ComponentTable<C> {
    /// Add a component; a known name returns the existing id, adopting `comm`
    /// if the component was previously foreign.
    pub fn add(&mut self, full_name: &str, parent: Option<ComponentId>, comm: Option<C>) -> ComponentId {
        if let Some(&id) = self.by_name.get(full_name) {
            let comp = &mut self.comps[id.0 as usize];
            if comp.comm.is_none() {
                comp.comm = comm.map(Arc::new);
            }
            return id;
        }
        let id = ComponentId::from_index(self.comps.len());
        self.comps.push(Component {
            id,
            full_name: full_name.to_string(),
            parent,
            comm: comm.map(Arc::new),
        });
        self.by_name.insert(full_name.to_string(), id);
        id
    }

    pub fn get(&self, id: ComponentId) -> Result<&Component<C>, RegistryError> {
        self.comps
            .get(id.0 as usize)
            .ok_or(RegistryError::UnknownComponent(id.0))
    }

    pub fn by_name(&self, full_name: &str) -> Option<ComponentId> {
        self.by_name.get(full_name).copied()
    }

    pub fn full_name(&self, id: ComponentId) -> Result<&str, RegistryError> {
        self.get(id).map(|c| c.full_name())
    }

    /// The process group of a component this process belongs to.
    pub fn comm(&self, id: ComponentId) -> Result<&C, RegistryError> {
        let comp = self.get(id)?;
        comp.comm()
            .ok_or_else(|| RegistryError::NotAMember(comp.full_name.clone()))
    }

    /// Shared handle to the process group, for callers that also mutate the registry.
    pub fn shared_comm(&self, id: ComponentId) -> Result<Arc<C>, RegistryError> {
        let comp = self.get(id)?;
        comp.comm
            .clone()
            .ok_or_else(|| RegistryError::NotAMember(comp.full_name.clone()))
    }

    /// Is `child` a direct child of `parent`?
    pub fn is_child(&self, parent: ComponentId, child: ComponentId) -> bool {
        self.get(child).is_ok_and(|c| c.parent == Some(parent))
    }

    pub fn len(&self) -> usize {
        self.comps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comps.is_empty()
    }
}
