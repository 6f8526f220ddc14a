//! Generic advertise-and-bind layer shared by every protocol extension
//!
//! A [`Global`] is one advertised capability together with the resources
//! clients bound through it. Extensions keep their model state next to the
//! global and implement `GlobalDispatch`/`Dispatch` for
//! [`ServerState`](crate::state::ServerState); this module only deals with
//! the binding collections and with tearing a global down in the order
//! clients require:
//!
//! 1. notify every live resource that it is going away and disable the
//!    global, which sends `wl_registry.global_remove`
//! 2. flush, so both notifications are on the wire
//! 3. drop all resources from server bookkeeping
//! 4. destroy the global

use std::collections::HashSet;

use log::{debug, warn};
use wayland_server::backend::{ClientId, GlobalId, ObjectId};
use wayland_server::{DisplayHandle, GlobalDispatch, Resource};

/// Bound resources of one interface, in bind order
#[derive(Debug)]
pub struct ResourceSet<I> {
    resources: Vec<I>,
}

impl<I> Default for ResourceSet<I> {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
        }
    }
}

impl<I: Resource> ResourceSet<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource: I) {
        self.resources.push(resource);
    }

    /// Remove a resource by object id, returning whether it was present
    pub fn remove(&mut self, resource: &I) -> bool {
        let id = resource.id();
        let before = self.resources.len();
        self.resources.retain(|r| r.id() != id);
        before != self.resources.len()
    }

    pub fn contains(&self, resource: &I) -> bool {
        let id = resource.id();
        self.resources.iter().any(|r| r.id() == id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &I> {
        self.resources.iter()
    }

    /// Resources owned by one client
    pub fn for_client<'a>(&'a self, client: &'a ClientId) -> impl Iterator<Item = &'a I> + 'a {
        self.resources
            .iter()
            .filter(move |r| r.client().map(|c| c.id()).as_ref() == Some(client))
    }

    /// Invoke `send` once per bound resource
    pub fn broadcast(&self, mut send: impl FnMut(&I)) {
        for resource in &self.resources {
            send(resource);
        }
    }

    /// Drop resources whose object id is in `objects`
    pub fn purge(&mut self, objects: &HashSet<ObjectId>) {
        self.resources.retain(|r| !objects.contains(&r.id()));
    }

    pub fn clear(&mut self) -> Vec<I> {
        std::mem::take(&mut self.resources)
    }
}

/// One advertised capability and the resources bound to it
#[derive(Debug)]
pub struct Global<I> {
    id: GlobalId,
    version: u32,
    bindings: ResourceSet<I>,
}

impl<I: Resource + 'static> Global<I> {
    /// Advertise `I` at `version` to every client of `dh`
    pub fn new<D, U>(dh: &DisplayHandle, version: u32, data: U) -> Self
    where
        D: GlobalDispatch<I, U> + 'static,
        U: Send + Sync + 'static,
    {
        let id = dh.create_global::<D, I, U>(version, data);
        debug!("Global {} v{} advertised", I::interface().name, version);
        Self {
            id,
            version,
            bindings: ResourceSet::new(),
        }
    }

    pub fn id(&self) -> &GlobalId {
        &self.id
    }

    /// Highest version the server supports for this global
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn bindings(&self) -> &ResourceSet<I> {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut ResourceSet<I> {
        &mut self.bindings
    }

    pub fn bind(&mut self, resource: I) {
        self.bindings.insert(resource);
    }

    pub fn unbind(&mut self, resource: &I) -> bool {
        self.bindings.remove(resource)
    }

    /// Tear the global down, calling `notify` on every bound resource first.
    pub fn remove<D: 'static>(mut self, dh: &DisplayHandle, notify: impl FnMut(&I)) {
        self.bindings.broadcast(notify);
        dh.disable_global::<D>(self.id.clone());

        let mut dh = dh.clone();
        if let Err(e) = dh.flush_clients() {
            warn!(
                "Failed to flush removal of {}: {}",
                I::interface().name,
                e
            );
        }

        let dropped = self.bindings.clear();
        dh.remove_global::<D>(self.id);
        debug!(
            "Global {} removed, {} bindings dropped",
            I::interface().name,
            dropped.len()
        );
    }
}
