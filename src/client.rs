//! Per-client bookkeeping above the wire transport
//!
//! Every connected process gets a [`ClientConnection`] that records which
//! protocol objects it owns. Connections are created when a stream is
//! accepted or, for clients inserted behind our back, lazily on the first
//! bind. The transport reports hang-ups through [`ClientState`], which only
//! queues the client id; the dispatch thread reaps the queue after each
//! dispatch so model state is never touched off-thread.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use wayland_server::backend::{ClientData, ClientId, DisconnectReason, ObjectId};
use wayland_server::{Client, DataInit, Dispatch, New, Resource};

use crate::state::ServerEvent;

/// Default cap on live protocol objects per client
pub const DEFAULT_MAX_RESOURCES_PER_CLIENT: usize = 8192;

/// `wl_display.error.no_memory`
pub const NO_MEMORY: u32 = 2;

/// Client ids whose transport closed but have not been reaped yet
pub type DisconnectQueue = Arc<Mutex<Vec<ClientId>>>;

/// Objects the server stopped serving that the client has no request to
/// destroy; they no longer count against its quota
pub type ReleaseQueue = Arc<Mutex<Vec<(ClientId, ObjectId)>>>;

/// Data attached to every client inserted into the wayland display
#[derive(Debug)]
pub struct ClientState {
    disconnects: DisconnectQueue,
}

impl ClientState {
    pub fn new(disconnects: DisconnectQueue) -> Self {
        Self { disconnects }
    }
}

impl ClientData for ClientState {
    fn initialized(&self, client_id: ClientId) {
        debug!("Client {:?} initialized", client_id);
    }

    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        debug!("Client {:?} disconnected: {:?}", client_id, reason);
        self.disconnects.lock().push(client_id);
    }
}

/// Server-side view of one connected client
#[derive(Debug)]
pub struct ClientConnection {
    id: ClientId,
    resources: HashSet<ObjectId>,
    disconnected: bool,
}

impl ClientConnection {
    fn new(id: ClientId) -> Self {
        Self {
            id,
            resources: HashSet::new(),
            disconnected: false,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Number of live protocol objects created through our globals
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn owns(&self, object: &ObjectId) -> bool {
        self.resources.contains(object)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

/// Live client connections keyed by transport client id
#[derive(Debug)]
pub struct ClientRegistry {
    connections: HashMap<ClientId, ClientConnection>,
    disconnects: DisconnectQueue,
    released: ReleaseQueue,
    max_resources: usize,
}

impl ClientRegistry {
    pub fn new(max_resources: usize) -> Self {
        Self {
            connections: HashMap::new(),
            disconnects: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(Mutex::new(Vec::new())),
            max_resources,
        }
    }

    /// Fresh transport-side client data sharing this registry's disconnect queue
    pub fn client_data(&self) -> Arc<ClientState> {
        Arc::new(ClientState::new(self.disconnects.clone()))
    }

    /// Queue shared with models that drop bindings on the server side
    pub fn release_queue(&self) -> ReleaseQueue {
        self.released.clone()
    }

    /// Return the connection for `id`, creating it on first contact
    pub fn get_connection(
        &mut self,
        id: &ClientId,
        events: &mut Vec<ServerEvent>,
    ) -> &mut ClientConnection {
        self.connections.entry(id.clone()).or_insert_with(|| {
            info!("🔌 Client {:?} connected", id);
            events.push(ServerEvent::ClientConnected(id.clone()));
            ClientConnection::new(id.clone())
        })
    }

    pub fn connection(&self, id: &ClientId) -> Option<&ClientConnection> {
        self.connections.get(id)
    }

    /// Every live connection, in no particular order
    pub fn connections(&self) -> impl Iterator<Item = &ClientConnection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn max_resources(&self) -> usize {
        self.max_resources
    }

    /// Initialise an object created by binding a global.
    ///
    /// When the client already owns `max_resources` objects the new object is
    /// handed `no_memory` and `None` is returned; it is never recorded.
    pub fn init_resource<D, I, U>(
        &mut self,
        client: &Client,
        resource: New<I>,
        data: U,
        data_init: &mut DataInit<'_, D>,
        events: &mut Vec<ServerEvent>,
    ) -> Option<I>
    where
        D: Dispatch<I, U> + 'static,
        I: Resource + 'static,
        U: Send + Sync + 'static,
    {
        let object = data_init.init(resource, data);
        match self.over_quota::<I>(client, events) {
            Some(message) => {
                object.post_error(NO_MEMORY, message);
                None
            }
            None => {
                self.record(client, &object, events);
                Some(object)
            }
        }
    }

    /// Initialise an object created by a request on `parent`.
    ///
    /// Over quota, `no_memory` is posted on `parent`, whose interface has no
    /// error codes of its own.
    pub fn init_child<D, I, U, P>(
        &mut self,
        client: &Client,
        parent: &P,
        resource: New<I>,
        data: U,
        data_init: &mut DataInit<'_, D>,
        events: &mut Vec<ServerEvent>,
    ) -> Option<I>
    where
        D: Dispatch<I, U> + 'static,
        I: Resource + 'static,
        U: Send + Sync + 'static,
        P: Resource,
    {
        // The backend requires data on every new object, even a refused one
        let object = data_init.init(resource, data);
        match self.over_quota::<I>(client, events) {
            Some(message) => {
                parent.post_error(NO_MEMORY, message);
                None
            }
            None => {
                self.record(client, &object, events);
                Some(object)
            }
        }
    }

    fn over_quota<I: Resource>(
        &mut self,
        client: &Client,
        events: &mut Vec<ServerEvent>,
    ) -> Option<String> {
        self.drain_released();
        let max = self.max_resources;
        let connection = self.get_connection(&client.id(), events);
        if connection.resources.len() < max {
            return None;
        }
        warn!(
            "Client {:?} exceeded {} resources, refusing {}",
            connection.id,
            max,
            I::interface().name
        );
        Some(format!("too many objects, limit is {}", max))
    }

    fn record<I: Resource>(&mut self, client: &Client, object: &I, events: &mut Vec<ServerEvent>) {
        self.get_connection(&client.id(), events)
            .resources
            .insert(object.id());
    }

    /// Drop a destroyed object from its owner's bookkeeping
    pub fn forget(&mut self, client: &ClientId, object: &ObjectId) {
        if let Some(connection) = self.connections.get_mut(client) {
            connection.resources.remove(object);
        }
    }

    /// Forget every object queued on the release queue
    pub fn drain_released(&mut self) {
        let released: Vec<(ClientId, ObjectId)> = std::mem::take(&mut *self.released.lock());
        for (client, object) in released {
            self.forget(&client, &object);
        }
    }

    /// Remove every connection whose transport has closed.
    ///
    /// Returns the reaped ids together with any objects the transport did not
    /// report as destroyed, so callers can purge them from model collections.
    pub fn reap_disconnected(
        &mut self,
        events: &mut Vec<ServerEvent>,
    ) -> Vec<(ClientId, HashSet<ObjectId>)> {
        self.drain_released();
        let pending: Vec<ClientId> = std::mem::take(&mut *self.disconnects.lock());
        let mut reaped = Vec::with_capacity(pending.len());

        for id in pending {
            let Some(mut connection) = self.connections.remove(&id) else {
                continue;
            };
            connection.disconnected = true;
            if !connection.resources.is_empty() {
                warn!(
                    "Client {:?} left {} objects behind, purging",
                    id,
                    connection.resources.len()
                );
            }
            info!("👋 Client {:?} disconnected", id);
            events.push(ServerEvent::ClientDisconnected(id.clone()));
            reaped.push((id, connection.resources));
        }

        reaped
    }

    /// Drop every connection without reporting disconnects
    pub fn clear(&mut self) {
        self.connections.clear();
        self.disconnects.lock().clear();
        self.released.lock().clear();
    }
}
