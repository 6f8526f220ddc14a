//! Virtual desktop grid: `org_kde_plasma_virtual_desktop_management`
//!
//! Desktops are kept in an id-keyed map plus an order vector that drives
//! layout. Positions follow a row-major grid whose column count is derived
//! from the desktop count:
//!
//! - creating a desktop appends it at the next free slot
//! - removing one closes the gap with a full re-sort
//! - repositioning one re-sorts the others around the requested cell
//! - at most one desktop is active at any time
//!
//! Every desktop binding is told about its own changes; the manager's
//! bindings see additions, removals and the grid dimensions.

pub mod layout;

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};
use wayland_server::backend::{ClientId, ObjectId};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource};

use crate::client::ReleaseQueue;
use crate::global::{Global, ResourceSet};
use crate::protocol::org_kde_plasma_virtual_desktop::{self, OrgKdePlasmaVirtualDesktop};
use crate::protocol::org_kde_plasma_virtual_desktop_management::{
    self, OrgKdePlasmaVirtualDesktopManagement,
};
use crate::state::{ServerEvent, ServerState};

use self::layout::Cell;

/// Highest `org_kde_plasma_virtual_desktop_management` version we implement
pub const VIRTUAL_DESKTOP_MANAGEMENT_VERSION: u32 = 1;

/// User data of a desktop resource, a non-owning reference by id.
///
/// Ids can be reused after a removal, so the generation pins the binding to
/// the desktop it was created for. Generation 0 never matches a desktop.
#[derive(Debug, Clone)]
pub struct DesktopRef {
    pub id: String,
    pub generation: u64,
}

/// One named desktop and its client bindings
#[derive(Debug)]
pub struct VirtualDesktopInterface {
    id: String,
    generation: u64,
    name: String,
    row: u32,
    column: u32,
    active: bool,
    resources: ResourceSet<OrgKdePlasmaVirtualDesktop>,
}

impl VirtualDesktopInterface {
    fn new(id: String, generation: u64, (row, column): Cell) -> Self {
        Self {
            id,
            generation,
            name: String::new(),
            row,
            column,
            active: false,
            resources: ResourceSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn layout_position(&self) -> Cell {
        (self.row, self.column)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Mark the end of a batch of changes for this desktop's clients
    pub fn send_done(&self) {
        self.resources.broadcast(|r| r.done());
    }

    fn move_to(&mut self, (row, column): Cell) {
        if (self.row, self.column) == (row, column) {
            return;
        }
        self.row = row;
        self.column = column;
        self.resources.broadcast(|r| r.layout_position(row, column));
    }

    fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        self.active = active;
        if active {
            self.resources.broadcast(|r| r.activated());
        } else {
            self.resources.broadcast(|r| r.deactivated());
        }
    }

    fn send_state(&self, resource: &OrgKdePlasmaVirtualDesktop) {
        resource.desktop_id(self.id.clone());
        if !self.name.is_empty() {
            resource.name(self.name.clone());
        }
        resource.layout_position(self.row, self.column);
        if self.active {
            resource.activated();
        }
        resource.done();
    }
}

/// The desktop manager global
#[derive(Debug)]
pub struct VirtualDesktopManagementInterface {
    handle: DisplayHandle,
    global: Global<OrgKdePlasmaVirtualDesktopManagement>,
    rows: u32,
    columns: u32,
    desktops: HashMap<String, VirtualDesktopInterface>,
    order: Vec<String>,
    generation: u64,
    released: ReleaseQueue,
}

impl VirtualDesktopManagementInterface {
    pub(crate) fn new(dh: &DisplayHandle, rows: u32, released: ReleaseQueue) -> Self {
        Self {
            handle: dh.clone(),
            global: Global::new::<ServerState, _>(dh, VIRTUAL_DESKTOP_MANAGEMENT_VERSION, ()),
            rows: rows.max(1),
            columns: 0,
            desktops: HashMap::new(),
            order: Vec::new(),
            generation: 0,
            released,
        }
    }

    pub fn global(&self) -> &Global<OrgKdePlasmaVirtualDesktopManagement> {
        &self.global
    }

    pub fn resource_count(&self) -> usize {
        self.global.bindings().len()
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn len(&self) -> usize {
        self.desktops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desktops.is_empty()
    }

    pub fn desktop(&self, id: &str) -> Option<&VirtualDesktopInterface> {
        self.desktops.get(id)
    }

    /// Desktops in layout order
    pub fn desktops(&self) -> impl Iterator<Item = &VirtualDesktopInterface> {
        self.order.iter().filter_map(|id| self.desktops.get(id))
    }

    pub fn active_desktop(&self) -> Option<&VirtualDesktopInterface> {
        self.desktops.values().find(|d| d.active)
    }

    /// Create a desktop, or return the existing one with the same id.
    ///
    /// The very first desktop becomes active.
    pub fn create_desktop(&mut self, id: impl Into<String>) -> &VirtualDesktopInterface {
        let id = id.into();
        if self.desktops.contains_key(&id) {
            return &self.desktops[&id];
        }

        let cell = layout::default_cell(self.desktops.len(), self.columns);
        self.generation += 1;
        let mut desktop = VirtualDesktopInterface::new(id.clone(), self.generation, cell);
        desktop.active = self.desktops.is_empty();
        self.desktops.insert(id.clone(), desktop);
        self.order.push(id.clone());
        debug!("Virtual desktop {} created at {:?}", id, cell);

        self.global
            .bindings()
            .broadcast(|r| r.desktop_added(id.clone()));

        if !self.update_columns() && self.cell_is_shared(&id) {
            // An earlier reposition left the default slot taken
            self.sort_desktops(None, None);
        }

        &self.desktops[&id]
    }

    /// Remove a desktop, telling its bindings before they are dropped
    pub fn remove_desktop(&mut self, id: &str) -> bool {
        let Some(mut desktop) = self.desktops.remove(id) else {
            return false;
        };
        self.order.retain(|d| d != id);

        desktop.resources.broadcast(|r| r.removed());
        self.global
            .bindings()
            .broadcast(|r| r.desktop_removed(id.to_string()));
        let mut dh = self.handle.clone();
        if let Err(e) = dh.flush_clients() {
            warn!("Failed to flush removal of desktop {}: {}", id, e);
        }
        let dropped = desktop.resources.clear();
        debug!(
            "Virtual desktop {} removed, {} bindings dropped",
            id,
            dropped.len()
        );
        // Desktops have no destructor request, so the bindings stay alive but inert
        self.released.lock().extend(
            dropped
                .iter()
                .filter_map(|r| r.client().map(|c| (c.id(), r.id()))),
        );

        if desktop.active {
            if let Some(next) = self.order.first().cloned() {
                self.set_active_desktop(&next);
            }
        }

        if !self.update_columns() {
            self.sort_desktops(None, None);
        }
        true
    }

    /// Change the number of rows; zero and unchanged values are ignored
    pub fn set_rows(&mut self, rows: u32) {
        if rows == 0 || rows == self.rows {
            return;
        }

        self.rows = rows;
        let columns = layout::column_count(self.desktops.len(), rows);
        let changed = columns != self.columns;
        self.columns = columns;
        info!("Virtual desktop grid is now {}x{}", self.rows, self.columns);
        self.broadcast_layout();
        if changed {
            self.sort_desktops(None, None);
        }
    }

    pub fn set_name(&mut self, id: &str, name: impl Into<String>) {
        let Some(desktop) = self.desktops.get_mut(id) else {
            return;
        };
        let name = name.into();
        if desktop.name == name {
            return;
        }
        desktop.name = name;
        desktop.resources.broadcast(|r| r.name(desktop.name.clone()));
    }

    /// Place a desktop at an explicit cell, shifting the others around it
    pub fn set_layout_position(&mut self, id: &str, row: u32, column: u32) {
        let (rows, columns) = (self.rows, self.columns);
        let Some(desktop) = self.desktops.get_mut(id) else {
            return;
        };
        if desktop.layout_position() == (row, column) {
            return;
        }

        // Park it past the grid so it sorts last without broadcasting
        desktop.row = rows;
        desktop.column = columns;
        self.sort_desktops(Some((row, column)), Some(id));

        if let Some(desktop) = self.desktops.get_mut(id) {
            desktop.row = row;
            desktop.column = column;
            desktop
                .resources
                .broadcast(|r| r.layout_position(row, column));
        }
    }

    /// Activate `id` and deactivate the previously active desktop
    pub fn set_active_desktop(&mut self, id: &str) -> bool {
        if !self.desktops.contains_key(id) {
            debug!("Ignoring activation of unknown desktop {}", id);
            return false;
        }

        for desktop in self.desktops.values_mut().filter(|d| d.id != id) {
            desktop.set_active(false);
        }
        if let Some(desktop) = self.desktops.get_mut(id) {
            desktop.set_active(true);
        }
        true
    }

    /// Mark the end of a batch of manager changes
    pub fn send_done(&self) {
        self.global.bindings().broadcast(|r| r.done());
    }

    fn broadcast_layout(&self) {
        let (rows, columns) = (self.rows, self.columns);
        self.global
            .bindings()
            .broadcast(|r| r.layout(rows, columns));
    }

    /// Recompute the column count, broadcasting and re-sorting on change
    fn update_columns(&mut self) -> bool {
        let columns = layout::column_count(self.desktops.len(), self.rows);
        if columns == self.columns {
            return false;
        }
        self.columns = columns;
        self.broadcast_layout();
        self.sort_desktops(None, None);
        true
    }

    fn cell_is_shared(&self, id: &str) -> bool {
        let Some(cell) = self.desktops.get(id).map(|d| d.layout_position()) else {
            return false;
        };
        self.desktops
            .values()
            .any(|d| d.id != id && d.layout_position() == cell)
    }

    /// Stable sort by position, then renumber sequentially.
    ///
    /// `pinned` keeps its slot in the walk but is not moved.
    fn sort_desktops(&mut self, hole: Option<Cell>, pinned: Option<&str>) {
        let desktops = &self.desktops;
        self.order.sort_by_key(|id| {
            desktops
                .get(id)
                .map(|d| d.layout_position())
                .unwrap_or((u32::MAX, u32::MAX))
        });

        let columns = layout::column_count(self.desktops.len(), self.rows).max(1);
        let cells = layout::renumber(self.order.len(), columns, hole);
        for (id, cell) in self.order.iter().zip(cells) {
            if Some(id.as_str()) == pinned {
                continue;
            }
            if let Some(desktop) = self.desktops.get_mut(id) {
                desktop.move_to(cell);
            }
        }
    }

    /// Tell every desktop binding its desktop is gone, then withdraw the global
    pub(crate) fn destroy(self, dh: &DisplayHandle) {
        for desktop in self.desktops.values() {
            desktop.resources.broadcast(|r| r.removed());
        }
        self.global.remove::<ServerState>(dh, |_| {});
    }

    pub(crate) fn purge(&mut self, objects: &HashSet<ObjectId>) {
        self.global.bindings_mut().purge(objects);
        for desktop in self.desktops.values_mut() {
            desktop.resources.purge(objects);
        }
    }
}

impl GlobalDispatch<OrgKdePlasmaVirtualDesktopManagement, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<OrgKdePlasmaVirtualDesktopManagement>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(resource) =
            state
                .clients
                .init_resource(client, resource, (), data_init, &mut state.events)
        else {
            return;
        };

        let Some(manager) = state.virtual_desktops.as_mut() else {
            return;
        };
        for desktop in manager.desktops() {
            resource.desktop_added(desktop.id.clone());
        }
        resource.layout(manager.rows, manager.columns);
        resource.done();
        manager.global.bind(resource);
    }
}

impl Dispatch<OrgKdePlasmaVirtualDesktopManagement, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &OrgKdePlasmaVirtualDesktopManagement,
        request: org_kde_plasma_virtual_desktop_management::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            org_kde_plasma_virtual_desktop_management::Request::GetVirtualDesktop {
                id,
                desktop_id,
            } => {
                let generation = state
                    .virtual_desktops
                    .as_ref()
                    .and_then(|m| m.desktops.get(&desktop_id))
                    .map_or(0, |d| d.generation);
                let Some(desktop_resource) = state.clients.init_child(
                    client,
                    resource,
                    id,
                    DesktopRef {
                        id: desktop_id.clone(),
                        generation,
                    },
                    data_init,
                    &mut state.events,
                ) else {
                    return;
                };

                match state
                    .virtual_desktops
                    .as_mut()
                    .and_then(|m| m.desktops.get_mut(&desktop_id))
                {
                    Some(desktop) => {
                        desktop.send_state(&desktop_resource);
                        desktop.resources.insert(desktop_resource);
                    }
                    None => {
                        // Removal raced the request; hand out an already removed desktop
                        debug!("Client asked for unknown desktop {}", desktop_id);
                        desktop_resource.removed();
                        state.clients.forget(&client.id(), &desktop_resource.id());
                    }
                }
            }
            // Unbinding happens in `destroyed`
            org_kde_plasma_virtual_desktop_management::Request::Release => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        client: ClientId,
        resource: &OrgKdePlasmaVirtualDesktopManagement,
        _data: &(),
    ) {
        state.clients.forget(&client, &resource.id());
        if let Some(manager) = state.virtual_desktops.as_mut() {
            manager.global.unbind(resource);
        }
    }
}

impl Dispatch<OrgKdePlasmaVirtualDesktop, DesktopRef> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &OrgKdePlasmaVirtualDesktop,
        request: org_kde_plasma_virtual_desktop::Request,
        data: &DesktopRef,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            org_kde_plasma_virtual_desktop::Request::RequestActivate => {
                let live = state
                    .virtual_desktops
                    .as_ref()
                    .and_then(|m| m.desktop(&data.id))
                    .is_some_and(|d| d.generation == data.generation);
                if live {
                    debug!("Client requested activation of desktop {}", data.id);
                    state.events.push(ServerEvent::DesktopActivationRequested {
                        id: data.id.clone(),
                    });
                } else {
                    debug!("Ignoring activation through a removed desktop {}", data.id);
                }
            }
        }
    }

    fn destroyed(
        state: &mut Self,
        client: ClientId,
        resource: &OrgKdePlasmaVirtualDesktop,
        data: &DesktopRef,
    ) {
        state.clients.forget(&client, &resource.id());
        if let Some(desktop) = state
            .virtual_desktops
            .as_mut()
            .and_then(|m| m.desktops.get_mut(&data.id))
            .filter(|d| d.generation == data.generation)
        {
            desktop.resources.remove(resource);
        }
    }
}

#[cfg(test)]
mod tests;
