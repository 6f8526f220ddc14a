//! Dispatch-thread server state
//!
//! `ServerState` is the `D` of every `Dispatch`/`GlobalDispatch` impl. It
//! owns the client registry, every protocol model and the host event queue.
//! All of it is touched from the dispatch thread only.

use std::collections::HashSet;
use std::os::unix::net::UnixStream;

use log::{debug, info, warn};
use wayland_server::backend::{ClientId, ObjectId};
use wayland_server::DisplayHandle;

use crate::client::{ClientConnection, ClientRegistry};
use crate::config::ServerConfig;
use crate::error::ConfigurationError;
use crate::output::device::{DeviceId, DeviceState, OutputDeviceInterface};
use crate::output::management::OutputManagementInterface;
use crate::virtual_desktop::VirtualDesktopManagementInterface;

/// Notifications for the host, drained with [`ServerState::take_events`]
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
    ConfigurationApplied {
        serial: u32,
        devices: Vec<DeviceId>,
    },
    ConfigurationFailed {
        serial: u32,
        reason: ConfigurationError,
    },
    /// A client asked for a desktop to become active; the host decides
    DesktopActivationRequested {
        id: String,
    },
}

pub struct ServerState {
    pub(crate) handle: DisplayHandle,
    pub(crate) clients: ClientRegistry,
    // Output devices in creation order
    pub(crate) outputs: Vec<OutputDeviceInterface>,
    pub(crate) output_management: Option<OutputManagementInterface>,
    pub(crate) virtual_desktops: Option<VirtualDesktopManagementInterface>,
    // Internal event bus queue (drained by the host)
    pub(crate) events: Vec<ServerEvent>,
    serial_counter: u32,
    next_device_id: u32,
}

impl ServerState {
    pub fn new(handle: DisplayHandle, max_resources_per_client: usize) -> Self {
        Self {
            handle,
            clients: ClientRegistry::new(max_resources_per_client),
            outputs: Vec::new(),
            output_management: None,
            virtual_desktops: None,
            events: Vec::new(),
            serial_counter: 0,
            next_device_id: 1,
        }
    }

    pub fn handle(&self) -> &DisplayHandle {
        &self.handle
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Connection for `client`, created on first contact
    pub fn get_connection(&mut self, client: &ClientId) -> &ClientConnection {
        self.clients.get_connection(client, &mut self.events)
    }

    /// Next value of the monotonically increasing serial
    pub fn next_serial(&mut self) -> u32 {
        self.serial_counter = self.serial_counter.wrapping_add(1);
        self.serial_counter
    }

    /// Last serial handed out
    pub fn serial(&self) -> u32 {
        self.serial_counter
    }

    pub fn take_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Hand an already connected stream to the display as a new client
    pub fn insert_client(&mut self, stream: UnixStream) -> std::io::Result<ClientId> {
        let data = self.clients.client_data();
        let client = self.handle.insert_client(stream, data)?;
        let id = client.id();
        self.clients.get_connection(&id, &mut self.events);
        Ok(id)
    }

    pub fn create_output_device(&mut self, state: DeviceState) -> DeviceId {
        let id = DeviceId(self.next_device_id);
        self.next_device_id += 1;
        self.outputs
            .push(OutputDeviceInterface::new(&self.handle, id, state));
        id
    }

    pub fn output_device(&self, id: DeviceId) -> Option<&OutputDeviceInterface> {
        self.outputs.iter().find(|d| d.id() == id)
    }

    pub fn output_device_mut(&mut self, id: DeviceId) -> Option<&mut OutputDeviceInterface> {
        self.outputs.iter_mut().find(|d| d.id() == id)
    }

    pub fn output_devices(&self) -> impl Iterator<Item = &OutputDeviceInterface> {
        self.outputs.iter()
    }

    /// Detach a device; configurations still referencing it will fail
    pub fn remove_output_device(&mut self, id: DeviceId) -> bool {
        let Some(index) = self.outputs.iter().position(|d| d.id() == id) else {
            return false;
        };
        let device = self.outputs.remove(index);
        device.destroy(&self.handle);
        true
    }

    /// Advertise output management, once
    pub fn create_output_management(&mut self) -> &OutputManagementInterface {
        let handle = &self.handle;
        self.output_management
            .get_or_insert_with(|| OutputManagementInterface::new(handle))
    }

    pub fn output_management(&self) -> Option<&OutputManagementInterface> {
        self.output_management.as_ref()
    }

    pub fn remove_output_management(&mut self) {
        if let Some(management) = self.output_management.take() {
            management.destroy(&self.handle);
        }
    }

    /// Advertise the virtual desktop manager with `rows` rows, once
    pub fn create_virtual_desktop_management(
        &mut self,
        rows: u32,
    ) -> &mut VirtualDesktopManagementInterface {
        let handle = &self.handle;
        let released = self.clients.release_queue();
        self.virtual_desktops.get_or_insert_with(|| {
            VirtualDesktopManagementInterface::new(handle, rows, released)
        })
    }

    pub fn virtual_desktop_management(&self) -> Option<&VirtualDesktopManagementInterface> {
        self.virtual_desktops.as_ref()
    }

    pub fn virtual_desktop_management_mut(
        &mut self,
    ) -> Option<&mut VirtualDesktopManagementInterface> {
        self.virtual_desktops.as_mut()
    }

    pub fn remove_virtual_desktop_management(&mut self) {
        if let Some(manager) = self.virtual_desktops.take() {
            manager.destroy(&self.handle);
        }
    }

    /// Create the outputs, output management and desktops described by `config`
    pub fn populate_from_config(&mut self, config: &ServerConfig) {
        for output in &config.outputs {
            let id = self.create_output_device(output.device_state());
            info!(
                "🖥️  Output {} {} {} ({} modes)",
                id,
                output.manufacturer,
                output.model,
                output.modes.len()
            );
        }
        self.create_output_management();

        let desktops = &config.virtual_desktops;
        let manager = self.create_virtual_desktop_management(desktops.rows);
        for desktop in &desktops.desktops {
            manager.create_desktop(desktop.id.clone());
            manager.set_name(&desktop.id, desktop.name.clone());
        }
        if let Some(active) = &desktops.active {
            manager.set_active_desktop(active);
        }
        manager.send_done();
        info!(
            "🗂️  {} virtual desktops in a {}x{} grid",
            manager.len(),
            manager.rows(),
            manager.columns()
        );
    }

    /// Write pending events to every client
    pub fn flush(&mut self) {
        if let Err(e) = self.handle.flush_clients() {
            warn!("Failed to flush clients: {}", e);
        }
    }

    /// Drop connections whose transport closed since the last dispatch
    pub(crate) fn reap_disconnected(&mut self) {
        for (id, leftovers) in self.clients.reap_disconnected(&mut self.events) {
            if !leftovers.is_empty() {
                debug!("Purging {} objects of client {:?}", leftovers.len(), id);
                self.purge_objects(&leftovers);
            }
        }
    }

    fn purge_objects(&mut self, objects: &HashSet<ObjectId>) {
        for device in &mut self.outputs {
            device.purge(objects);
        }
        if let Some(management) = self.output_management.as_mut() {
            management.purge(objects);
        }
        if let Some(manager) = self.virtual_desktops.as_mut() {
            manager.purge(objects);
        }
    }

    /// Tear down every global, notifying and flushing bound clients first
    pub(crate) fn about_to_terminate(&mut self) {
        info!("Tearing down {} globals", self.global_count());
        self.remove_virtual_desktop_management();
        self.remove_output_management();
        for device in std::mem::take(&mut self.outputs) {
            device.destroy(&self.handle);
        }
        self.clients.clear();
    }

    fn global_count(&self) -> usize {
        self.outputs.len()
            + usize::from(self.output_management.is_some())
            + usize::from(self.virtual_desktops.is_some())
    }
}
