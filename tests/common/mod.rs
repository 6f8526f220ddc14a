// Shared in-process client harness for protocol integration tests
//
// A test owns a started `Display` and any number of `TestClient`s connected
// over socketpairs. `TestClient::roundtrip` pumps both sides until the
// server has answered a `wl_display.sync`, so every event the server sent
// before that point has been recorded.

#![allow(dead_code)]

use std::os::unix::net::UnixStream;
use std::time::Duration;

use plasma_server::{Display, ServerConfig, StartMode};
use wayland_backend::client::ObjectId;
use wayland_backend::protocol::ProtocolError;
use wayland_client::protocol::{wl_callback, wl_registry};
use wayland_client::{Connection, Dispatch, EventQueue, Proxy, QueueHandle};
use wayland_server::backend::ClientId;

pub mod protocol {
    #![allow(dead_code, non_camel_case_types, unused_unsafe, unused_variables)]
    #![allow(non_upper_case_globals, non_snake_case, unused_imports)]
    #![allow(missing_docs, clippy::all)]

    pub mod output_device {
        use wayland_client;
        use wayland_client::protocol::*;

        pub mod __interfaces {
            use wayland_client::protocol::__interfaces::*;
            wayland_scanner::generate_interfaces!("protocols/outputdevice.xml");
        }
        use self::__interfaces::*;

        wayland_scanner::generate_client_code!("protocols/outputdevice.xml");
    }

    pub mod output_management {
        use super::output_device::*;
        use wayland_client;
        use wayland_client::protocol::*;

        pub mod __interfaces {
            use super::super::output_device::__interfaces::*;
            use wayland_client::protocol::__interfaces::*;
            wayland_scanner::generate_interfaces!("protocols/outputmanagement.xml");
        }
        use self::__interfaces::*;

        wayland_scanner::generate_client_code!("protocols/outputmanagement.xml");
    }

    pub mod virtual_desktop {
        use wayland_client;
        use wayland_client::protocol::*;

        pub mod __interfaces {
            use wayland_client::protocol::__interfaces::*;
            wayland_scanner::generate_interfaces!("protocols/plasma-virtual-desktop.xml");
        }
        use self::__interfaces::*;

        wayland_scanner::generate_client_code!("protocols/plasma-virtual-desktop.xml");
    }

    pub use self::output_device::org_kde_kwin_outputdevice;
    pub use self::output_management::{
        org_kde_kwin_outputconfiguration, org_kde_kwin_outputmanagement,
    };
    pub use self::virtual_desktop::{
        org_kde_plasma_virtual_desktop, org_kde_plasma_virtual_desktop_management,
    };
}

use protocol::org_kde_kwin_outputconfiguration::{self, OrgKdeKwinOutputconfiguration};
use protocol::org_kde_kwin_outputdevice::{self, OrgKdeKwinOutputdevice};
use protocol::org_kde_kwin_outputmanagement::{self, OrgKdeKwinOutputmanagement};
use protocol::org_kde_plasma_virtual_desktop::{self, OrgKdePlasmaVirtualDesktop};
use protocol::org_kde_plasma_virtual_desktop_management::{
    self, OrgKdePlasmaVirtualDesktopManagement,
};

/// A started display with no globals, accepting in-process clients only
pub fn start_display() -> Display {
    let config = ServerConfig::default();
    let mut display = Display::new(&config.display).expect("display");
    display
        .start(StartMode::ConnectClientsOnly)
        .expect("start display");
    display
}

/// Advertised global as seen through `wl_registry`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalInfo {
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

/// Every event a test client received, in arrival order
#[derive(Debug)]
pub enum Recorded {
    Device(ObjectId, org_kde_kwin_outputdevice::Event),
    Configuration(ObjectId, org_kde_kwin_outputconfiguration::Event),
    Manager(org_kde_plasma_virtual_desktop_management::Event),
    Desktop(ObjectId, org_kde_plasma_virtual_desktop::Event),
}

#[derive(Debug, Default)]
pub struct ClientState {
    pub globals: Vec<GlobalInfo>,
    pub removed_globals: Vec<u32>,
    pub events: Vec<Recorded>,
    synced: bool,
}

pub struct TestClient {
    pub connection: Connection,
    pub queue: EventQueue<ClientState>,
    pub handle: QueueHandle<ClientState>,
    pub registry: wl_registry::WlRegistry,
    pub state: ClientState,
    pub id: ClientId,
}

impl TestClient {
    /// Connect a new client and wait for the initial registry burst
    pub fn connect(display: &mut Display) -> Self {
        let (server_side, client_side) = UnixStream::pair().expect("socketpair");
        let id = display.create_client(server_side).expect("insert client");

        let connection = Connection::from_socket(client_side).expect("client connection");
        let queue = connection.new_event_queue();
        let handle = queue.handle();
        let registry = connection.display().get_registry(&handle, ());

        let mut client = Self {
            connection,
            queue,
            handle,
            registry,
            state: ClientState::default(),
            id,
        };
        client.roundtrip(display);
        client
    }

    /// Pump client and server until a sync callback comes back
    pub fn roundtrip(&mut self, display: &mut Display) {
        self.state.synced = false;
        let _callback = self.connection.display().sync(&self.handle, ());

        for _ in 0..50 {
            let _ = self.connection.flush();
            display
                .dispatch_events(Some(Duration::ZERO))
                .expect("server dispatch");

            if let Some(guard) = self.connection.prepare_read() {
                let _ = guard.read();
            }
            if self.queue.dispatch_pending(&mut self.state).is_err() {
                break;
            }
            if self.state.synced {
                return;
            }
        }
    }

    /// Error the server posted on this connection, if any
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        self.connection.protocol_error()
    }

    pub fn global(&self, interface: &str) -> Option<&GlobalInfo> {
        self.state.globals.iter().find(|g| g.interface == interface)
    }

    pub fn globals(&self, interface: &str) -> Vec<GlobalInfo> {
        self.state
            .globals
            .iter()
            .filter(|g| g.interface == interface)
            .cloned()
            .collect()
    }

    pub fn take_events(&mut self) -> Vec<Recorded> {
        std::mem::take(&mut self.state.events)
    }

    pub fn bind_output_device(&self, global: &GlobalInfo, version: u32) -> OrgKdeKwinOutputdevice {
        self.registry
            .bind::<OrgKdeKwinOutputdevice, _, _>(global.name, version, &self.handle, ())
    }

    pub fn bind_output_management(&self) -> OrgKdeKwinOutputmanagement {
        let global = self
            .global("org_kde_kwin_outputmanagement")
            .expect("output management advertised");
        self.registry.bind::<OrgKdeKwinOutputmanagement, _, _>(
            global.name,
            global.version,
            &self.handle,
            (),
        )
    }

    pub fn bind_desktop_management(&self) -> OrgKdePlasmaVirtualDesktopManagement {
        let global = self
            .global("org_kde_plasma_virtual_desktop_management")
            .expect("desktop management advertised");
        self.registry.bind::<OrgKdePlasmaVirtualDesktopManagement, _, _>(
            global.name,
            global.version,
            &self.handle,
            (),
        )
    }
}

/// Attribute snapshot rebuilt from output device events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub position: (i32, i32),
    pub physical_size: (i32, i32),
    pub manufacturer: String,
    pub model: String,
    pub transform: i32,
    pub scale: i32,
    pub enabled: Option<bool>,
    pub uuid: Option<String>,
    pub edid: Option<String>,
    /// (mode_id, width, height, refresh, flags)
    pub modes: Vec<(i32, i32, i32, i32, u32)>,
    pub done_count: usize,
}

impl DeviceSnapshot {
    /// Fold every event recorded for `device`
    pub fn collect(events: &[Recorded], device: &ObjectId) -> Self {
        use org_kde_kwin_outputdevice::Event;

        let mut snapshot = Self::default();
        for event in events {
            let Recorded::Device(id, event) = event else {
                continue;
            };
            if id != device {
                continue;
            }
            match event {
                Event::Geometry {
                    x,
                    y,
                    physical_width,
                    physical_height,
                    make,
                    model,
                    transform,
                    ..
                } => {
                    snapshot.position = (*x, *y);
                    snapshot.physical_size = (*physical_width, *physical_height);
                    snapshot.manufacturer = make.clone();
                    snapshot.model = model.clone();
                    snapshot.transform = *transform;
                }
                Event::Mode {
                    flags,
                    width,
                    height,
                    refresh,
                    mode_id,
                } => {
                    let entry = (*mode_id, *width, *height, *refresh, *flags);
                    match snapshot.modes.iter_mut().find(|m| m.0 == *mode_id) {
                        Some(existing) => *existing = entry,
                        None => snapshot.modes.push(entry),
                    }
                }
                Event::Scale { factor } => snapshot.scale = *factor,
                Event::Edid { raw } => snapshot.edid = Some(raw.clone()),
                Event::Enabled { enabled } => snapshot.enabled = Some(*enabled != 0),
                Event::Uuid { uuid } => snapshot.uuid = Some(uuid.clone()),
                Event::Done => snapshot.done_count += 1,
                _ => {}
            }
        }
        snapshot
    }

    /// Mode carrying the current flag
    pub fn current_mode(&self) -> Option<(i32, i32)> {
        self.modes
            .iter()
            .find(|m| m.4 & 0x1 != 0)
            .map(|m| (m.1, m.2))
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for ClientState {
    fn event(
        state: &mut Self,
        _proxy: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => state.globals.push(GlobalInfo {
                name,
                interface,
                version,
            }),
            wl_registry::Event::GlobalRemove { name } => {
                state.globals.retain(|g| g.name != name);
                state.removed_globals.push(name);
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_callback::WlCallback, ()> for ClientState {
    fn event(
        state: &mut Self,
        _proxy: &wl_callback::WlCallback,
        event: wl_callback::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { .. } = event {
            state.synced = true;
        }
    }
}

impl Dispatch<OrgKdeKwinOutputdevice, ()> for ClientState {
    fn event(
        state: &mut Self,
        proxy: &OrgKdeKwinOutputdevice,
        event: org_kde_kwin_outputdevice::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        state.events.push(Recorded::Device(proxy.id(), event));
    }
}

impl Dispatch<OrgKdeKwinOutputmanagement, ()> for ClientState {
    fn event(
        _state: &mut Self,
        _proxy: &OrgKdeKwinOutputmanagement,
        _event: org_kde_kwin_outputmanagement::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<OrgKdeKwinOutputconfiguration, ()> for ClientState {
    fn event(
        state: &mut Self,
        proxy: &OrgKdeKwinOutputconfiguration,
        event: org_kde_kwin_outputconfiguration::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        state.events.push(Recorded::Configuration(proxy.id(), event));
    }
}

impl Dispatch<OrgKdePlasmaVirtualDesktopManagement, ()> for ClientState {
    fn event(
        state: &mut Self,
        _proxy: &OrgKdePlasmaVirtualDesktopManagement,
        event: org_kde_plasma_virtual_desktop_management::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        state.events.push(Recorded::Manager(event));
    }
}

impl Dispatch<OrgKdePlasmaVirtualDesktop, ()> for ClientState {
    fn event(
        state: &mut Self,
        proxy: &OrgKdePlasmaVirtualDesktop,
        event: org_kde_plasma_virtual_desktop::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        state.events.push(Recorded::Desktop(proxy.id(), event));
    }
}
