//! Output device model and the `org_kde_kwin_outputdevice` global
//!
//! An [`OutputDeviceInterface`] describes one physical display independently
//! of any client. Every change is pushed to all bound resources as a burst of
//! attribute events closed by `done`, so clients never observe a half-updated
//! device.

use std::collections::HashSet;
use std::fmt;

use bitflags::bitflags;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use wayland_server::backend::{ClientId, ObjectId};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource};

use crate::global::Global;
use crate::protocol::org_kde_kwin_outputdevice::{self, OrgKdeKwinOutputdevice};
use crate::state::ServerState;

/// Highest `org_kde_kwin_outputdevice` version we implement
pub const OUTPUT_DEVICE_VERSION: u32 = 2;

/// Default refresh rate in mHz
pub const DEFAULT_REFRESH_RATE: i32 = 60_000;

/// Server-assigned handle of an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Flags carried by the `mode` event
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeFlags: u32 {
        const CURRENT = 0x1;
        const PREFERRED = 0x2;
    }
}

/// Transform applied to the framebuffer, same values as `wl_output`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Transform {
    #[default]
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "90")]
    Rotated90,
    #[serde(rename = "180")]
    Rotated180,
    #[serde(rename = "270")]
    Rotated270,
    #[serde(rename = "flipped")]
    Flipped,
    #[serde(rename = "flipped-90")]
    Flipped90,
    #[serde(rename = "flipped-180")]
    Flipped180,
    #[serde(rename = "flipped-270")]
    Flipped270,
}

impl Transform {
    pub fn from_wire(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Normal,
            1 => Self::Rotated90,
            2 => Self::Rotated180,
            3 => Self::Rotated270,
            4 => Self::Flipped,
            5 => Self::Flipped90,
            6 => Self::Flipped180,
            7 => Self::Flipped270,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

/// Physical subpixel layout, same values as `wl_output`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Subpixel {
    #[default]
    Unknown,
    None,
    HorizontalRgb,
    HorizontalBgr,
    VerticalRgb,
    VerticalBgr,
}

impl Subpixel {
    pub fn from_wire(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            1 => Self::None,
            2 => Self::HorizontalRgb,
            3 => Self::HorizontalBgr,
            4 => Self::VerticalRgb,
            5 => Self::VerticalBgr,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

/// One supported video mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub id: i32,
    pub width: i32,
    pub height: i32,
    /// Refresh rate in mHz
    pub refresh: i32,
    pub preferred: bool,
}

/// Complete server-side state of an output device.
///
/// The mode list is append-only and exactly one mode is current as soon as
/// any mode exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    modes: Vec<Mode>,
    current_mode: Option<i32>,
    pub physical_size: (i32, i32),
    pub global_position: (i32, i32),
    pub scale: i32,
    pub subpixel: Subpixel,
    pub transform: Transform,
    pub enabled: bool,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub uuid: String,
    pub edid: String,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            modes: Vec::new(),
            current_mode: None,
            physical_size: (0, 0),
            global_position: (0, 0),
            scale: 1,
            subpixel: Subpixel::Unknown,
            transform: Transform::Normal,
            enabled: true,
            manufacturer: "org.kde.kwin".to_string(),
            model: "none".to_string(),
            serial_number: String::new(),
            uuid: String::new(),
            edid: String::new(),
        }
    }
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mode and return its id.
    ///
    /// The first mode becomes current, later ones only when flagged `CURRENT`.
    pub fn add_mode(&mut self, width: i32, height: i32, refresh: i32, flags: ModeFlags) -> i32 {
        let id = self.modes.len() as i32;
        self.modes.push(Mode {
            id,
            width,
            height,
            refresh,
            preferred: flags.contains(ModeFlags::PREFERRED),
        });
        if self.current_mode.is_none() || flags.contains(ModeFlags::CURRENT) {
            self.current_mode = Some(id);
        }
        id
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn mode(&self, id: i32) -> Option<&Mode> {
        self.modes.iter().find(|m| m.id == id)
    }

    /// Id of the first mode with the given pixel size
    pub fn mode_id_for_size(&self, width: i32, height: i32) -> Option<i32> {
        self.modes
            .iter()
            .find(|m| m.width == width && m.height == height)
            .map(|m| m.id)
    }

    pub fn current_mode(&self) -> Option<&Mode> {
        self.current_mode.and_then(|id| self.mode(id))
    }

    pub fn mode_flags(&self, mode: &Mode) -> ModeFlags {
        let mut flags = ModeFlags::empty();
        if self.current_mode == Some(mode.id) {
            flags |= ModeFlags::CURRENT;
        }
        if mode.preferred {
            flags |= ModeFlags::PREFERRED;
        }
        flags
    }

    fn set_current_mode(&mut self, id: i32) -> Option<Option<i32>> {
        self.mode(id)?;
        let previous = self.current_mode.replace(id);
        Some(previous)
    }
}

/// Per-device change-set staged by an output configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceChanges {
    pub enabled: Option<bool>,
    pub mode_id: Option<i32>,
    pub transform: Option<Transform>,
    pub position: Option<(i32, i32)>,
    pub scale: Option<i32>,
}

impl DeviceChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

bitflags! {
    /// Attribute groups that need re-sending
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct Dirty: u8 {
        const GEOMETRY = 0x01;
        const SCALE = 0x02;
        const EDID = 0x04;
        const ENABLED = 0x08;
        const UUID = 0x10;
    }
}

/// Server-side output device with its advertised global
#[derive(Debug)]
pub struct OutputDeviceInterface {
    id: DeviceId,
    state: DeviceState,
    global: Global<OrgKdeKwinOutputdevice>,
}

impl OutputDeviceInterface {
    pub(crate) fn new(dh: &DisplayHandle, id: DeviceId, state: DeviceState) -> Self {
        let global = Global::new::<ServerState, _>(dh, OUTPUT_DEVICE_VERSION, id);
        debug!(
            "Output device {} created: {} {} with {} modes",
            id,
            state.manufacturer,
            state.model,
            state.modes.len()
        );
        Self { id, state, global }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn global(&self) -> &Global<OrgKdeKwinOutputdevice> {
        &self.global
    }

    /// Number of client bindings to this device
    pub fn resource_count(&self) -> usize {
        self.global.bindings().len()
    }

    pub fn add_mode(&mut self, width: i32, height: i32, refresh: i32, flags: ModeFlags) -> i32 {
        let previous = self.state.current_mode;
        let id = self.state.add_mode(width, height, refresh, flags);
        let mut modes = vec![id];
        if let Some(previous) = previous.filter(|p| Some(*p) != self.state.current_mode) {
            modes.push(previous);
        }
        self.broadcast(Dirty::empty(), &modes);
        id
    }

    /// Switch the current mode, returning false for unknown ids
    pub fn set_current_mode(&mut self, mode_id: i32) -> bool {
        match self.state.set_current_mode(mode_id) {
            None => {
                warn!("Output device {} has no mode {}", self.id, mode_id);
                false
            }
            Some(previous) if previous == Some(mode_id) => true,
            Some(previous) => {
                let mut modes: Vec<i32> = previous.into_iter().collect();
                modes.push(mode_id);
                self.broadcast(Dirty::empty(), &modes);
                true
            }
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.state.enabled != enabled {
            self.state.enabled = enabled;
            self.broadcast(Dirty::ENABLED, &[]);
        }
    }

    pub fn set_transform(&mut self, transform: Transform) {
        if self.state.transform != transform {
            self.state.transform = transform;
            self.broadcast(Dirty::GEOMETRY, &[]);
        }
    }

    pub fn set_scale(&mut self, scale: i32) {
        if self.state.scale != scale {
            self.state.scale = scale;
            self.broadcast(Dirty::SCALE, &[]);
        }
    }

    pub fn set_global_position(&mut self, x: i32, y: i32) {
        if self.state.global_position != (x, y) {
            self.state.global_position = (x, y);
            self.broadcast(Dirty::GEOMETRY, &[]);
        }
    }

    pub fn set_physical_size(&mut self, width_mm: i32, height_mm: i32) {
        if self.state.physical_size != (width_mm, height_mm) {
            self.state.physical_size = (width_mm, height_mm);
            self.broadcast(Dirty::GEOMETRY, &[]);
        }
    }

    pub fn set_subpixel(&mut self, subpixel: Subpixel) {
        if self.state.subpixel != subpixel {
            self.state.subpixel = subpixel;
            self.broadcast(Dirty::GEOMETRY, &[]);
        }
    }

    pub fn set_manufacturer(&mut self, manufacturer: impl Into<String>) {
        let manufacturer = manufacturer.into();
        if self.state.manufacturer != manufacturer {
            self.state.manufacturer = manufacturer;
            self.broadcast(Dirty::GEOMETRY, &[]);
        }
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        if self.state.model != model {
            self.state.model = model;
            self.broadcast(Dirty::GEOMETRY, &[]);
        }
    }

    /// Serial numbers have no event in version 2 and stay server-side
    pub fn set_serial_number(&mut self, serial_number: impl Into<String>) {
        self.state.serial_number = serial_number.into();
    }

    pub fn set_uuid(&mut self, uuid: impl Into<String>) {
        let uuid = uuid.into();
        if self.state.uuid != uuid {
            self.state.uuid = uuid;
            self.broadcast(Dirty::UUID, &[]);
        }
    }

    pub fn set_edid(&mut self, edid: impl Into<String>) {
        let edid = edid.into();
        if self.state.edid != edid {
            self.state.edid = edid;
            self.broadcast(Dirty::EDID, &[]);
        }
    }

    /// Commit a staged change-set, emitting a single burst for all of it.
    ///
    /// Mode ids are expected to be validated by the caller; unknown ones are
    /// skipped.
    pub fn apply_changes(&mut self, changes: &DeviceChanges) {
        let mut dirty = Dirty::empty();
        let mut modes = Vec::new();

        if let Some(enabled) = changes.enabled.filter(|e| *e != self.state.enabled) {
            self.state.enabled = enabled;
            dirty |= Dirty::ENABLED;
        }
        if let Some(mode_id) = changes.mode_id {
            match self.state.set_current_mode(mode_id) {
                Some(previous) if previous != Some(mode_id) => {
                    modes.extend(previous);
                    modes.push(mode_id);
                }
                Some(_) => {}
                None => warn!("Skipping unknown mode {} on output device {}", mode_id, self.id),
            }
        }
        if let Some(transform) = changes.transform.filter(|t| *t != self.state.transform) {
            self.state.transform = transform;
            dirty |= Dirty::GEOMETRY;
        }
        if let Some(position) = changes.position.filter(|p| *p != self.state.global_position) {
            self.state.global_position = position;
            dirty |= Dirty::GEOMETRY;
        }
        if let Some(scale) = changes.scale.filter(|s| *s != self.state.scale) {
            self.state.scale = scale;
            dirty |= Dirty::SCALE;
        }

        self.broadcast(dirty, &modes);
    }

    fn broadcast(&self, dirty: Dirty, modes: &[i32]) {
        if dirty.is_empty() && modes.is_empty() {
            return;
        }
        self.global.bindings().broadcast(|resource| {
            self.send_attributes(resource, dirty, modes);
            resource.done();
        });
    }

    /// Full state burst for a freshly bound resource
    fn send_burst(&self, resource: &OrgKdeKwinOutputdevice) {
        let modes: Vec<i32> = self.state.modes.iter().map(|m| m.id).collect();
        self.send_attributes(resource, Dirty::all(), &modes);
        resource.done();
    }

    fn send_attributes(&self, resource: &OrgKdeKwinOutputdevice, dirty: Dirty, modes: &[i32]) {
        let state = &self.state;

        if dirty.contains(Dirty::GEOMETRY) {
            resource.geometry(
                state.global_position.0,
                state.global_position.1,
                state.physical_size.0,
                state.physical_size.1,
                state.subpixel.to_wire(),
                state.manufacturer.clone(),
                state.model.clone(),
                state.transform.to_wire(),
            );
        }
        for mode in modes.iter().filter_map(|id| state.mode(*id)) {
            resource.mode(
                state.mode_flags(mode).bits(),
                mode.width,
                mode.height,
                mode.refresh,
                mode.id,
            );
        }
        if dirty.contains(Dirty::SCALE) {
            resource.scale(state.scale);
        }
        if dirty.contains(Dirty::EDID) {
            resource.edid(state.edid.clone());
        }

        let version = resource.version();
        if dirty.contains(Dirty::ENABLED)
            && version >= org_kde_kwin_outputdevice::EVT_ENABLED_SINCE
        {
            resource.enabled(i32::from(state.enabled));
        }
        if dirty.contains(Dirty::UUID) && version >= org_kde_kwin_outputdevice::EVT_UUID_SINCE {
            resource.uuid(state.uuid.clone());
        }
    }

    /// Withdraw the global; version 2 has no per-resource removal event, so
    /// clients learn about it from the registry.
    pub(crate) fn destroy(self, dh: &DisplayHandle) {
        debug!("Removing output device {}", self.id);
        self.global.remove::<ServerState>(dh, |_| {});
    }

    pub(crate) fn purge(&mut self, objects: &HashSet<ObjectId>) {
        self.global.bindings_mut().purge(objects);
    }
}

impl GlobalDispatch<OrgKdeKwinOutputdevice, DeviceId> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<OrgKdeKwinOutputdevice>,
        device_id: &DeviceId,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(resource) =
            state
                .clients
                .init_resource(client, resource, *device_id, data_init, &mut state.events)
        else {
            return;
        };

        match state.output_device_mut(*device_id) {
            Some(device) => {
                device.send_burst(&resource);
                device.global.bind(resource);
            }
            None => debug!("Client bound removed output device {}", device_id),
        }
    }
}

impl Dispatch<OrgKdeKwinOutputdevice, DeviceId> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &OrgKdeKwinOutputdevice,
        _request: org_kde_kwin_outputdevice::Request,
        _data: &DeviceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(
        state: &mut Self,
        client: ClientId,
        resource: &OrgKdeKwinOutputdevice,
        device_id: &DeviceId,
    ) {
        state.clients.forget(&client, &resource.id());
        if let Some(device) = state.output_device_mut(*device_id) {
            device.global.unbind(resource);
        }
    }
}
