//! `org_kde_kwin_outputmanagement` global and configuration objects
//!
//! Clients create an `org_kde_kwin_outputconfiguration` per transaction,
//! stage changes against device resources and ask for `apply`. The server
//! answers with exactly one of `applied` or `failed`.

use std::collections::HashSet;

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use wayland_server::backend::{ClientId, ObjectId};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource};

use crate::error::ConfigurationError;
use crate::global::{Global, ResourceSet};
use crate::output::configuration::OutputConfiguration;
use crate::output::device::{DeviceChanges, DeviceId, Transform};
use crate::protocol::org_kde_kwin_outputconfiguration::{self, OrgKdeKwinOutputconfiguration};
use crate::protocol::org_kde_kwin_outputdevice::OrgKdeKwinOutputdevice;
use crate::protocol::org_kde_kwin_outputmanagement::{self, OrgKdeKwinOutputmanagement};
use crate::state::{ServerEvent, ServerState};

/// Highest `org_kde_kwin_outputmanagement` version we implement
pub const OUTPUT_MANAGEMENT_VERSION: u32 = 2;

/// User data of an `org_kde_kwin_outputconfiguration` resource
#[derive(Debug)]
pub struct ConfigurationData {
    transaction: Mutex<OutputConfiguration>,
}

impl ConfigurationData {
    fn new(serial: u32) -> Self {
        Self {
            transaction: Mutex::new(OutputConfiguration::new(serial)),
        }
    }

    pub fn transaction(&self) -> MutexGuard<'_, OutputConfiguration> {
        self.transaction.lock()
    }
}

/// The output management global and the configurations created through it
#[derive(Debug)]
pub struct OutputManagementInterface {
    global: Global<OrgKdeKwinOutputmanagement>,
    configurations: ResourceSet<OrgKdeKwinOutputconfiguration>,
}

impl OutputManagementInterface {
    pub(crate) fn new(dh: &DisplayHandle) -> Self {
        Self {
            global: Global::new::<ServerState, _>(dh, OUTPUT_MANAGEMENT_VERSION, ()),
            configurations: ResourceSet::new(),
        }
    }

    pub fn global(&self) -> &Global<OrgKdeKwinOutputmanagement> {
        &self.global
    }

    pub fn resource_count(&self) -> usize {
        self.global.bindings().len()
    }

    /// Configuration objects that have not been destroyed yet
    pub fn configuration_count(&self) -> usize {
        self.configurations.len()
    }

    /// Withdraw the global and cancel every configuration still pending
    pub(crate) fn destroy(self, dh: &DisplayHandle) {
        for configuration in self.configurations.iter() {
            if let Some(data) = configuration.data::<ConfigurationData>() {
                if data.transaction().cancel() {
                    debug!("Cancelled output configuration {:?}", configuration.id());
                }
            }
        }
        self.global.remove::<ServerState>(dh, |_| {});
    }

    pub(crate) fn purge(&mut self, objects: &HashSet<ObjectId>) {
        self.global.bindings_mut().purge(objects);
        self.configurations.purge(objects);
    }
}

impl ServerState {
    /// Validate and commit a transaction against the live output devices.
    ///
    /// Either every staged change-set is applied, each raising the device's
    /// normal broadcast, or none is and the transaction is marked failed.
    pub fn apply_output_configuration(
        &mut self,
        transaction: &mut OutputConfiguration,
    ) -> Result<Vec<DeviceId>, ConfigurationError> {
        let outputs = &self.outputs;
        if let Err(e) = transaction.validate(|id| {
            outputs
                .iter()
                .find(|device| device.id() == id)
                .map(|device| device.state())
        }) {
            if transaction.is_pending() {
                transaction.mark_failed();
            }
            return Err(e);
        }

        let mut applied = Vec::with_capacity(transaction.changes().len());
        for (id, changes) in transaction.changes() {
            if let Some(device) = self.output_device_mut(*id) {
                device.apply_changes(changes);
                applied.push(*id);
            }
        }
        transaction.mark_applied();
        Ok(applied)
    }
}

impl GlobalDispatch<OrgKdeKwinOutputmanagement, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<OrgKdeKwinOutputmanagement>,
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

        if let Some(management) = state.output_management.as_mut() {
            management.global.bind(resource);
        }
    }
}

impl Dispatch<OrgKdeKwinOutputmanagement, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &OrgKdeKwinOutputmanagement,
        request: org_kde_kwin_outputmanagement::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            org_kde_kwin_outputmanagement::Request::CreateConfiguration { id } => {
                let serial = state.next_serial();
                let Some(configuration) = state.clients.init_child(
                    client,
                    resource,
                    id,
                    ConfigurationData::new(serial),
                    data_init,
                    &mut state.events,
                ) else {
                    return;
                };
                debug!("Output configuration {} created", serial);

                if let Some(management) = state.output_management.as_mut() {
                    management.configurations.insert(configuration);
                }
            }
        }
    }

    fn destroyed(
        state: &mut Self,
        client: ClientId,
        resource: &OrgKdeKwinOutputmanagement,
        _data: &(),
    ) {
        state.clients.forget(&client, &resource.id());
        if let Some(management) = state.output_management.as_mut() {
            management.global.unbind(resource);
        }
    }
}

fn stage(
    configuration: &OrgKdeKwinOutputconfiguration,
    data: &ConfigurationData,
    outputdevice: &OrgKdeKwinOutputdevice,
    change: impl FnOnce(&mut DeviceChanges),
) {
    let Some(device) = outputdevice.data::<DeviceId>().copied() else {
        warn!("Output configuration references a foreign object");
        return;
    };

    if let Err(e) = data.transaction().stage(device, change) {
        configuration.post_error(
            org_kde_kwin_outputconfiguration::Error::AlreadyApplied,
            e.to_string(),
        );
    }
}

impl Dispatch<OrgKdeKwinOutputconfiguration, ConfigurationData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &OrgKdeKwinOutputconfiguration,
        request: org_kde_kwin_outputconfiguration::Request,
        data: &ConfigurationData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        use org_kde_kwin_outputconfiguration::{Error, Request};

        match request {
            Request::Enable {
                outputdevice,
                enable,
            } => stage(resource, data, &outputdevice, |c| c.enabled = Some(enable != 0)),
            Request::Mode {
                outputdevice,
                mode_id,
            } => stage(resource, data, &outputdevice, |c| c.mode_id = Some(mode_id)),
            Request::Transform {
                outputdevice,
                transform,
            } => match Transform::from_wire(transform) {
                Some(transform) => stage(resource, data, &outputdevice, |c| {
                    c.transform = Some(transform)
                }),
                None => resource.post_error(
                    Error::InvalidTransform,
                    format!("{} is not a valid transform", transform),
                ),
            },
            Request::Position { outputdevice, x, y } => {
                stage(resource, data, &outputdevice, |c| c.position = Some((x, y)))
            }
            Request::Scale {
                outputdevice,
                scale,
            } => {
                if scale < 1 {
                    resource.post_error(
                        Error::InvalidScale,
                        format!("scale {} is smaller than one", scale),
                    );
                } else {
                    stage(resource, data, &outputdevice, |c| c.scale = Some(scale));
                }
            }
            Request::Apply => {
                let mut transaction = data.transaction();
                if !transaction.is_pending() {
                    resource.post_error(
                        Error::AlreadyApplied,
                        "configuration has already been applied",
                    );
                    return;
                }

                let serial = transaction.serial();
                match state.apply_output_configuration(&mut transaction) {
                    Ok(devices) => {
                        info!(
                            "✅ Output configuration {} applied to {} devices",
                            serial,
                            devices.len()
                        );
                        resource.applied();
                        state
                            .events
                            .push(ServerEvent::ConfigurationApplied { serial, devices });
                    }
                    Err(reason) => {
                        warn!("Output configuration {} failed: {}", serial, reason);
                        resource.failed();
                        state
                            .events
                            .push(ServerEvent::ConfigurationFailed { serial, reason });
                    }
                }
            }
            // Cancellation happens in `destroyed`
            Request::Destroy => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        client: ClientId,
        resource: &OrgKdeKwinOutputconfiguration,
        data: &ConfigurationData,
    ) {
        state.clients.forget(&client, &resource.id());
        if let Some(management) = state.output_management.as_mut() {
            management.configurations.remove(resource);
        }

        let mut transaction = data.transaction();
        if transaction.cancel() {
            debug!(
                "Output configuration {} cancelled before apply",
                transaction.serial()
            );
        }
    }
}
