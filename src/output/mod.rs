//! Output devices and transactional output configuration
//!
//! - `device`: server-side model of a display plus its `org_kde_kwin_outputdevice` global
//! - `configuration`: staged change-sets applied all-or-nothing
//! - `management`: the `org_kde_kwin_outputmanagement` global that hands out configurations

pub mod configuration;
pub mod device;
pub mod management;

pub use configuration::{OutputConfiguration, TransactionState};
pub use device::{
    DeviceChanges, DeviceId, DeviceState, Mode, ModeFlags, OutputDeviceInterface, Subpixel,
    Transform,
};
pub use management::OutputManagementInterface;
