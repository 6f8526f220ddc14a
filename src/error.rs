//! Error types for the server runtime

use thiserror::Error;

use crate::output::device::DeviceId;

/// Failures of the display and its event loop
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("failed to initialise the wayland display: {0}")]
    Init(#[from] wayland_server::backend::InitError),

    #[error("failed to bind socket `{name}`: {source}")]
    Bind {
        name: String,
        #[source]
        source: wayland_server::BindError,
    },

    #[error("event loop error: {0}")]
    EventLoop(#[from] calloop::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("display is already running")]
    AlreadyRunning,

    #[error("display is not running")]
    NotRunning,
}

/// Reasons an output configuration cannot be applied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("configuration has already been applied")]
    AlreadyApplied,

    #[error("output device {0} no longer exists")]
    UnknownDevice(DeviceId),

    #[error("output device {device} has no mode with id {mode_id}")]
    UnknownMode { device: DeviceId, mode_id: i32 },
}

/// Result type for display operations
pub type Result<T> = std::result::Result<T, DisplayError>;
