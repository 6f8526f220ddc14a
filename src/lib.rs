//! # plasma-server
//!
//! Server-side runtime for the KDE Plasma Wayland protocol extensions:
//! output devices, output configuration transactions and the virtual
//! desktop grid.
//!
//! ## Architecture
//!
//! - `display`: wayland display, listening socket and the calloop dispatch loop
//! - `state`: `ServerState`, the dispatch target owning every model
//! - `client`: per-client connections and resource quotas
//! - `global`: global lifetime and per-global resource bookkeeping
//! - `output`: `org_kde_kwin_outputdevice` and `org_kde_kwin_outputmanagement`
//! - `virtual_desktop`: `org_kde_plasma_virtual_desktop_management`
//! - `protocol`: code generated from the protocol XML
//! - `config`: TOML configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use plasma_server::{Display, ServerConfig, StartMode};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let mut display = Display::new(&config.display)?;
//!     display.state_mut().populate_from_config(&config);
//!     display.start(StartMode::ConnectToSocket)?;
//!     display.run()?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod display;
pub mod error;
pub mod global;
pub mod output;
pub mod protocol;
pub mod state;
pub mod virtual_desktop;

// Re-export main types for easy access
pub use config::ServerConfig;
pub use display::{Display, StartMode};
pub use error::{ConfigurationError, DisplayError};
pub use output::{
    DeviceChanges, DeviceId, DeviceState, ModeFlags, OutputConfiguration,
    OutputDeviceInterface, OutputManagementInterface, Subpixel, Transform, TransactionState,
};
pub use state::{ServerEvent, ServerState};
pub use virtual_desktop::{VirtualDesktopInterface, VirtualDesktopManagementInterface};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
