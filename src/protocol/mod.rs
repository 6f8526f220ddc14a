//! Generated server bindings for the KDE protocol extensions
//!
//! The wire definitions live in `protocols/` and are turned into typed
//! resources at compile time by `wayland-scanner`. Each submodule mirrors one
//! XML file:
//!
//! - `output_device`: `org_kde_kwin_outputdevice`
//! - `output_management`: `org_kde_kwin_outputmanagement` and
//!   `org_kde_kwin_outputconfiguration`
//! - `virtual_desktop`: `org_kde_plasma_virtual_desktop_management` and
//!   `org_kde_plasma_virtual_desktop`
//!
//! Opcodes, argument order and `since` versions come straight from the XML,
//! so third-party clients speaking the published protocols interoperate.

#![allow(dead_code, non_camel_case_types, unused_unsafe, unused_variables)]
#![allow(non_upper_case_globals, non_snake_case, unused_imports)]
#![allow(missing_docs, clippy::all)]

pub mod output_device {
    use wayland_server;
    use wayland_server::protocol::*;

    pub mod __interfaces {
        use wayland_server::protocol::__interfaces::*;
        wayland_scanner::generate_interfaces!("protocols/outputdevice.xml");
    }
    use self::__interfaces::*;

    wayland_scanner::generate_server_code!("protocols/outputdevice.xml");
}

pub mod output_management {
    use super::output_device::*;
    use wayland_server;
    use wayland_server::protocol::*;

    pub mod __interfaces {
        use super::super::output_device::__interfaces::*;
        use wayland_server::protocol::__interfaces::*;
        wayland_scanner::generate_interfaces!("protocols/outputmanagement.xml");
    }
    use self::__interfaces::*;

    wayland_scanner::generate_server_code!("protocols/outputmanagement.xml");
}

pub mod virtual_desktop {
    use wayland_server;
    use wayland_server::protocol::*;

    pub mod __interfaces {
        use wayland_server::protocol::__interfaces::*;
        wayland_scanner::generate_interfaces!("protocols/plasma-virtual-desktop.xml");
    }
    use self::__interfaces::*;

    wayland_scanner::generate_server_code!("protocols/plasma-virtual-desktop.xml");
}

pub use self::output_device::org_kde_kwin_outputdevice;
pub use self::output_management::{
    org_kde_kwin_outputconfiguration, org_kde_kwin_outputmanagement,
};
pub use self::virtual_desktop::{
    org_kde_plasma_virtual_desktop, org_kde_plasma_virtual_desktop_management,
};
