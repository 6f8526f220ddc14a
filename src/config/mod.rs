//! Configuration management for plasma-server
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It covers:
//! - The display socket and per-client limits
//! - Output devices advertised at startup
//! - The initial virtual desktop grid
//! - Log verbosity

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::DEFAULT_MAX_RESOURCES_PER_CLIENT;
use crate::output::device::{
    DeviceState, ModeFlags, Subpixel, Transform, DEFAULT_REFRESH_RATE,
};

/// Where the binary looks for its configuration by default
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/plasma-server/server.toml";

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Socket and dispatch settings
    #[serde(default)]
    pub display: DisplayConfig,

    /// Output devices created at startup
    #[serde(default = "ServerConfig::default_outputs")]
    pub outputs: Vec<OutputConfig>,

    /// Initial virtual desktop layout
    #[serde(default)]
    pub virtual_desktops: VirtualDesktopConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    /// Socket name under `XDG_RUNTIME_DIR`, or "auto" for the first free one
    #[serde(default = "DisplayConfig::default_socket_name")]
    pub socket_name: String,

    /// Live objects a single client may own before it is disconnected
    #[serde(default = "DisplayConfig::default_max_resources")]
    pub max_resources_per_client: usize,

    /// Upper bound for one loop iteration (milliseconds)
    #[serde(default = "DisplayConfig::default_dispatch_timeout")]
    pub dispatch_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "OutputConfig::default_manufacturer")]
    pub manufacturer: String,

    #[serde(default = "OutputConfig::default_model")]
    pub model: String,

    #[serde(default)]
    pub serial_number: String,

    #[serde(default)]
    pub uuid: String,

    /// Raw EDID, base64 encoded
    #[serde(default)]
    pub edid: String,

    /// Physical size in millimetres
    #[serde(default)]
    pub physical_width_mm: i32,
    #[serde(default)]
    pub physical_height_mm: i32,

    /// Position in the global compositor space
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,

    #[serde(default = "OutputConfig::default_scale")]
    pub scale: i32,

    #[serde(default)]
    pub transform: Transform,

    #[serde(default)]
    pub subpixel: Subpixel,

    #[serde(default = "OutputConfig::default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub modes: Vec<ModeConfig>,

    /// Index into `modes` of the mode in use
    #[serde(default)]
    pub current_mode: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModeConfig {
    pub width: i32,
    pub height: i32,

    /// Refresh rate in mHz
    #[serde(default = "ModeConfig::default_refresh")]
    pub refresh_mhz: i32,

    #[serde(default)]
    pub preferred: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualDesktopConfig {
    #[serde(default = "VirtualDesktopConfig::default_rows")]
    pub rows: u32,

    /// Desktops in creation order
    #[serde(default)]
    pub desktops: Vec<DesktopConfig>,

    /// Id of the desktop that starts active, the first one otherwise
    #[serde(default)]
    pub active: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesktopConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            display: DisplayConfig::default(),
            outputs: Self::default_outputs(),
            virtual_desktops: VirtualDesktopConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            socket_name: Self::default_socket_name(),
            max_resources_per_client: Self::default_max_resources(),
            dispatch_timeout_ms: Self::default_dispatch_timeout(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            manufacturer: Self::default_manufacturer(),
            model: Self::default_model(),
            serial_number: String::new(),
            uuid: String::new(),
            edid: String::new(),
            physical_width_mm: 0,
            physical_height_mm: 0,
            x: 0,
            y: 0,
            scale: Self::default_scale(),
            transform: Transform::Normal,
            subpixel: Subpixel::Unknown,
            enabled: Self::default_enabled(),
            modes: Vec::new(),
            current_mode: 0,
        }
    }
}

impl Default for VirtualDesktopConfig {
    fn default() -> Self {
        Self {
            rows: Self::default_rows(),
            desktops: vec![
                DesktopConfig {
                    id: "desktop-1".to_string(),
                    name: "Desktop 1".to_string(),
                },
                DesktopConfig {
                    id: "desktop-2".to_string(),
                    name: "Desktop 2".to_string(),
                },
            ],
            active: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl ServerConfig {
    fn default_outputs() -> Vec<OutputConfig> {
        vec![OutputConfig {
            physical_width_mm: 600,
            physical_height_mm: 340,
            modes: vec![
                ModeConfig {
                    width: 1920,
                    height: 1080,
                    refresh_mhz: DEFAULT_REFRESH_RATE,
                    preferred: true,
                },
                ModeConfig {
                    width: 1280,
                    height: 720,
                    refresh_mhz: DEFAULT_REFRESH_RATE,
                    preferred: false,
                },
            ],
            ..OutputConfig::default()
        }]
    }
}

impl DisplayConfig {
    fn default_socket_name() -> String {
        "wayland-0".to_string()
    }
    fn default_max_resources() -> usize {
        DEFAULT_MAX_RESOURCES_PER_CLIENT
    }
    fn default_dispatch_timeout() -> u64 {
        16
    }
}

impl OutputConfig {
    fn default_manufacturer() -> String {
        "org.kde.kwin".to_string()
    }
    fn default_model() -> String {
        "none".to_string()
    }
    fn default_scale() -> i32 {
        1
    }
    fn default_enabled() -> bool {
        true
    }

    /// Device state this entry describes
    pub fn device_state(&self) -> DeviceState {
        let mut state = DeviceState::new();
        for (index, mode) in self.modes.iter().enumerate() {
            let mut flags = ModeFlags::empty();
            if index == self.current_mode {
                flags |= ModeFlags::CURRENT;
            }
            if mode.preferred {
                flags |= ModeFlags::PREFERRED;
            }
            state.add_mode(mode.width, mode.height, mode.refresh_mhz, flags);
        }
        state.physical_size = (self.physical_width_mm, self.physical_height_mm);
        state.global_position = (self.x, self.y);
        state.scale = self.scale;
        state.transform = self.transform;
        state.subpixel = self.subpixel;
        state.enabled = self.enabled;
        state.manufacturer = self.manufacturer.clone();
        state.model = self.model.clone();
        state.serial_number = self.serial_number.clone();
        state.uuid = self.uuid.clone();
        state.edid = self.edid.clone();
        state
    }
}

impl ModeConfig {
    fn default_refresh() -> i32 {
        DEFAULT_REFRESH_RATE
    }
}

impl VirtualDesktopConfig {
    fn default_rows() -> u32 {
        1
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

/// Expand a leading `~` to `$HOME`
fn expand_home(path: &Path) -> Result<PathBuf> {
    if path.to_string_lossy().starts_with('~') {
        let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
        Ok(Path::new(&home).join(path.strip_prefix("~").unwrap_or(path)))
    } else {
        Ok(path.to_path_buf())
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_home(path.as_ref())?;

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: ServerConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.display.socket_name.is_empty() {
            anyhow::bail!("Invalid socket_name: must not be empty");
        }
        if self.display.socket_name.contains('/') {
            anyhow::bail!(
                "Invalid socket_name {:?}: must be a plain name",
                self.display.socket_name
            );
        }
        if self.display.max_resources_per_client == 0 {
            anyhow::bail!("Invalid max_resources_per_client: must be at least 1");
        }

        for (index, output) in self.outputs.iter().enumerate() {
            if output.scale < 1 {
                anyhow::bail!("Invalid scale for output {}: must be at least 1", index);
            }
            if output.modes.is_empty() {
                anyhow::bail!("Invalid output {}: at least one mode is required", index);
            }
            if output.current_mode >= output.modes.len() {
                anyhow::bail!(
                    "Invalid current_mode for output {}: only {} modes defined",
                    index,
                    output.modes.len()
                );
            }
            for mode in &output.modes {
                if mode.width <= 0 || mode.height <= 0 {
                    anyhow::bail!(
                        "Invalid mode {}x{} for output {}: size must be positive",
                        mode.width,
                        mode.height,
                        index
                    );
                }
                if mode.refresh_mhz <= 0 {
                    anyhow::bail!(
                        "Invalid refresh rate {} for output {}",
                        mode.refresh_mhz,
                        index
                    );
                }
            }
        }

        let desktops = &self.virtual_desktops;
        if desktops.rows == 0 {
            anyhow::bail!("Invalid rows: must be at least 1");
        }
        let mut seen = HashSet::new();
        for desktop in &desktops.desktops {
            if desktop.id.is_empty() {
                anyhow::bail!("Invalid desktop: id must not be empty");
            }
            if !seen.insert(desktop.id.as_str()) {
                anyhow::bail!("Duplicate desktop id: {}", desktop.id);
            }
        }
        if let Some(active) = &desktops.active {
            if !seen.contains(active.as_str()) {
                anyhow::bail!("Active desktop {} is not defined", active);
            }
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace", "off"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        Ok(())
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = expand_home(path.as_ref())?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }
        fs::write(&path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}
