//! # plasma-server
//!
//! Standalone Wayland server advertising the KDE output management and
//! virtual desktop protocols. Outputs and desktops come from the TOML
//! configuration; clients connect over the configured socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use plasma_server::config::DEFAULT_CONFIG_PATH;
use plasma_server::{Display, ServerConfig, ServerEvent, StartMode};

#[derive(Parser, Debug)]
#[command(name = "plasma-server")]
#[command(about = "Wayland server for KDE output management and virtual desktops")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Socket name, overrides the configuration ("auto" picks a free one)
    #[arg(short, long)]
    socket: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration before logging so its level can apply
    let loaded = ServerConfig::load(&cli.config);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => ServerConfig::default(),
    };

    let level = if cli.debug {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("🚀 Starting plasma-server");
    info!(
        "📄 Version: {} ({} {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT"),
        env!("BUILD_DATE")
    );

    match loaded {
        Ok(_) => info!("✅ Configuration loaded from: {}", cli.config),
        Err(e) => {
            error!("❌ Failed to load configuration: {:#}", e);
            info!("📝 Using default configuration");
        }
    }

    if let Some(socket) = cli.socket {
        info!("🔌 Socket overridden via CLI: {}", socket);
        config.display.socket_name = socket;
    }

    let mut display = Display::new(&config.display).context("Failed to create display")?;
    display.state_mut().populate_from_config(&config);
    display
        .start(StartMode::ConnectToSocket)
        .context("Failed to start display")?;

    if let Some(name) = display.socket_name() {
        info!("🌐 WAYLAND_DISPLAY={}", name);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        let signal = display.loop_signal();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            signal.wakeup();
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let timeout = Duration::from_millis(config.display.dispatch_timeout_ms);
    while !shutdown.load(Ordering::SeqCst) {
        display.dispatch_events(Some(timeout))?;
        for event in display.take_events() {
            log_event(&event);
        }
    }

    display.terminate();
    info!("👋 plasma-server stopped");
    Ok(())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnected(id) => info!("Client connected: {:?}", id),
        ServerEvent::ClientDisconnected(id) => info!("Client disconnected: {:?}", id),
        ServerEvent::ConfigurationApplied { serial, devices } => {
            info!("Configuration {} applied to {:?}", serial, devices)
        }
        ServerEvent::ConfigurationFailed { serial, reason } => {
            info!("Configuration {} failed: {}", serial, reason)
        }
        ServerEvent::DesktopActivationRequested { id } => {
            info!("Activation of desktop {} requested", id)
        }
    }
}
