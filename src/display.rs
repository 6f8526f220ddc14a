//! Display: wayland display, listening socket and the dispatch loop
//!
//! The wayland display and the listener are registered as level-triggered
//! `calloop` sources, so the only thing that crosses from the OS into the
//! loop is readiness. Every dispatch is followed by reaping closed clients
//! and a flush, which keeps outbound events from sitting in buffers while
//! the loop idles.
//!
//! Two start modes are supported:
//! - `ConnectToSocket` binds a named socket under `XDG_RUNTIME_DIR`
//! - `ConnectClientsOnly` skips the socket; clients are handed in through
//!   [`Display::create_client`]

use std::os::unix::net::UnixStream;
use std::time::Duration;

use calloop::generic::Generic;
use calloop::{EventLoop, Interest, LoopSignal, Mode, PostAction, RegistrationToken};
use log::{debug, info, warn};
use wayland_server::backend::ClientId;
use wayland_server::ListeningSocket;

use crate::client::ClientConnection;
use crate::config::DisplayConfig;
use crate::error::{DisplayError, Result};
use crate::state::{ServerEvent, ServerState};

/// Socket name that asks for the first free `wayland-N`
pub const AUTO_SOCKET_NAME: &str = "auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    ConnectToSocket,
    ConnectClientsOnly,
}

pub struct Display {
    event_loop: EventLoop<'static, ServerState>,
    state: ServerState,
    socket_name: String,
    bound_socket: Option<String>,
    display_token: Option<RegistrationToken>,
    listener_token: Option<RegistrationToken>,
    running: bool,
    terminated: bool,
}

impl Display {
    pub fn new(config: &DisplayConfig) -> Result<Self> {
        let display: wayland_server::Display<ServerState> = wayland_server::Display::new()?;
        let state = ServerState::new(display.handle(), config.max_resources_per_client);
        let event_loop: EventLoop<'static, ServerState> = EventLoop::try_new()?;

        let display_token = event_loop
            .handle()
            .insert_source(
                Generic::new(display, Interest::READ, Mode::Level),
                |_, display, state| {
                    // SAFETY: the display is only dropped by removing this source
                    let display = unsafe { display.get_mut() };
                    if let Err(e) = display.dispatch_clients(state) {
                        warn!("Failed to dispatch clients: {}", e);
                    }
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|e| e.error)?;

        Ok(Self {
            event_loop,
            state,
            socket_name: config.socket_name.clone(),
            bound_socket: None,
            display_token: Some(display_token),
            listener_token: None,
            running: false,
            terminated: false,
        })
    }

    /// Start accepting clients.
    ///
    /// A socket that cannot be bound is reported and leaves the display
    /// stopped, so the caller may retry with another name.
    pub fn start(&mut self, mode: StartMode) -> Result<()> {
        if self.terminated {
            return Err(DisplayError::NotRunning);
        }
        if self.running {
            return Err(DisplayError::AlreadyRunning);
        }

        if mode == StartMode::ConnectToSocket {
            let listener = if self.socket_name == AUTO_SOCKET_NAME {
                ListeningSocket::bind_auto("wayland", 1..33)
            } else {
                ListeningSocket::bind(&self.socket_name)
            }
            .map_err(|source| DisplayError::Bind {
                name: self.socket_name.clone(),
                source,
            })?;

            let bound = listener
                .socket_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.socket_name.clone());

            let token = self
                .event_loop
                .handle()
                .insert_source(
                    Generic::new(listener, Interest::READ, Mode::Level),
                    |_, listener, state| {
                        // SAFETY: the listener is only dropped by removing this source
                        let listener = unsafe { listener.get_mut() };
                        loop {
                            match listener.accept() {
                                Ok(Some(stream)) => {
                                    if let Err(e) = state.insert_client(stream) {
                                        warn!("Failed to insert client: {}", e);
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!("Failed to accept client: {}", e);
                                    break;
                                }
                            }
                        }
                        Ok(PostAction::Continue)
                    },
                )
                .map_err(|e| e.error)?;

            info!("📡 Listening on {}", bound);
            self.listener_token = Some(token);
            self.bound_socket = Some(bound);
        }

        self.running = true;
        debug!("Display started in {:?} mode", mode);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Name of the bound socket, once started with `ConnectToSocket`
    pub fn socket_name(&self) -> Option<&str> {
        self.bound_socket.as_deref()
    }

    /// Register an already connected stream as a client
    pub fn create_client(&mut self, stream: UnixStream) -> Result<ClientId> {
        if self.terminated {
            return Err(DisplayError::NotRunning);
        }
        Ok(self.state.insert_client(stream)?)
    }

    /// Process one batch of ready sources, waiting at most `timeout`,
    /// then reap closed clients and flush.
    pub fn dispatch_events(&mut self, timeout: Option<Duration>) -> Result<()> {
        if !self.running {
            return Err(DisplayError::NotRunning);
        }
        self.event_loop.dispatch(timeout, &mut self.state)?;
        self.state.reap_disconnected();
        self.state.flush();
        Ok(())
    }

    /// Drive the loop until [`LoopSignal::stop`] is called
    pub fn run(&mut self) -> Result<()> {
        if !self.running {
            return Err(DisplayError::NotRunning);
        }
        self.event_loop.run(None, &mut self.state, |state| {
            state.reap_disconnected();
            state.flush();
        })?;
        Ok(())
    }

    pub fn loop_signal(&self) -> LoopSignal {
        self.event_loop.get_signal()
    }

    /// Notify every global, then close the listener and all clients.
    ///
    /// Calling it again does nothing.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        info!("🛑 Terminating display");

        self.state.about_to_terminate();

        let handle = self.event_loop.handle();
        if let Some(token) = self.listener_token.take() {
            handle.remove(token);
        }
        if let Some(token) = self.display_token.take() {
            handle.remove(token);
        }
        self.running = false;
        self.bound_socket = None;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn next_serial(&mut self) -> u32 {
        self.state.next_serial()
    }

    pub fn serial(&self) -> u32 {
        self.state.serial()
    }

    pub fn take_events(&mut self) -> Vec<ServerEvent> {
        self.state.take_events()
    }

    /// Connections of every client currently attached
    pub fn connections(&self) -> impl Iterator<Item = &ClientConnection> {
        self.state.clients().connections()
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ServerState {
        &mut self.state
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.terminate();
    }
}
