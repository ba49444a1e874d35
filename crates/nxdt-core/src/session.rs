//! Host server - orchestrates device discovery and the command dispatcher
//! loop on a dedicated worker.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::{HostEvent, HostObserver, LogLevel, TracingObserver};
use crate::protocol::constants::{USB_CMD_HEADER_SIZE, USB_TRANSFER_TIMEOUT};
use crate::protocol::{CommandHeader, CommandId, StatusCode};
use crate::state::handlers::{handle_command, send_status, HandleOutcome, HandlerContext};
use crate::state::machine::ServerState;
use crate::transport::{RusbTransport, TransportError, UsbTransport};

/// Host-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory the received files are written under. Created if missing.
    pub output_dir: PathBuf,
    /// Skip the advisory free-space comparison before opening output files.
    #[serde(default)]
    pub disable_free_space_check: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("nxdumptool"),
            disable_free_space_check: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Handle for requesting a cooperative stop from another thread.
///
/// The worker observes the flag at every transfer poll, so a blocked bulk
/// call returns within the poll timeout.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The host server. Owns all protocol state; the shell interacts only
/// through the stop handle and the observer event stream.
pub struct HostServer<O: HostObserver> {
    config: ServerConfig,
    observer: Arc<O>,
    stop: Arc<AtomicBool>,
}

impl HostServer<TracingObserver> {
    /// Create a server with the default tracing observer.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: HostObserver + 'static> HostServer<O> {
    pub fn with_observer(config: ServerConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            observer,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    fn emit(&self, event: HostEvent) {
        self.observer.on_event(&event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(HostEvent::Log {
            level,
            message: message.into(),
        });
    }

    /// Run one server lifetime: wait for a console, serve its session, and
    /// release everything. `ServerStopped` is emitted on every exit path.
    pub fn run(&self) -> Result<()> {
        let result = self.run_inner();
        self.emit(HostEvent::ServerStopped);
        result
    }

    fn run_inner(&self) -> Result<()> {
        fs::create_dir_all(&self.config.output_dir)
            .context("failed to create output directory")?;

        self.log(
            LogLevel::Info,
            "Please connect a Nintendo Switch console running nxdumptool.",
        );

        let transport = match RusbTransport::wait_for_device(self.stop.clone()) {
            Ok(t) => t,
            Err(TransportError::Stopped) => return Ok(()),
            Err(e) => {
                self.log(LogLevel::Error, format!("USB initialization failed: {}", e));
                return Err(e.into());
            }
        };

        self.emit(HostEvent::DeviceConnected {
            max_packet_size: transport.max_packet_size(),
            usb_version: transport.usb_version().to_string(),
        });
        self.log(
            LogLevel::Debug,
            format!(
                "Successfully connected! Max packet size: 0x{:x}, USB {}",
                transport.max_packet_size(),
                transport.usb_version()
            ),
        );
        self.log(
            LogLevel::Info,
            "Exit nxdumptool on your console or disconnect it to stop the server.",
        );

        self.serve(&transport)
    }

    /// Drive the command dispatcher loop over an established transport.
    ///
    /// The console drives all state transitions; this loop is reactive. It
    /// terminates on end-of-session, fatal protocol or transport errors, or
    /// a user stop.
    pub fn serve<T: UsbTransport>(&self, transport: &T) -> Result<()> {
        let mut state = ServerState::new();

        loop {
            let header_bytes = match transport.read(USB_CMD_HEADER_SIZE, None) {
                Ok(b) => b,
                Err(TransportError::Stopped) => break,
                Err(e) => {
                    self.log(LogLevel::Error, "Failed to read command header!");
                    debug!(error = %e, "Command header read error");
                    break;
                }
            };
            if header_bytes.len() != USB_CMD_HEADER_SIZE {
                self.log(LogLevel::Error, "Failed to read command header!");
                break;
            }

            let header = match CommandHeader::from_bytes(&header_bytes) {
                Ok(h) => h,
                Err(_) => break,
            };

            self.log(
                LogLevel::Debug,
                format!(
                    "Command header: ID={}, block size=0x{:x}",
                    header.cmd_id, header.block_size
                ),
            );

            // The declared block is consumed even when the magic turns out
            // to be bad, so the stream stays in sync.
            let block = if header.block_size > 0 {
                match transport.read_framed(header.block_size as usize, Some(USB_TRANSFER_TIMEOUT))
                {
                    Ok(b) if b.len() == header.block_size as usize => b,
                    Ok(_) => {
                        self.log(
                            LogLevel::Error,
                            format!(
                                "Failed to read command block (expected 0x{:x} bytes)!",
                                header.block_size
                            ),
                        );
                        break;
                    }
                    Err(TransportError::Stopped) => break,
                    Err(e) => {
                        self.log(
                            LogLevel::Error,
                            format!(
                                "Failed to read command block (expected 0x{:x} bytes)!",
                                header.block_size
                            ),
                        );
                        debug!(error = %e, "Command block read error");
                        break;
                    }
                }
            } else {
                Vec::new()
            };

            if !header.has_valid_magic() {
                self.log(LogLevel::Error, "Invalid magic word in command header!");
                if send_status(transport, StatusCode::InvalidMagicWord).is_err() {
                    break;
                }
                continue;
            }

            let mut ctx = HandlerContext {
                transport,
                observer: self.observer.as_ref(),
                state: &mut state,
                config: &self.config,
            };

            match handle_command(&header, &block, &mut ctx) {
                HandleOutcome::Stopped => break,
                HandleOutcome::Reply(status) => {
                    let write_ok = send_status(transport, status).is_ok();
                    if !write_ok
                        || header.cmd_id == CommandId::EndSession as u32
                        || status == StatusCode::UnsupportedAbiVersion
                    {
                        break;
                    }
                }
            }
        }

        if !self.stop.load(Ordering::Relaxed) {
            self.log(LogLevel::Info, "Stopping server");
        }
        info!("Command loop terminated");

        Ok(())
    }
}
