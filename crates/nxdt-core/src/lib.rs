//! nxdt-core: host-side endpoint for the nxdumptool USB transfer protocol.
//!
//! This crate implements the host half of the bulk-USB protocol spoken by
//! the `nxdumptool` Nintendo Switch homebrew: the console initiates a
//! session, streams files (optionally reassembled into NSP containers), and
//! the host persists them to a configured output directory. The console
//! drives all state transitions; the host is reactive.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, command header / status response codecs, the
//!   ZLT framing rule
//! - **Transport**: Bulk USB abstraction (rusb, mock) with polled timeouts
//!   and cooperative stop
//! - **State**: Session and NSP assembly state, per-command handlers
//! - **Events**: Observer stream for shell decoupling
//! - **Session**: High-level orchestrator (device wait loop + dispatcher)
//!
//! # Example
//!
//! ```no_run
//! use nxdt_core::session::{HostServer, ServerConfig};
//!
//! let config = ServerConfig {
//!     output_dir: "dumps".into(),
//!     ..Default::default()
//! };
//!
//! let server = HostServer::new(config);
//! server.run().expect("server failed");
//! ```

pub mod events;
pub mod fsutil;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
pub use events::{HostEvent, HostObserver, LogLevel, NullObserver, TracingObserver};
pub use protocol::{CommandHeader, CommandId, StatusCode, StatusResponse};
pub use session::{HostServer, ServerConfig, StopHandle};
pub use transport::{MockTransport, RusbTransport, TransportError, UsbTransport};
