//! Event stream for shell decoupling.
//!
//! The worker emits log records, progress lifecycle events, and a terminal
//! `ServerStopped` event; any shell (CLI, GUI) consumes them through the
//! `HostObserver` trait without coupling to the protocol core.

use std::fmt;

/// Log severity carried by `HostEvent::Log`. Wire order 0..=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by the host server worker.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A console was found, claimed, and its endpoints resolved.
    DeviceConnected {
        max_packet_size: u16,
        usb_version: String,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// A transfer large enough for progress reporting began.
    ProgressStart { total: u64, filename: String },
    /// Data-phase progress tick.
    ProgressUpdate {
        current: u64,
        total: u64,
        filename: String,
    },
    /// The tracked transfer finished, failed, or was cancelled.
    ProgressEnd,
    /// The worker is about to exit. Always the last event.
    ServerStopped,
}

/// Observer trait for receiving host events.
///
/// Implementations must be callable from the worker thread.
pub trait HostObserver: Send + Sync {
    fn on_event(&self, event: &HostEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl HostObserver for NullObserver {
    fn on_event(&self, _event: &HostEvent) {}
}

/// Observer that forwards events to `tracing`.
pub struct TracingObserver;

impl HostObserver for TracingObserver {
    fn on_event(&self, event: &HostEvent) {
        match event {
            HostEvent::DeviceConnected {
                max_packet_size,
                usb_version,
            } => {
                tracing::info!(
                    max_packet_size = %format!("0x{:x}", max_packet_size),
                    usb = %usb_version,
                    "Device connected"
                );
            }
            HostEvent::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            HostEvent::ProgressStart { total, filename } => {
                tracing::info!(total = *total, file = %filename, "Transfer started");
            }
            HostEvent::ProgressUpdate {
                current,
                total,
                filename,
            } => {
                let pct = if *total > 0 { (*current * 100) / *total } else { 0 };
                tracing::debug!(progress = %format!("{}%", pct), file = %filename, "Transfer progress");
            }
            HostEvent::ProgressEnd => {
                tracing::debug!("Transfer ended");
            }
            HostEvent::ServerStopped => {
                tracing::info!("Server stopped");
            }
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}
