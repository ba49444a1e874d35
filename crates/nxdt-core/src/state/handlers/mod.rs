//! Command handlers - dispatch logic for each command id.
//!
//! This module is split into submodules by functionality:
//! - `control`: session control (StartSession, EndSession)
//! - `file`: SendFileProperties and the chunked receive loop
//! - `nsp`: NSP assembly commands (SendNspHeader, CancelFileTransfer)
//! - `fsdump`: advisory extracted-FS dump markers

mod control;
mod file;
mod fsdump;
mod nsp;

use tracing::error;

use crate::events::{HostEvent, HostObserver, LogLevel};
use crate::protocol::constants::USB_TRANSFER_TIMEOUT;
use crate::protocol::{CommandHeader, CommandId, StatusCode, StatusResponse};
use crate::session::ServerConfig;
use crate::state::machine::ServerState;
use crate::transport::{TransportError, UsbTransport};

/// Result of handling one command.
#[derive(Debug)]
pub enum HandleOutcome {
    /// Write this status to the console; the dispatcher decides whether the
    /// loop continues.
    Reply(StatusCode),
    /// A user stop landed mid-command. Exit without writing a status.
    Stopped,
}

/// Resources available to command handlers.
pub struct HandlerContext<'a, T: UsbTransport, O: HostObserver> {
    pub transport: &'a T,
    pub observer: &'a O,
    pub state: &'a mut ServerState,
    pub config: &'a ServerConfig,
}

impl<'a, T: UsbTransport, O: HostObserver> HandlerContext<'a, T, O> {
    pub(crate) fn emit(&self, event: HostEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(HostEvent::Log {
            level,
            message: message.into(),
        });
    }
}

/// Encode and write a status response. Every accepted command elicits
/// exactly one of these; SendFileProperties additionally writes one before
/// its data phase.
pub fn send_status<T: UsbTransport>(
    transport: &T,
    status: StatusCode,
) -> Result<(), TransportError> {
    let response = StatusResponse::new(status, transport.max_packet_size());
    transport.write(&response.to_bytes(), Some(USB_TRANSFER_TIMEOUT))
}

/// Route one command to its handler.
pub fn handle_command<T: UsbTransport, O: HostObserver>(
    header: &CommandHeader,
    block: &[u8],
    ctx: &mut HandlerContext<'_, T, O>,
) -> HandleOutcome {
    match CommandId::from_u32(header.cmd_id) {
        Some(CommandId::StartSession) => control::handle_start_session(block, ctx),
        Some(CommandId::SendFileProperties) => file::handle_send_file_properties(block, ctx),
        Some(CommandId::CancelFileTransfer) => nsp::handle_cancel_file_transfer(ctx),
        Some(CommandId::SendNspHeader) => nsp::handle_send_nsp_header(block, ctx),
        Some(CommandId::EndSession) => control::handle_end_session(ctx),
        Some(CommandId::StartExtractedFsDump) => fsdump::handle_start_extracted_fs_dump(block, ctx),
        Some(CommandId::EndExtractedFsDump) => fsdump::handle_end_extracted_fs_dump(ctx),
        None => {
            error!(cmd_id = header.cmd_id, "Unsupported command id");
            ctx.log(
                LogLevel::Error,
                format!("Unsupported command ID: {}", header.cmd_id),
            );
            HandleOutcome::Reply(StatusCode::UnsupportedCmd)
        }
    }
}
