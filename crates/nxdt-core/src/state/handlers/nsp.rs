//! NSP assembly handlers (SendNspHeader, standalone CancelFileTransfer).

use tracing::debug;

use crate::events::{HostObserver, LogLevel};
use crate::protocol::StatusCode;
use crate::state::machine::NspState;
use crate::transport::UsbTransport;

use super::{HandleOutcome, HandlerContext};

/// SendNspHeader - patch the completed header over the zeroed prefix, then
/// retire the transfer. Valid only once every entry payload has arrived.
pub fn handle_send_nsp_header<T: UsbTransport, O: HostObserver>(
    block: &[u8],
    ctx: &mut HandlerContext<'_, T, O>,
) -> HandleOutcome {
    ctx.log(LogLevel::Debug, "Received SendNspHeader command");

    let (remaining, header_size) = match &ctx.state.nsp {
        NspState::Active(t) => (t.remaining, t.header_size),
        NspState::Idle => {
            ctx.log(
                LogLevel::Error,
                "Received NSP header outside NSP transfer mode!",
            );
            return HandleOutcome::Reply(StatusCode::MalformedCmd);
        }
    };

    if remaining > 0 {
        ctx.log(
            LogLevel::Error,
            format!(
                "NSP header received before all data! (missing 0x{:x} bytes)",
                remaining
            ),
        );
        return HandleOutcome::Reply(StatusCode::MalformedCmd);
    }

    if block.len() as u64 != header_size {
        ctx.log(LogLevel::Error, "NSP header size mismatch!");
        return HandleOutcome::Reply(StatusCode::MalformedCmd);
    }

    if let Err(e) = ctx.state.nsp_patch_header(block) {
        ctx.log(LogLevel::Error, format!("Failed to write NSP header: {}", e));
        ctx.state.reset_nsp(true);
        return HandleOutcome::Reply(StatusCode::HostIoError);
    }

    debug!(header_size = %format!("0x{:x}", header_size), "NSP header patched");
    ctx.log(
        LogLevel::Debug,
        format!("Wrote NSP header (0x{:x} bytes)", header_size),
    );

    ctx.state.reset_nsp(false);
    HandleOutcome::Reply(StatusCode::Success)
}

/// Standalone CancelFileTransfer - only meaningful between NSP entries.
pub fn handle_cancel_file_transfer<T: UsbTransport, O: HostObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> HandleOutcome {
    ctx.log(LogLevel::Debug, "Received CancelFileTransfer command");

    if ctx.state.nsp_active() {
        ctx.state.reset_nsp(true);
        ctx.log(LogLevel::Warn, "Transfer cancelled");
        return HandleOutcome::Reply(StatusCode::Success);
    }

    ctx.log(LogLevel::Error, "Unexpected transfer cancellation");
    HandleOutcome::Reply(StatusCode::MalformedCmd)
}
