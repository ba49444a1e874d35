//! Session control handlers (StartSession, EndSession).

use tracing::{info, warn};

use crate::events::{HostObserver, LogLevel};
use crate::protocol::constants::{USB_ABI_VERSION_MAJOR, USB_ABI_VERSION_MINOR};
use crate::protocol::StatusCode;
use crate::state::machine::ClientInfo;
use crate::transport::UsbTransport;

use super::{HandleOutcome, HandlerContext};

/// StartSession - capture client identification and check the ABI.
pub fn handle_start_session<T: UsbTransport, O: HostObserver>(
    block: &[u8],
    ctx: &mut HandlerContext<'_, T, O>,
) -> HandleOutcome {
    ctx.log(LogLevel::Debug, "Received StartSession command");

    let client = match ClientInfo::from_block(block) {
        Ok(c) => c,
        Err(e) => {
            ctx.log(
                LogLevel::Error,
                format!("Malformed StartSession block: {}", e),
            );
            return HandleOutcome::Reply(StatusCode::MalformedCmd);
        }
    };
    info!(client = %client, "Session requested");
    ctx.log(LogLevel::Info, format!("Client: {}", client));

    let abi = client.abi;
    ctx.state.client = Some(client);

    if abi != (USB_ABI_VERSION_MAJOR, USB_ABI_VERSION_MINOR) {
        warn!(
            abi = %format!("{}.{}", abi.0, abi.1),
            supported = %format!("{}.{}", USB_ABI_VERSION_MAJOR, USB_ABI_VERSION_MINOR),
            "ABI version rejected"
        );
        ctx.log(LogLevel::Error, "Unsupported ABI version!");
        return HandleOutcome::Reply(StatusCode::UnsupportedAbiVersion);
    }

    HandleOutcome::Reply(StatusCode::Success)
}

/// EndSession - acknowledge; the dispatcher terminates after the status is
/// written.
pub fn handle_end_session<T: UsbTransport, O: HostObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> HandleOutcome {
    ctx.log(LogLevel::Debug, "Received EndSession command");
    HandleOutcome::Reply(StatusCode::Success)
}
