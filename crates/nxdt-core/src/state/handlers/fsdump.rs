//! Extracted-FS dump markers (StartExtractedFsDump, EndExtractedFsDump).
//!
//! Advisory in the current ABI: the console brackets a batch of nested
//! SendFileProperties commands with these, and the host only logs them. No
//! directory tree is pre-created.

use crate::events::{HostObserver, LogLevel};
use crate::fsutil;
use crate::protocol::{FsDumpProperties, StatusCode};
use crate::transport::UsbTransport;

use super::{HandleOutcome, HandlerContext};

pub fn handle_start_extracted_fs_dump<T: UsbTransport, O: HostObserver>(
    block: &[u8],
    ctx: &mut HandlerContext<'_, T, O>,
) -> HandleOutcome {
    ctx.log(LogLevel::Debug, "Received StartExtractedFsDump command");

    if ctx.state.nsp_active() {
        ctx.log(
            LogLevel::Error,
            "StartExtractedFsDump received during NSP transfer!",
        );
        return HandleOutcome::Reply(StatusCode::MalformedCmd);
    }

    let props = match FsDumpProperties::from_block(block) {
        Ok(p) => p,
        Err(e) => {
            ctx.log(
                LogLevel::Error,
                format!("Malformed StartExtractedFsDump block: {}", e),
            );
            return HandleOutcome::Reply(StatusCode::MalformedCmd);
        }
    };

    ctx.log(
        LogLevel::Info,
        format!(
            "Starting extracted FS dump ({}, path: \"{}\")",
            fsutil::format_size(props.fs_size),
            props.root_path
        ),
    );

    HandleOutcome::Reply(StatusCode::Success)
}

pub fn handle_end_extracted_fs_dump<T: UsbTransport, O: HostObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> HandleOutcome {
    ctx.log(LogLevel::Debug, "Received EndExtractedFsDump command");
    ctx.log(LogLevel::Info, "Finished extracted FS dump");
    HandleOutcome::Reply(StatusCode::Success)
}
