//! SendFileProperties handler: validation, output-file resolution, and the
//! ZLT-aware chunked receive loop.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::events::{HostEvent, HostObserver, LogLevel};
use crate::fsutil;
use crate::protocol::constants::{
    USB_CMD_HEADER_SIZE, USB_TRANSFER_BLOCK_SIZE, USB_TRANSFER_THRESHOLD, USB_TRANSFER_TIMEOUT,
};
use crate::protocol::{CommandHeader, FileProperties, StatusCode};
use crate::state::machine::NspState;
use crate::transport::{TransportError, UsbTransport};

use super::{send_status, HandleOutcome, HandlerContext};

/// Destination of the data phase. The NSP file handle lives in the session
/// state across commands; a plain file is scoped to this one command.
enum Sink {
    Local { file: File, path: PathBuf },
    Nsp,
}

/// Drop the sink on an abort path. The NSP container survives a user stop
/// (`delete_nsp = false`); everything else is unlinked.
fn discard_sink<T: UsbTransport, O: HostObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    sink: Sink,
    delete_nsp: bool,
) {
    match sink {
        Sink::Local { file, path } => {
            drop(file);
            let _ = fs::remove_file(&path);
        }
        Sink::Nsp => {
            if delete_nsp {
                ctx.state.reset_nsp(true);
            }
        }
    }
}

pub fn handle_send_file_properties<T: UsbTransport, O: HostObserver>(
    block: &[u8],
    ctx: &mut HandlerContext<'_, T, O>,
) -> HandleOutcome {
    ctx.log(LogLevel::Debug, "Received SendFileProperties command");

    let props = match FileProperties::from_block(block) {
        Ok(p) => p,
        Err(e) => {
            ctx.log(
                LogLevel::Error,
                format!("Malformed SendFileProperties block: {}", e),
            );
            return HandleOutcome::Reply(StatusCode::MalformedCmd);
        }
    };

    ctx.log(
        LogLevel::Debug,
        format!("File: \"{}\" (size: 0x{:x})", props.filename, props.file_size),
    );

    if !ctx.state.nsp_active()
        && props.file_size > 0
        && props.nsp_header_size as u64 >= props.file_size
    {
        ctx.log(
            LogLevel::Error,
            "NSP header size must be smaller than the full NSP size!",
        );
        return HandleOutcome::Reply(StatusCode::MalformedCmd);
    }

    if ctx.state.nsp_active() && props.nsp_header_size != 0 {
        ctx.log(
            LogLevel::Error,
            "Received non-zero NSP header size during NSP transfer!",
        );
        return HandleOutcome::Reply(StatusCode::MalformedCmd);
    }

    let entering_nsp = !ctx.state.nsp_active() && props.file_size > 0 && props.nsp_header_size > 0;
    let nsp_mode = ctx.state.nsp_active() || entering_nsp;

    let mut sink = if ctx.state.nsp_active() {
        Sink::Nsp
    } else {
        let full_path = match fsutil::resolve_output_path(&ctx.config.output_dir, &props.filename)
        {
            Some(p) => p,
            None => {
                ctx.log(
                    LogLevel::Error,
                    format!("Rejected unsafe filename: \"{}\"", props.filename),
                );
                return HandleOutcome::Reply(StatusCode::MalformedCmd);
            }
        };

        if let Some(parent) = full_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                ctx.log(
                    LogLevel::Error,
                    format!("Failed to create output directories: {}", e),
                );
                return HandleOutcome::Reply(StatusCode::HostIoError);
            }
        }

        if full_path.is_dir() {
            ctx.log(LogLevel::Error, "Output path points to an existing directory!");
            return HandleOutcome::Reply(StatusCode::HostIoError);
        }

        if !ctx.config.disable_free_space_check {
            let free = full_path.parent().and_then(fsutil::available_space);
            if let Some(free) = free {
                if free < props.file_size {
                    ctx.log(LogLevel::Error, "Not enough free space!");
                    return HandleOutcome::Reply(StatusCode::HostIoError);
                }
            }
        }

        let mut file = match File::create(&full_path) {
            Ok(f) => f,
            Err(e) => {
                ctx.log(LogLevel::Error, format!("Failed to open output file: {}", e));
                return HandleOutcome::Reply(StatusCode::HostIoError);
            }
        };

        if entering_nsp {
            // Zeroed placeholder; SendNspHeader patches the real header in
            // once all entry payloads have arrived.
            if let Err(e) = file.write_all(&vec![0u8; props.nsp_header_size as usize]) {
                drop(file);
                let _ = fs::remove_file(&full_path);
                ctx.log(
                    LogLevel::Error,
                    format!("Failed to reserve NSP header: {}", e),
                );
                return HandleOutcome::Reply(StatusCode::HostIoError);
            }
            ctx.state.enter_nsp(
                file,
                full_path,
                props.file_size,
                props.nsp_header_size as u64,
            );
            ctx.log(LogLevel::Debug, "NSP transfer mode enabled");
            Sink::Nsp
        } else {
            Sink::Local {
                file,
                path: full_path,
            }
        }
    };

    let nsp_total = match &ctx.state.nsp {
        NspState::Active(t) => Some(t.total),
        NspState::Idle => None,
    };

    // Empty files and the NSP aggregate announcement have no data phase.
    if props.file_size == 0 || nsp_total == Some(props.file_size) {
        return HandleOutcome::Reply(StatusCode::Success);
    }

    // The console waits for an acknowledgement before streaming payload.
    match send_status(ctx.transport, StatusCode::Success) {
        Ok(()) => {}
        Err(TransportError::Stopped) => {
            discard_sink(ctx, sink, false);
            return HandleOutcome::Stopped;
        }
        Err(e) => {
            debug!(error = %e, "Pre-data status write failed");
            discard_sink(ctx, sink, true);
            return HandleOutcome::Reply(StatusCode::HostIoError);
        }
    }

    let file_kind = if nsp_mode { "NSP entry" } else { "file" };
    ctx.log(
        LogLevel::Info,
        format!(
            "Receiving {}: \"{}\" ({})",
            file_kind,
            props.filename,
            fsutil::format_size(props.file_size)
        ),
    );

    let progress_total = nsp_total.unwrap_or(props.file_size);
    let use_progress = progress_total > USB_TRANSFER_THRESHOLD;
    if use_progress {
        ctx.emit(HostEvent::ProgressStart {
            total: progress_total,
            filename: props.filename.clone(),
        });
    }

    let mut offset: u64 = 0;
    while offset < props.file_size {
        let chunk_size = (props.file_size - offset).min(USB_TRANSFER_BLOCK_SIZE as u64) as usize;

        let chunk = match ctx
            .transport
            .read_framed(chunk_size, Some(USB_TRANSFER_TIMEOUT))
        {
            Ok(c) => c,
            Err(TransportError::Stopped) => {
                if use_progress {
                    ctx.emit(HostEvent::ProgressEnd);
                }
                discard_sink(ctx, sink, false);
                return HandleOutcome::Stopped;
            }
            Err(e) => {
                ctx.log(LogLevel::Error, "Failed to read data chunk!");
                debug!(error = %e, "Data chunk read error");
                if use_progress {
                    ctx.emit(HostEvent::ProgressEnd);
                }
                discard_sink(ctx, sink, true);
                return HandleOutcome::Reply(StatusCode::HostIoError);
            }
        };

        // In-band cancel: a 16-byte packet with a valid magic and the
        // CancelFileTransfer id in place of a data chunk.
        if chunk.len() == USB_CMD_HEADER_SIZE {
            if let Ok(header) = CommandHeader::from_bytes(&chunk) {
                if header.is_cancel() {
                    ctx.log(LogLevel::Warn, "Transfer cancelled by console");
                    if use_progress {
                        ctx.emit(HostEvent::ProgressEnd);
                    }
                    discard_sink(ctx, sink, true);
                    return HandleOutcome::Reply(StatusCode::Success);
                }
            }
        }

        if chunk.len() != chunk_size {
            ctx.log(LogLevel::Error, "Failed to read data chunk!");
            debug!(
                expected = chunk_size,
                actual = chunk.len(),
                "Short data chunk"
            );
            if use_progress {
                ctx.emit(HostEvent::ProgressEnd);
            }
            discard_sink(ctx, sink, true);
            return HandleOutcome::Reply(StatusCode::HostIoError);
        }

        let write_result = match &mut sink {
            Sink::Local { file, .. } => file.write_all(&chunk).and_then(|_| file.flush()),
            Sink::Nsp => ctx.state.nsp_write_chunk(&chunk),
        };
        if let Err(e) = write_result {
            ctx.log(LogLevel::Error, format!("Failed to write data chunk: {}", e));
            if use_progress {
                ctx.emit(HostEvent::ProgressEnd);
            }
            discard_sink(ctx, sink, true);
            return HandleOutcome::Reply(StatusCode::HostIoError);
        }

        offset += chunk.len() as u64;
        if use_progress {
            ctx.emit(HostEvent::ProgressUpdate {
                current: offset,
                total: props.file_size,
                filename: props.filename.clone(),
            });
        }
    }

    ctx.log(LogLevel::Debug, "File transfer completed successfully");

    let nsp_remaining = match &ctx.state.nsp {
        NspState::Active(t) => t.remaining,
        NspState::Idle => 0,
    };

    drop(sink);

    if use_progress && (!nsp_mode || nsp_remaining == 0) {
        ctx.emit(HostEvent::ProgressEnd);
    }

    HandleOutcome::Reply(StatusCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ServerConfig;
    use crate::state::machine::ServerState;
    use crate::testutil::{file_properties_block, CollectingObserver};
    use crate::transport::MockTransport;

    fn test_config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            output_dir: dir.to_path_buf(),
            disable_free_space_check: true,
        }
    }

    #[test]
    fn test_receives_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let observer = CollectingObserver::new();
        let mut state = ServerState::new();
        let config = test_config(dir.path());

        transport.queue_read(b"hello");

        let block = file_properties_block(5, "a.bin", 0);
        let mut ctx = HandlerContext {
            transport: &transport,
            observer: &observer,
            state: &mut state,
            config: &config,
        };
        let outcome = handle_send_file_properties(&block, &mut ctx);

        assert!(matches!(outcome, HandleOutcome::Reply(StatusCode::Success)));
        assert_eq!(fs::read(dir.path().join("a.bin")).unwrap(), b"hello");
        // Exactly one pre-data acknowledgement was written.
        assert_eq!(transport.writes().len(), 1);
    }

    #[test]
    fn test_empty_file_skips_data_phase() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let observer = CollectingObserver::new();
        let mut state = ServerState::new();
        let config = test_config(dir.path());

        let block = file_properties_block(0, "empty.bin", 0);
        let mut ctx = HandlerContext {
            transport: &transport,
            observer: &observer,
            state: &mut state,
            config: &config,
        };
        let outcome = handle_send_file_properties(&block, &mut ctx);

        assert!(matches!(outcome, HandleOutcome::Reply(StatusCode::Success)));
        assert!(transport.writes().is_empty());
        let meta = fs::metadata(dir.path().join("empty.bin")).unwrap();
        assert_eq!(meta.len(), 0);
    }

    #[test]
    fn test_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let observer = CollectingObserver::new();
        let mut state = ServerState::new();
        let config = test_config(dir.path());

        transport.queue_read(&[0x42; 4]);

        let block = file_properties_block(4, "RomFs/data/file.dat", 0);
        let mut ctx = HandlerContext {
            transport: &transport,
            observer: &observer,
            state: &mut state,
            config: &config,
        };
        let outcome = handle_send_file_properties(&block, &mut ctx);

        assert!(matches!(outcome, HandleOutcome::Reply(StatusCode::Success)));
        assert_eq!(
            fs::read(dir.path().join("RomFs/data/file.dat")).unwrap(),
            [0x42; 4]
        );
    }

    #[test]
    fn test_rejects_header_size_not_smaller_than_file() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let observer = CollectingObserver::new();
        let mut state = ServerState::new();
        let config = test_config(dir.path());

        let block = file_properties_block(0x100, "game.nsp", 0x100);
        let mut ctx = HandlerContext {
            transport: &transport,
            observer: &observer,
            state: &mut state,
            config: &config,
        };
        let outcome = handle_send_file_properties(&block, &mut ctx);

        assert!(matches!(
            outcome,
            HandleOutcome::Reply(StatusCode::MalformedCmd)
        ));
        assert!(!state.nsp_active());
    }

    #[test]
    fn test_rejects_header_size_during_nsp_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let observer = CollectingObserver::new();
        let mut state = ServerState::new();
        let config = test_config(dir.path());

        let path = dir.path().join("game.nsp");
        let file = File::create(&path).unwrap();
        state.enter_nsp(file, path, 0x1000, 0x200);

        let block = file_properties_block(0x100, "entry", 0x10);
        let mut ctx = HandlerContext {
            transport: &transport,
            observer: &observer,
            state: &mut state,
            config: &config,
        };
        let outcome = handle_send_file_properties(&block, &mut ctx);

        assert!(matches!(
            outcome,
            HandleOutcome::Reply(StatusCode::MalformedCmd)
        ));
        // The transfer itself is untouched by the rejected command.
        assert!(state.nsp_active());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let observer = CollectingObserver::new();
        let mut state = ServerState::new();
        let config = test_config(dir.path());

        let block = file_properties_block(5, "../escape.bin", 0);
        let mut ctx = HandlerContext {
            transport: &transport,
            observer: &observer,
            state: &mut state,
            config: &config,
        };
        let outcome = handle_send_file_properties(&block, &mut ctx);

        assert!(matches!(
            outcome,
            HandleOutcome::Reply(StatusCode::MalformedCmd)
        ));
    }

    #[test]
    fn test_rejects_existing_directory_target() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("taken")).unwrap();

        let transport = MockTransport::new();
        let observer = CollectingObserver::new();
        let mut state = ServerState::new();
        let config = test_config(dir.path());

        let block = file_properties_block(5, "taken", 0);
        let mut ctx = HandlerContext {
            transport: &transport,
            observer: &observer,
            state: &mut state,
            config: &config,
        };
        let outcome = handle_send_file_properties(&block, &mut ctx);

        assert!(matches!(
            outcome,
            HandleOutcome::Reply(StatusCode::HostIoError)
        ));
    }

    #[test]
    fn test_transport_failure_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let observer = CollectingObserver::new();
        let mut state = ServerState::new();
        let config = test_config(dir.path());

        // No data queued: the chunk read times out.
        let block = file_properties_block(5, "gone.bin", 0);
        let mut ctx = HandlerContext {
            transport: &transport,
            observer: &observer,
            state: &mut state,
            config: &config,
        };
        let outcome = handle_send_file_properties(&block, &mut ctx);

        assert!(matches!(
            outcome,
            HandleOutcome::Reply(StatusCode::HostIoError)
        ));
        assert!(!dir.path().join("gone.bin").exists());
    }
}
