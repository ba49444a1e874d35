//! Session and NSP assembly state.

use std::fmt;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::mem;
use std::path::PathBuf;

use crate::protocol::constants::USB_CMD_BLOCK_SIZE_START_SESSION;
use crate::protocol::WireError;

/// Client identification captured by StartSession.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// nxdumptool application version (major, minor, micro).
    pub version: (u8, u8, u8),
    /// On-wire ABI version (major, minor), packed high/low nibble.
    pub abi: (u8, u8),
    /// Short git commit hash, right-trimmed.
    pub git_commit: String,
}

impl ClientInfo {
    /// Parse the 16-byte StartSession block.
    pub fn from_block(block: &[u8]) -> Result<Self, WireError> {
        if block.len() < USB_CMD_BLOCK_SIZE_START_SESSION {
            return Err(WireError::BufferTooSmall {
                expected: USB_CMD_BLOCK_SIZE_START_SESSION,
                actual: block.len(),
            });
        }
        let abi = block[3];
        Ok(Self {
            version: (block[0], block[1], block[2]),
            abi: ((abi >> 4) & 0x0F, abi & 0x0F),
            git_commit: String::from_utf8_lossy(&block[4..12])
                .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string(),
        })
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nxdumptool v{}.{}.{}, ABI v{}.{} (commit {})",
            self.version.0, self.version.1, self.version.2, self.abi.0, self.abi.1, self.git_commit
        )
    }
}

/// An NSP container being reassembled from out-of-order parts.
///
/// The file starts with `header_size` zero bytes; entry payloads follow in
/// receive order; the real header is patched over the placeholder last.
#[derive(Debug)]
pub struct NspTransfer {
    pub file: File,
    pub path: PathBuf,
    /// Full container size, header included.
    pub total: u64,
    /// Reserved header prefix size.
    pub header_size: u64,
    /// Entry payload bytes still expected. Zero iff all entries arrived.
    pub remaining: u64,
}

/// NSP assembly state. At most one transfer is in flight per session.
#[derive(Debug, Default)]
pub enum NspState {
    #[default]
    Idle,
    Active(NspTransfer),
}

/// All protocol state owned by the worker for one session.
#[derive(Debug, Default)]
pub struct ServerState {
    pub client: Option<ClientInfo>,
    pub nsp: NspState,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nsp_active(&self) -> bool {
        matches!(self.nsp, NspState::Active(_))
    }

    /// Begin NSP transfer mode. `file` already holds the zeroed header
    /// placeholder.
    pub fn enter_nsp(&mut self, file: File, path: PathBuf, total: u64, header_size: u64) {
        tracing::debug!(path = %path.display(), total, header_size, "NSP transfer mode enabled");
        self.nsp = NspState::Active(NspTransfer {
            file,
            path,
            total,
            header_size,
            remaining: total - header_size,
        });
    }

    /// Close the NSP file and leave NSP mode. When `delete_file` is set the
    /// partial container is removed from disk.
    pub fn reset_nsp(&mut self, delete_file: bool) {
        if let NspState::Active(transfer) = mem::take(&mut self.nsp) {
            drop(transfer.file);
            if delete_file {
                if let Err(e) = std::fs::remove_file(&transfer.path) {
                    tracing::warn!(path = %transfer.path.display(), error = %e, "Failed to remove partial NSP");
                }
            }
        }
    }

    /// Append a received chunk to the NSP file and account for it.
    pub fn nsp_write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        if let NspState::Active(transfer) = &mut self.nsp {
            transfer.file.write_all(chunk)?;
            transfer.file.flush()?;
            transfer.remaining = transfer.remaining.saturating_sub(chunk.len() as u64);
        }
        Ok(())
    }

    /// Patch the completed header over the zeroed prefix. The caller has
    /// verified that the block length equals the header reserve.
    pub fn nsp_patch_header(&mut self, block: &[u8]) -> std::io::Result<()> {
        if let NspState::Active(transfer) = &mut self.nsp {
            transfer.file.seek(SeekFrom::Start(0))?;
            transfer.file.write_all(block)?;
            transfer.file.flush()?;
        }
        Ok(())
    }
}
