//! Shared helpers for protocol tests: wire-format builders and an
//! event-collecting observer.

use std::sync::Mutex;

use crate::events::{HostEvent, HostObserver};
use crate::protocol::constants::{
    USB_CMD_BLOCK_SIZE_SEND_FILE_PROPERTIES, USB_CMD_BLOCK_SIZE_START_EXTRACTED_FS_DUMP,
    USB_MAGIC_WORD,
};
use crate::protocol::{StatusCode, StatusResponse};

/// Observer that records every event for later assertions.
pub struct CollectingObserver {
    events: Mutex<Vec<HostEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl HostObserver for CollectingObserver {
    fn on_event(&self, event: &HostEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Build a 16-byte command header as the console would send it.
pub fn cmd_header(cmd_id: u32, block_size: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16);
    bytes.extend_from_slice(&USB_MAGIC_WORD);
    bytes.extend_from_slice(&cmd_id.to_le_bytes());
    bytes.extend_from_slice(&block_size.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 4]);
    bytes
}

/// Build a 16-byte StartSession block.
pub fn start_session_block(major: u8, minor: u8, micro: u8, abi: u8, commit: &[u8; 8]) -> Vec<u8> {
    let mut block = vec![0u8; 16];
    block[0] = major;
    block[1] = minor;
    block[2] = micro;
    block[3] = abi;
    block[4..12].copy_from_slice(commit);
    block
}

/// Build an 800-byte SendFileProperties block.
pub fn file_properties_block(file_size: i64, filename: &str, nsp_header_size: u32) -> Vec<u8> {
    let mut block = vec![0u8; USB_CMD_BLOCK_SIZE_SEND_FILE_PROPERTIES];
    block[0..8].copy_from_slice(&file_size.to_le_bytes());
    block[8..12].copy_from_slice(&(filename.len() as u32).to_le_bytes());
    block[12..16].copy_from_slice(&nsp_header_size.to_le_bytes());
    block[16..16 + filename.len()].copy_from_slice(filename.as_bytes());
    block
}

/// Build a 784-byte StartExtractedFsDump block.
pub fn fs_dump_block(fs_size: i64, root_path: &str) -> Vec<u8> {
    let mut block = vec![0u8; USB_CMD_BLOCK_SIZE_START_EXTRACTED_FS_DUMP];
    block[0..8].copy_from_slice(&fs_size.to_le_bytes());
    block[8..8 + root_path.len()].copy_from_slice(root_path.as_bytes());
    block
}

/// Expected on-wire status response bytes.
pub fn status_bytes(status: StatusCode, max_packet_size: u16) -> Vec<u8> {
    StatusResponse::new(status, max_packet_size).to_bytes()
}
