//! Wire structures for the nxdumptool USB protocol.
//!
//! All integers are little-endian; structures are packed without padding.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{
    USB_CMD_BLOCK_SIZE_SEND_FILE_PROPERTIES, USB_CMD_BLOCK_SIZE_START_EXTRACTED_FS_DUMP,
    USB_CMD_HEADER_SIZE, USB_FILE_PROPERTIES_MAX_NAME_LENGTH, USB_MAGIC_WORD,
    USB_STATUS_RESPONSE_SIZE,
};

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Negative file size: {0}")]
    NegativeFileSize(i64),
    #[error("Filename length {length} exceeds maximum {max}")]
    FilenameTooLong { length: u32, max: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command identifiers sent by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandId {
    StartSession = 0,
    SendFileProperties = 1,
    CancelFileTransfer = 2,
    SendNspHeader = 3,
    EndSession = 4,
    StartExtractedFsDump = 5,
    EndExtractedFsDump = 6,
}

impl CommandId {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::StartSession),
            1 => Some(Self::SendFileProperties),
            2 => Some(Self::CancelFileTransfer),
            3 => Some(Self::SendNspHeader),
            4 => Some(Self::EndSession),
            5 => Some(Self::StartExtractedFsDump),
            6 => Some(Self::EndExtractedFsDump),
            _ => None,
        }
    }
}

/// Status codes written back to the console after each command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    Success = 0,
    InvalidMagicWord = 4,
    UnsupportedCmd = 5,
    UnsupportedAbiVersion = 6,
    MalformedCmd = 7,
    HostIoError = 8,
}

/// Command header (16 bytes / 0x10).
///
/// `magic[4] = "NXDT"`, `cmd_id: u32`, `block_size: u32`, `reserved[4]`.
///
/// Decoding never fails on content: the dispatcher must read the declared
/// command block before it is allowed to judge the magic word, so magic
/// validity is a query rather than a parse error.
#[derive(Debug, Clone, Copy)]
pub struct CommandHeader {
    pub magic: [u8; 4],
    pub cmd_id: u32,
    pub block_size: u32,
}

impl CommandHeader {
    pub const SIZE: usize = USB_CMD_HEADER_SIZE;

    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < Self::SIZE {
            return Err(WireError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[..4]);
        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            magic,
            cmd_id: cursor.read_u32::<LittleEndian>()?,
            block_size: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.magic);
        buf.write_u32::<LittleEndian>(self.cmd_id).unwrap();
        buf.write_u32::<LittleEndian>(self.block_size).unwrap();
        buf.extend_from_slice(&[0u8; 4]);
        buf
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == USB_MAGIC_WORD
    }

    /// True if this is an in-band cancel request: a 16-byte packet carrying
    /// a valid magic and the CancelFileTransfer command id.
    pub fn is_cancel(&self) -> bool {
        self.has_valid_magic() && self.cmd_id == CommandId::CancelFileTransfer as u32
    }
}

/// Status response (16 bytes / 0x10).
///
/// `magic[4] = "NXDT"`, `status: u32`, `max_packet_size: u16`, `reserved[6]`.
#[derive(Debug, Clone, Copy)]
pub struct StatusResponse {
    pub status: StatusCode,
    pub max_packet_size: u16,
}

impl StatusResponse {
    pub const SIZE: usize = USB_STATUS_RESPONSE_SIZE;

    pub fn new(status: StatusCode, max_packet_size: u16) -> Self {
        Self {
            status,
            max_packet_size,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&USB_MAGIC_WORD);
        buf.write_u32::<LittleEndian>(self.status as u32).unwrap();
        buf.write_u16::<LittleEndian>(self.max_packet_size).unwrap();
        buf.extend_from_slice(&[0u8; 6]);
        buf
    }
}

/// Decoded SendFileProperties command block (800 bytes / 0x320).
///
/// `file_size: i64`, `filename_length: u32`, `nsp_header_size: u32`,
/// `filename[0x300]` (UTF-8, the leading `filename_length` bytes).
#[derive(Debug, Clone)]
pub struct FileProperties {
    pub file_size: u64,
    pub nsp_header_size: u32,
    pub filename: String,
}

impl FileProperties {
    pub fn from_block(block: &[u8]) -> Result<Self, WireError> {
        if block.len() < USB_CMD_BLOCK_SIZE_SEND_FILE_PROPERTIES {
            return Err(WireError::BufferTooSmall {
                expected: USB_CMD_BLOCK_SIZE_SEND_FILE_PROPERTIES,
                actual: block.len(),
            });
        }
        let mut cursor = Cursor::new(block);
        let file_size = cursor.read_i64::<LittleEndian>()?;
        let filename_length = cursor.read_u32::<LittleEndian>()?;
        let nsp_header_size = cursor.read_u32::<LittleEndian>()?;

        if file_size < 0 {
            return Err(WireError::NegativeFileSize(file_size));
        }
        if filename_length as usize > USB_FILE_PROPERTIES_MAX_NAME_LENGTH {
            return Err(WireError::FilenameTooLong {
                length: filename_length,
                max: USB_FILE_PROPERTIES_MAX_NAME_LENGTH,
            });
        }

        let name_bytes = &block[16..16 + filename_length as usize];
        Ok(Self {
            file_size: file_size as u64,
            nsp_header_size,
            filename: String::from_utf8_lossy(name_bytes).into_owned(),
        })
    }
}

/// Decoded StartExtractedFsDump command block (784 bytes / 0x310).
///
/// `fs_size: i64` followed by a UTF-8 root path in the remainder. Purely
/// informational in the current ABI.
#[derive(Debug, Clone)]
pub struct FsDumpProperties {
    pub fs_size: u64,
    pub root_path: String,
}

impl FsDumpProperties {
    pub fn from_block(block: &[u8]) -> Result<Self, WireError> {
        if block.len() < USB_CMD_BLOCK_SIZE_START_EXTRACTED_FS_DUMP {
            return Err(WireError::BufferTooSmall {
                expected: USB_CMD_BLOCK_SIZE_START_EXTRACTED_FS_DUMP,
                actual: block.len(),
            });
        }
        let mut cursor = Cursor::new(block);
        let fs_size = cursor.read_i64::<LittleEndian>()?;
        if fs_size < 0 {
            return Err(WireError::NegativeFileSize(fs_size));
        }
        let root_path = String::from_utf8_lossy(&block[8..])
            .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string();
        Ok(Self {
            fs_size: fs_size as u64,
            root_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    #[test]
    fn test_command_header_roundtrip() {
        let header = CommandHeader {
            magic: USB_MAGIC_WORD,
            cmd_id: CommandId::SendFileProperties as u32,
            block_size: 0x320,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), CommandHeader::SIZE);

        let parsed = CommandHeader::from_bytes(&bytes).unwrap();
        assert!(parsed.has_valid_magic());
        assert_eq!(parsed.cmd_id, 1);
        assert_eq!(parsed.block_size, 0x320);
    }

    #[test]
    fn test_command_header_bad_magic() {
        let mut bytes = CommandHeader {
            magic: USB_MAGIC_WORD,
            cmd_id: 0,
            block_size: 0x10,
        }
        .to_bytes();
        bytes[0] = b'X';

        let parsed = CommandHeader::from_bytes(&bytes).unwrap();
        assert!(!parsed.has_valid_magic());
    }

    #[test]
    fn test_command_header_too_short() {
        assert!(matches!(
            CommandHeader::from_bytes(&[0u8; 8]),
            Err(WireError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_cancel_detection() {
        let cancel = CommandHeader {
            magic: USB_MAGIC_WORD,
            cmd_id: CommandId::CancelFileTransfer as u32,
            block_size: 0,
        };
        assert!(cancel.is_cancel());

        let other = CommandHeader {
            magic: *b"ABCD",
            cmd_id: CommandId::CancelFileTransfer as u32,
            block_size: 0,
        };
        assert!(!other.is_cancel());
    }

    #[test]
    fn test_status_response_layout() {
        let bytes = StatusResponse::new(StatusCode::Success, 0x200).to_bytes();
        assert_eq!(bytes.len(), StatusResponse::SIZE);
        assert_eq!(&bytes[0..4], b"NXDT");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..10], &[0x00, 0x02]);
        assert_eq!(&bytes[10..16], &[0u8; 6]);

        let bytes = StatusResponse::new(StatusCode::MalformedCmd, 512).to_bytes();
        assert_eq!(&bytes[4..8], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_file_properties_parse() {
        let mut block = vec![0u8; USB_CMD_BLOCK_SIZE_SEND_FILE_PROPERTIES];
        block[0..8].copy_from_slice(&0x1000i64.to_le_bytes());
        block[8..12].copy_from_slice(&5u32.to_le_bytes());
        block[12..16].copy_from_slice(&0x200u32.to_le_bytes());
        block[16..21].copy_from_slice(b"a.bin");

        let props = FileProperties::from_block(&block).unwrap();
        assert_eq!(props.file_size, 0x1000);
        assert_eq!(props.nsp_header_size, 0x200);
        assert_eq!(props.filename, "a.bin");
    }

    #[test]
    fn test_file_properties_rejects_negative_size() {
        let mut block = vec![0u8; USB_CMD_BLOCK_SIZE_SEND_FILE_PROPERTIES];
        block[0..8].copy_from_slice(&(-1i64).to_le_bytes());
        assert!(matches!(
            FileProperties::from_block(&block),
            Err(WireError::NegativeFileSize(-1))
        ));
    }

    #[test]
    fn test_file_properties_rejects_oversized_name() {
        let mut block = vec![0u8; USB_CMD_BLOCK_SIZE_SEND_FILE_PROPERTIES];
        block[8..12].copy_from_slice(&0x301u32.to_le_bytes());
        assert!(matches!(
            FileProperties::from_block(&block),
            Err(WireError::FilenameTooLong { .. })
        ));
    }

    #[test]
    fn test_fs_dump_properties_parse() {
        let mut block = vec![0u8; USB_CMD_BLOCK_SIZE_START_EXTRACTED_FS_DUMP];
        block[0..8].copy_from_slice(&0x4000i64.to_le_bytes());
        block[8..27].copy_from_slice(b"sdmc:/dump/RomFs/\0\0");

        let props = FsDumpProperties::from_block(&block).unwrap();
        assert_eq!(props.fs_size, 0x4000);
        assert_eq!(props.root_path, "sdmc:/dump/RomFs/");
    }
}
