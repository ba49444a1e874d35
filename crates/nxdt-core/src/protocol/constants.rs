//! Protocol constants for the nxdumptool USB ABI.
//!
//! Matches the on-wire values used by the `nxdumptool` homebrew client.

use std::time::Duration;

// ============================================================================
// Device Identification
// ============================================================================

/// Nintendo Vendor ID
pub const USB_DEV_VID: u16 = 0x057E;

/// Nintendo Switch Product ID
pub const USB_DEV_PID: u16 = 0x3000;

/// Manufacturer string descriptor reported by nxdumptool. This is the
/// authoritative match; the product string is informational only.
pub const USB_DEV_MANUFACTURER: &str = "DarkMatterCore";

/// Product string descriptor reported by nxdumptool (not matched on).
pub const USB_DEV_PRODUCT: &str = "nxdumptool";

// ============================================================================
// Framing
// ============================================================================

/// Protocol magic word, first four bytes of every command header and
/// status response.
pub const USB_MAGIC_WORD: [u8; 4] = *b"NXDT";

/// Command header size in bytes.
pub const USB_CMD_HEADER_SIZE: usize = 0x10;

/// Status response size in bytes.
pub const USB_STATUS_RESPONSE_SIZE: usize = 0x10;

/// Supported ABI version. Sessions announcing anything else are rejected.
pub const USB_ABI_VERSION_MAJOR: u8 = 1;
pub const USB_ABI_VERSION_MINOR: u8 = 2;

// ============================================================================
// Command block sizes
// ============================================================================

pub const USB_CMD_BLOCK_SIZE_START_SESSION: usize = 0x10;
pub const USB_CMD_BLOCK_SIZE_SEND_FILE_PROPERTIES: usize = 0x320;
pub const USB_CMD_BLOCK_SIZE_START_EXTRACTED_FS_DUMP: usize = 0x310;

/// Maximum filename length within a SendFileProperties block.
pub const USB_FILE_PROPERTIES_MAX_NAME_LENGTH: usize = 0x300;

// ============================================================================
// Transfer tuning
// ============================================================================

/// Bulk transfer chunk size for file data (8 MiB).
pub const USB_TRANSFER_BLOCK_SIZE: usize = 0x800000;

/// Transfers larger than this get progress reporting (32 MiB).
pub const USB_TRANSFER_THRESHOLD: u64 = (USB_TRANSFER_BLOCK_SIZE as u64) * 4;

/// Overall timeout for data-phase and command-block transfers.
pub const USB_TRANSFER_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Upper bound on a single libusb poll. Bounds the latency with which a
/// stop request or overall-timeout expiry is observed.
pub const USB_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Sleep between device enumeration scans while waiting for a console.
pub const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(100);
