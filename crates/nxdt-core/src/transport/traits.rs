//! USB transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for bulk endpoint I/O, allowing
//! different implementations (rusb, mock).

use std::time::Duration;
use thiserror::Error;

use crate::protocol::is_packet_aligned;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Stop requested")]
    Stopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract bulk USB transport.
///
/// `read` returns the bytes of one completed bulk transfer, which may be
/// shorter than requested; framing expectations are enforced by callers.
/// The in-band cancel mechanism depends on this: a 16-byte packet can show
/// up where a data chunk was expected.
///
/// A `timeout` of `None` means unbounded. Implementations decompose the
/// wait into short polls so a stop request surfaces as
/// `TransportError::Stopped` with bounded latency.
pub trait UsbTransport {
    /// Read up to `len` bytes from the IN endpoint.
    fn read(&self, len: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError>;

    /// Write all of `data` to the OUT endpoint. A short write is an error.
    fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError>;

    /// The IN endpoint's wMaxPacketSize.
    fn max_packet_size(&self) -> u16;

    /// Read a payload of expected length `len`, applying the ZLT rule.
    ///
    /// When `len` is a multiple of the endpoint max packet size, one extra
    /// sentinel byte is requested and stripped. If fewer bytes than the
    /// adjusted length arrive, they are returned as-is for the caller to
    /// judge (this is how an embedded 16-byte cancel packet surfaces).
    fn read_framed(
        &self,
        len: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let adjusted = if is_packet_aligned(len, self.max_packet_size()) {
            len + 1
        } else {
            len
        };
        let mut data = self.read(adjusted, timeout)?;
        if adjusted > len && data.len() == adjusted {
            data.truncate(len);
        }
        Ok(data)
    }
}
