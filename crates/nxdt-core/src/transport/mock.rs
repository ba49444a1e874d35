//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{TransportError, UsbTransport};

enum ScriptedRead {
    Bytes(Vec<u8>),
    /// Sets the stop flag when popped, simulating a user stop that lands
    /// while the worker is blocked in a bulk read.
    Stop,
}

/// Mock transport for unit testing the dispatcher and handlers.
///
/// Reads are scripted: each queued item is returned as one completed bulk
/// transfer. An exhausted queue reads as a timeout. Writes are captured.
pub struct MockTransport {
    read_queue: Mutex<VecDeque<ScriptedRead>>,
    write_log: Mutex<Vec<Vec<u8>>>,
    max_packet_size: u16,
    stop: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_max_packet_size(512)
    }

    pub fn with_max_packet_size(max_packet_size: u16) -> Self {
        Self {
            read_queue: Mutex::new(VecDeque::new()),
            write_log: Mutex::new(Vec::new()),
            max_packet_size,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue bytes to be returned by the next read as one transfer.
    pub fn queue_read(&self, bytes: &[u8]) {
        self.read_queue
            .lock()
            .unwrap()
            .push_back(ScriptedRead::Bytes(bytes.to_vec()));
    }

    /// Queue a stop request that fires when the read reaches it.
    pub fn queue_stop(&self) {
        self.read_queue.lock().unwrap().push_back(ScriptedRead::Stop);
    }

    /// Shared stop flag, for asserting or presetting stop state.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// All captured writes, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Number of unconsumed scripted reads.
    pub fn remaining_reads(&self) -> usize {
        self.read_queue.lock().unwrap().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn read(&self, len: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(TransportError::Stopped);
        }
        match self.read_queue.lock().unwrap().pop_front() {
            Some(ScriptedRead::Bytes(mut bytes)) => {
                bytes.truncate(len);
                Ok(bytes)
            }
            Some(ScriptedRead::Stop) => {
                self.stop.store(true, Ordering::Relaxed);
                Err(TransportError::Stopped)
            }
            None => Err(TransportError::Timeout {
                timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
            }),
        }
    }

    fn write(&self, data: &[u8], _timeout: Option<Duration>) -> Result<(), TransportError> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(TransportError::Stopped);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_reads() {
        let mock = MockTransport::new();
        mock.queue_read(b"hello");
        mock.queue_read(b"world");

        assert_eq!(mock.read(16, None).unwrap(), b"hello");
        assert_eq!(mock.read(16, None).unwrap(), b"world");
        assert!(matches!(
            mock.read(16, None),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_write_capture() {
        let mock = MockTransport::new();
        mock.write(b"abc", None).unwrap();
        mock.write(b"def", None).unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"abc");
        assert_eq!(writes[1], b"def");
    }

    #[test]
    fn test_queued_stop() {
        let mock = MockTransport::new();
        mock.queue_read(b"data");
        mock.queue_stop();

        assert!(mock.read(16, None).is_ok());
        assert!(matches!(mock.read(16, None), Err(TransportError::Stopped)));
        assert!(mock.stop_flag().load(Ordering::Relaxed));
        // Once stopped, everything short-circuits.
        assert!(matches!(mock.write(b"x", None), Err(TransportError::Stopped)));
    }

    #[test]
    fn test_read_framed_strips_sentinel() {
        let mock = MockTransport::with_max_packet_size(512);

        let mut payload = vec![0xABu8; 512];
        payload.push(0xFF);
        mock.queue_read(&payload);

        let data = mock.read_framed(512, None).unwrap();
        assert_eq!(data.len(), 512);
        assert!(data.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_read_framed_passes_short_transfer_through() {
        let mock = MockTransport::with_max_packet_size(512);
        mock.queue_read(&[0u8; 16]);

        // A 16-byte packet where a 1024-byte chunk was expected comes back
        // untouched so the caller can check it for an embedded cancel.
        let data = mock.read_framed(1024, None).unwrap();
        assert_eq!(data.len(), 16);
    }
}
