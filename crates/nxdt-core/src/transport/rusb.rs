//! rusb-based USB transport implementation.
//!
//! Wraps a libusb device handle for the Nintendo Switch running nxdumptool.
//! All bulk transfers are decomposed into short polls so stop requests and
//! overall timeouts are observed within `USB_POLL_TIMEOUT`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Direction, TransferType, UsbContext};
use tracing::{debug, info};

use super::traits::{TransportError, UsbTransport};
use crate::protocol::constants::{
    DEVICE_POLL_INTERVAL, USB_DEV_MANUFACTURER, USB_DEV_PID, USB_DEV_VID, USB_POLL_TIMEOUT,
};

/// rusb-based bulk transport for a claimed console.
pub struct RusbTransport {
    handle: DeviceHandle<Context>,
    ep_in: u8,
    ep_out: u8,
    max_packet_size: u16,
    usb_version: String,
    stop: Arc<AtomicBool>,
}

impl RusbTransport {
    /// Poll the bus until a console running nxdumptool shows up, then claim
    /// it. Candidates are matched on VID/PID first and on the ASCII
    /// manufacturer descriptor second; any claim failure releases the
    /// candidate and the scan continues. Returns `Err(Stopped)` when the
    /// stop flag is raised before a device is found.
    pub fn wait_for_device(stop: Arc<AtomicBool>) -> Result<Self, TransportError> {
        let context = Context::new().map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        loop {
            if stop.load(Ordering::Relaxed) {
                return Err(TransportError::Stopped);
            }

            let devices = match context.devices() {
                Ok(list) => list,
                Err(_) => {
                    thread::sleep(DEVICE_POLL_INTERVAL);
                    continue;
                }
            };

            for device in devices.iter() {
                let desc = match device.device_descriptor() {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                if desc.vendor_id() != USB_DEV_VID || desc.product_id() != USB_DEV_PID {
                    continue;
                }

                match Self::claim(&device, &desc, stop.clone()) {
                    Ok(transport) => return Ok(transport),
                    Err(e) => {
                        debug!(error = %e, "Candidate device rejected");
                        continue;
                    }
                }
            }

            thread::sleep(DEVICE_POLL_INTERVAL);
        }
    }

    fn claim(
        device: &Device<Context>,
        desc: &DeviceDescriptor,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, TransportError> {
        let handle = device
            .open()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let manufacturer = handle
            .read_manufacturer_string_ascii(desc)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        if manufacturer != USB_DEV_MANUFACTURER {
            return Err(TransportError::OpenFailed(format!(
                "manufacturer mismatch: {:?}",
                manufacturer
            )));
        }

        // The console expects a fresh configuration after a previous host
        // session; failures here are non-fatal on most platforms.
        let _ = handle.reset();
        let _ = handle.set_active_configuration(1);

        handle
            .claim_interface(0)
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: 0,
                message: e.to_string(),
            })?;

        let config = device
            .active_config_descriptor()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let mut ep_in: u8 = 0;
        let mut ep_out: u8 = 0;
        let mut max_packet_size: u16 = 0;

        for interface in config.interfaces() {
            if interface.number() != 0 {
                continue;
            }
            for idesc in interface.descriptors() {
                for ep in idesc.endpoint_descriptors() {
                    if ep.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match ep.direction() {
                        Direction::In => {
                            ep_in = ep.address();
                            max_packet_size = ep.max_packet_size();
                        }
                        Direction::Out => ep_out = ep.address(),
                    }
                }
            }
        }

        if ep_in == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if ep_out == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        let version = desc.usb_version();
        let usb_version = format!("{}.{}", version.major(), version.minor());

        info!(
            in_ep = %format!("0x{:02x}", ep_in),
            out_ep = %format!("0x{:02x}", ep_out),
            max_packet_size = %format!("0x{:x}", max_packet_size),
            usb = %usb_version,
            "Console claimed"
        );

        Ok(Self {
            handle,
            ep_in,
            ep_out,
            max_packet_size,
            usb_version,
            stop,
        })
    }

    /// The device's bcdUSB as "major.minor", for logging.
    pub fn usb_version(&self) -> &str {
        &self.usb_version
    }

    fn poll_timeout(timeout: Option<Duration>) -> Duration {
        match timeout {
            Some(t) => t.clamp(Duration::from_millis(1), USB_POLL_TIMEOUT),
            None => USB_POLL_TIMEOUT,
        }
    }
}

impl UsbTransport for RusbTransport {
    fn read(&self, len: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        let poll = Self::poll_timeout(timeout);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Err(TransportError::Stopped);
            }

            match self.handle.read_bulk(self.ep_in, &mut buf, poll) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(rusb::Error::Timeout) => {
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            return Err(TransportError::Timeout {
                                timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                            });
                        }
                    }
                }
                Err(e) => return Err(TransportError::ReadFailed(e.to_string())),
            }
        }
    }

    fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError> {
        let poll = Self::poll_timeout(timeout);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Err(TransportError::Stopped);
            }

            match self.handle.write_bulk(self.ep_out, data, poll) {
                Ok(n) if n == data.len() => return Ok(()),
                Ok(n) => {
                    return Err(TransportError::WriteFailed(format!(
                        "short write: {} of {} bytes",
                        n,
                        data.len()
                    )))
                }
                Err(rusb::Error::Timeout) => {
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            return Err(TransportError::Timeout {
                                timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                            });
                        }
                    }
                }
                Err(e) => return Err(TransportError::WriteFailed(e.to_string())),
            }
        }
    }

    fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }
}
