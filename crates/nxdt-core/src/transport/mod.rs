//! USB transport module.

pub mod mock;
pub mod rusb;
pub mod traits;

pub use mock::MockTransport;
pub use rusb::RusbTransport;
pub use traits::{TransportError, UsbTransport};
