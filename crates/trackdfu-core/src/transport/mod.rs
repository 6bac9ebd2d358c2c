//! Transport module.

pub mod ble;
pub mod mock;
pub mod traits;

pub use ble::BleTransport;
pub use mock::MockTransport;
pub use traits::{CrcFn, DeviceFilter, DeviceHandle, DfuTransport, TransportError};
