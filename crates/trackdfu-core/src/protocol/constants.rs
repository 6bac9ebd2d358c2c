//! Protocol constants for Nordic Secure DFU over BLE.

use uuid::Uuid;

// ============================================================================
// Device Identification
// ============================================================================

/// Advertised name prefix shared by the HaritoraX family.
pub const DEVICE_NAME_PREFIX: &str = "HaritoraX";

/// Secure DFU service (16-bit 0xFE59).
pub const DFU_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fe59_0000_1000_8000_00805f9b34fb);

/// Control point characteristic (write + notify).
pub const CONTROL_POINT_UUID: Uuid = Uuid::from_u128(0x8ec90001_f315_4f60_9fb8_838830daea50);

/// Data packet characteristic (write without response).
pub const PACKET_UUID: Uuid = Uuid::from_u128(0x8ec90002_f315_4f60_9fb8_838830daea50);

/// Buttonless DFU characteristic, unbonded variant.
pub const BUTTONLESS_UUID: Uuid = Uuid::from_u128(0x8ec90003_f315_4f60_9fb8_838830daea50);

/// Buttonless DFU characteristic, bonded variant.
pub const BUTTONLESS_BONDED_UUID: Uuid = Uuid::from_u128(0x8ec90004_f315_4f60_9fb8_838830daea50);

/// Device Information service (0x180A).
pub const DEVICE_INFORMATION_UUID: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);

/// Software Revision String characteristic (0x2A28).
pub const SOFTWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x00002a28_0000_1000_8000_00805f9b34fb);

// ============================================================================
// Transfer
// ============================================================================

/// Bytes per write on the packet characteristic.
pub const PACKET_SIZE: usize = 20;

/// First byte of every control point notification.
pub const RESPONSE_CODE: u8 = 0x60;

/// Packet receipt notifications are disabled during transfers.
pub const PRN_DISABLED: u16 = 0;

// ============================================================================
// Buttonless DFU
// ============================================================================

/// Request sent to reboot into the bootloader.
pub const BUTTONLESS_ENTER_BOOTLOADER: u8 = 0x01;

/// First byte of a buttonless response.
pub const BUTTONLESS_RESPONSE_CODE: u8 = 0x20;

/// Buttonless success status.
pub const BUTTONLESS_SUCCESS: u8 = 0x01;
