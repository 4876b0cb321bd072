//! BLE Service, Characteristic and Descriptor UUIDs.
//!
//! Contains all UUID constants used for AIRS sensor communication.

use uuid::Uuid;

// Serial transport service (QPP, vendor specific)
/// Serial transport service UUID.
pub const TRANSPORT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_fee9_0000_1000_8000_00805f9b34fb);
/// TX characteristic UUID (write to sensor, without response).
pub const TRANSPORT_TX_UUID: Uuid = Uuid::from_u128(0xd44b_c439_abfd_45a2_b575_925416129600);
/// RX characteristic UUID (notifications from sensor).
pub const TRANSPORT_RX_UUID: Uuid = Uuid::from_u128(0xd44b_c439_abfd_45a2_b575_925416129601);

// Battery Service (Standard BLE)
/// Standard BLE Battery Service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
/// Battery Level characteristic UUID.
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration descriptor UUID.
pub const CLIENT_CONFIG_DESCRIPTOR_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Check if a service UUID is one the session subscribes to.
pub fn is_handled_service(uuid: &Uuid) -> bool {
    *uuid == TRANSPORT_SERVICE_UUID || *uuid == BATTERY_SERVICE_UUID
}
