//! AIRS wire protocol.
//!
//! This module contains the client configuration values and the decoders
//! for the two notifying characteristics.

pub mod telemetry;

pub use telemetry::{decode_battery_level, decode_sensor_reading, SENSOR_RECORD_LEN};

/// Client configuration value enabling notifications.
pub const NOTIFICATIONS_ENABLE: [u8; 2] = [0x01, 0x00];

/// Client configuration value disabling notifications.
///
/// A confirmed write of this value on the RX descriptor ends the session.
pub const NOTIFICATIONS_DISABLE: [u8; 2] = [0x00, 0x00];
