// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # airs-ble
//!
//! A cross-platform Rust library for streaming telemetry from AIRS
//! environmental sensors over Bluetooth Low Energy.
//!
//! ## Features
//!
//! - **Discovery**: Time-bounded scan listing low-energy peripherals whose name contains "AIRS"
//! - **Session**: Connect, discover the transport and battery services, subscribe to notifications
//! - **Telemetry**: Temperature, humidity and pressure decoded from the transport RX characteristic
//! - **Battery**: Battery level notifications and on-demand reads
//! - **Transport writes**: Raw payloads written to the transport TX characteristic
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use airs_ble::{AirsDevice, DeviceConfig, DeviceEvent, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let device = AirsDevice::new(DeviceConfig::default()).await?;
//!     let mut events = device.subscribe();
//!
//!     device.start_scan()?;
//!     while let Ok(event) = events.recv().await {
//!         if event == DeviceEvent::ScanFinished {
//!             break;
//!         }
//!     }
//!
//!     for (index, name) in device.device_list().iter().enumerate() {
//!         println!("{}: {}", index, name);
//!     }
//!
//!     device.start_connect(0).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let DeviceEvent::SensorReading(reading) = event {
//!             println!(
//!                 "{:.1}°C {:.1}% {:.2} hPa",
//!                 reading.temperature, reading.humidity, reading.pressure
//!             );
//!         }
//!     }
//!
//!     device.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod events;
pub mod protocol;
pub mod utils;

// Re-exports for convenience
pub use config::DeviceConfig;
pub use device::{AirsDevice, CallbackHandle};
pub use error::{Error, Result, ScanErrorKind};
pub use events::DeviceEvent;
pub use utils::{celsius_to_fahrenheit, pascals_to_hectopascals};

// Re-export commonly used types from submodules
pub use ble::peripheral::PeripheralInfo;
pub use ble::session::SessionState;
pub use data::{BatteryLevel, SensorReading};
pub use protocol::{decode_battery_level, decode_sensor_reading};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<AirsDevice>();
        let _ = std::any::TypeId::of::<DeviceConfig>();
        let _ = std::any::TypeId::of::<DeviceEvent>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<SensorReading>();
        let _ = std::any::TypeId::of::<BatteryLevel>();
        let _ = std::any::TypeId::of::<SessionState>();
    }

    #[test]
    fn test_unit_conversion() {
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((pascals_to_hectopascals(101_325.0) - 1013.25).abs() < 0.001);
    }
}
