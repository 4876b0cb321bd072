//! BLE communication module.
//!
//! This module provides the scanner and session state machines, the
//! platform contract they drive, and its btleplug implementation.

pub mod backend;
pub mod peripheral;
pub mod platform;
pub mod scanner;
pub mod session;
pub mod uuids;

pub use backend::{BtleplugController, BtleplugPlatform};
pub use peripheral::{PeripheralDescriptor, PeripheralInfo};
pub use platform::{
    BlePlatform, CharacteristicId, ConnectionId, DescriptorId, GattCharacteristic,
    GattController, GattEvent, PlatformEvent, RawDiscovery, ScanEvent, ScanId, ServiceState,
    WriteMode,
};
pub use scanner::{DiscoveryList, Scanner};
pub use session::{Session, SessionState};
pub use uuids::*;
