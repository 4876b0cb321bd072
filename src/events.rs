//! Events delivered to the consuming layer.

use crate::ble::peripheral::PeripheralInfo;
use crate::ble::session::SessionState;
use crate::data::{BatteryLevel, SensorReading};
use crate::error::ScanErrorKind;

/// Event emitted by an [`AirsDevice`](crate::AirsDevice).
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A peripheral passed the discovery filter and was added to the list.
    PeripheralFound(PeripheralInfo),
    /// The published device list changed (names, in discovery order).
    DeviceListChanged(Vec<String>),
    /// The current scan ended.
    ScanFinished,
    /// The current scan failed.
    ScanError(ScanErrorKind),
    /// The session moved to a new state.
    SessionStateChanged(SessionState),
    /// The transport service is subscribed and `write_data` may be used.
    ConnectionReady,
    /// A sensor reading was decoded.
    SensorReading(SensorReading),
    /// A battery level was decoded.
    BatteryLevel(BatteryLevel),
    /// The session ended.
    Disconnected,
    /// The connection layer failed.
    ControllerError(String),
}
