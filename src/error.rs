//! Error types for the airs-ble crate.

use thiserror::Error;

/// Classified scan failure reported by the platform discovery agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanErrorKind {
    /// The Bluetooth radio is powered off.
    PoweredOff,
    /// Reading from or writing to the adapter failed.
    InputOutput,
    /// Any other failure.
    Unknown,
}

impl std::fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PoweredOff => write!(f, "the Bluetooth adaptor is powered off"),
            Self::InputOutput => write!(f, "writing or reading from the device resulted in an error"),
            Self::Unknown => write!(f, "an unknown error has occurred"),
        }
    }
}

impl From<&btleplug::Error> for ScanErrorKind {
    fn from(error: &btleplug::Error) -> Self {
        match error {
            btleplug::Error::RuntimeError(_) | btleplug::Error::Other(_) => Self::InputOutput,
            btleplug::Error::TimedOut(_) => Self::InputOutput,
            _ => Self::Unknown,
        }
    }
}

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Peripheral discovery failed.
    #[error("Scan failed: {kind}")]
    Scan {
        /// Classification of the failure.
        kind: ScanErrorKind,
    },

    /// The connection layer reported a failure.
    #[error("Controller error: {reason}")]
    Controller {
        /// Description reported by the platform.
        reason: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Client configuration descriptor not found on a characteristic.
    #[error("Descriptor not found on characteristic {uuid}")]
    DescriptorNotFound {
        /// The UUID of the characteristic that lacks the descriptor.
        uuid: String,
    },

    /// A characteristic payload could not be decoded.
    #[error("Decode error: {context}")]
    Decode {
        /// Description of what was wrong with the payload.
        context: String,
    },

    /// The transport service is not connected or its TX characteristic is unresolved.
    #[error("Transport not ready")]
    NotReady,

    /// No discovered peripheral exists at the requested index.
    #[error("No discovered peripheral at index {index}")]
    PeripheralNotFound {
        /// The index that was requested.
        index: usize,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_kind_from_btleplug() {
        let io = btleplug::Error::RuntimeError("adapter gone".to_string());
        assert_eq!(ScanErrorKind::from(&io), ScanErrorKind::InputOutput);
        assert_eq!(
            ScanErrorKind::from(&btleplug::Error::PermissionDenied),
            ScanErrorKind::Unknown
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::Scan {
            kind: ScanErrorKind::PoweredOff,
        };
        assert_eq!(
            err.to_string(),
            "Scan failed: the Bluetooth adaptor is powered off"
        );
        assert_eq!(Error::NotReady.to_string(), "Transport not ready");
        assert_eq!(
            Error::Controller {
                reason: "UnknownRemoteDeviceError".to_string()
            }
            .to_string(),
            "Controller error: UnknownRemoteDeviceError"
        );
    }
}
