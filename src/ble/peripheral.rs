//! Identity records for discovered peripherals.

/// Identity of a discovered peripheral, without the platform handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralInfo {
    /// Bluetooth address (or platform identifier where the address is hidden).
    pub address: String,
    /// Advertised local name.
    pub name: String,
    /// Signal strength at discovery time in dBm.
    pub rssi: i16,
}

/// A discovered peripheral together with the platform handle needed to connect to it.
///
/// Immutable once created; the session takes a clone when connecting.
#[derive(Debug, Clone)]
pub struct PeripheralDescriptor<H> {
    info: PeripheralInfo,
    handle: H,
}

impl<H> PeripheralDescriptor<H> {
    /// Create a new descriptor.
    pub fn new(info: PeripheralInfo, handle: H) -> Self {
        Self { info, handle }
    }

    /// Get the identity record.
    pub fn info(&self) -> &PeripheralInfo {
        &self.info
    }

    /// Get the advertised name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Get the address.
    pub fn address(&self) -> &str {
        &self.info.address
    }

    /// Get the signal strength at discovery time.
    pub fn rssi(&self) -> i16 {
        self.info.rssi
    }

    /// Get the platform handle.
    pub fn handle(&self) -> &H {
        &self.handle
    }
}

impl std::fmt::Display for PeripheralInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {} dBm)", self.name, self.address, self.rssi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_accessors() {
        let info = PeripheralInfo {
            address: "C0:FF:EE:00:00:01".to_string(),
            name: "AIRS-1".to_string(),
            rssi: -60,
        };
        let descriptor = PeripheralDescriptor::new(info.clone(), 7u32);
        assert_eq!(descriptor.name(), "AIRS-1");
        assert_eq!(descriptor.address(), "C0:FF:EE:00:00:01");
        assert_eq!(descriptor.rssi(), -60);
        assert_eq!(*descriptor.handle(), 7);
        assert_eq!(descriptor.info(), &info);
        assert_eq!(info.to_string(), "AIRS-1 (C0:FF:EE:00:00:01, -60 dBm)");
    }
}
