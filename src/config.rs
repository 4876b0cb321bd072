//! Device configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Name marker identifying the AIRS device family.
pub const DEFAULT_NAME_FILTER: &str = "AIRS";

/// Default low-energy discovery timeout.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the device event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration for an [`AirsDevice`](crate::AirsDevice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Case-sensitive substring a peripheral name must contain to be listed.
    pub name_filter: String,
    /// How long a discovery pass runs before it finishes on its own.
    pub scan_timeout: Duration,
    /// Capacity of the broadcast channel carrying [`DeviceEvent`](crate::DeviceEvent)s.
    pub event_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name_filter: DEFAULT_NAME_FILTER.to_string(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl DeviceConfig {
    /// Set the peripheral name filter.
    pub fn with_name_filter(mut self, filter: impl Into<String>) -> Self {
        self.name_filter = filter.into();
        self
    }

    /// Set the discovery timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check that every field holds a usable value.
    pub fn validate(&self) -> Result<()> {
        if self.name_filter.is_empty() {
            return Err(Error::InvalidParameter {
                name: "name_filter".to_string(),
                value: String::new(),
            });
        }

        if self.scan_timeout.is_zero() {
            return Err(Error::InvalidParameter {
                name: "scan_timeout".to_string(),
                value: format!("{:?}", self.scan_timeout),
            });
        }

        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter {
                name: "event_capacity".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.name_filter, "AIRS");
        assert_eq!(config.scan_timeout, Duration::from_secs(5));
        assert_ok!(config.validate());
    }

    #[test]
    fn test_builder() {
        let config = DeviceConfig::default()
            .with_name_filter("BME")
            .with_scan_timeout(Duration::from_secs(10))
            .with_event_capacity(8);
        assert_eq!(config.name_filter, "BME");
        assert_eq!(config.scan_timeout, Duration::from_secs(10));
        assert_eq!(config.event_capacity, 8);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert_err!(DeviceConfig::default().with_name_filter("").validate());
        assert_err!(DeviceConfig::default()
            .with_scan_timeout(Duration::ZERO)
            .validate());
        assert!(matches!(
            DeviceConfig::default().with_event_capacity(0).validate(),
            Err(Error::InvalidParameter { name, .. }) if name == "event_capacity"
        ));
    }
}
