//! Telemetry value types.

use chrono::{DateTime, Utc};

use crate::utils::celsius_to_fahrenheit;

/// One environmental reading from the sensor.
///
/// Pressure is already in display units (hPa); the conversion from the
/// sensor's pascals happens in the decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorReading {
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub humidity: f32,
    /// Barometric pressure in hectopascals.
    pub pressure: f32,
    /// When the notification carrying this reading was decoded.
    pub received_at: DateTime<Utc>,
}

impl SensorReading {
    /// Create a reading stamped with the current time.
    pub fn new(temperature: f32, humidity: f32, pressure: f32) -> Self {
        Self {
            temperature,
            humidity,
            pressure,
            received_at: Utc::now(),
        }
    }

    /// The three values in emission order.
    pub fn values(&self) -> [f32; 3] {
        [self.temperature, self.humidity, self.pressure]
    }

    /// Temperature in degrees Fahrenheit.
    pub fn temperature_fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(self.temperature as f64)
    }
}

/// Battery charge in percent, always within 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatteryLevel(u8);

impl BatteryLevel {
    /// Highest valid level.
    pub const MAX: u8 = 100;

    /// Create a level, clamping anything above 100 to 100.
    pub fn new(raw: u32) -> Self {
        Self(raw.min(Self::MAX as u32) as u8)
    }

    /// The level in percent.
    pub fn percent(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for BatteryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sensor_reading_values() {
        let reading = SensorReading::new(21.5, 40.0, 1013.25);
        assert_eq!(reading.values(), [21.5, 40.0, 1013.25]);
        assert!((reading.temperature_fahrenheit() - 70.7).abs() < 0.001);
    }

    #[test]
    fn test_battery_level_clamp() {
        assert_eq!(BatteryLevel::new(0).percent(), 0);
        assert_eq!(BatteryLevel::new(57).percent(), 57);
        assert_eq!(BatteryLevel::new(100).percent(), 100);
        assert_eq!(BatteryLevel::new(101).percent(), 100);
        assert_eq!(BatteryLevel::new(255).percent(), 100);
        assert_eq!(BatteryLevel::default().percent(), 0);
        assert_eq!(BatteryLevel::new(80).to_string(), "80%");
    }

    proptest! {
        #[test]
        fn prop_battery_level_in_range(raw in any::<u32>()) {
            let level = BatteryLevel::new(raw).percent();
            prop_assert!(level <= 100);
            if raw <= 100 {
                prop_assert_eq!(level as u32, raw);
            } else {
                prop_assert_eq!(level, 100);
            }
        }
    }
}
