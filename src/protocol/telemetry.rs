//! Telemetry payload decoding.
//!
//! Converts raw characteristic payloads into [`SensorReading`] and
//! [`BatteryLevel`] values.

use bytes::Buf;
use tracing::trace;

use crate::data::{BatteryLevel, SensorReading};
use crate::error::{Error, Result};
use crate::utils::pascals_to_hectopascals;

/// Size of the sensor record: three little-endian `f32` values.
pub const SENSOR_RECORD_LEN: usize = 12;

/// Longest battery payload whose hex rendering still fits a `u32`.
const MAX_BATTERY_PAYLOAD_LEN: usize = 4;

/// Decode an RX notification into a sensor reading.
///
/// Layout:
/// - Bytes 0-3: temperature in °C (`f32` little-endian)
/// - Bytes 4-7: relative humidity in % (`f32` little-endian)
/// - Bytes 8-11: pressure in Pa (`f32` little-endian), emitted in hPa
///
/// Trailing bytes beyond the record are ignored.
pub fn decode_sensor_reading(payload: &[u8]) -> Result<SensorReading> {
    if payload.len() < SENSOR_RECORD_LEN {
        return Err(Error::Decode {
            context: format!(
                "Sensor payload too short: {} bytes (need at least {})",
                payload.len(),
                SENSOR_RECORD_LEN
            ),
        });
    }

    let mut buf = &payload[..SENSOR_RECORD_LEN];
    let temperature = buf.get_f32_le();
    let humidity = buf.get_f32_le();
    let pressure = buf.get_f32_le();

    trace!(
        "Decoded sensor record: {} {} {}",
        temperature,
        humidity,
        pressure
    );

    Ok(SensorReading::new(
        temperature,
        humidity,
        pascals_to_hectopascals(pressure),
    ))
}

/// Decode a battery level notification or read result.
///
/// The payload is rendered as hex text and that text is parsed as a
/// base-16 integer, which for the one-byte Battery Level value is the byte
/// itself. Values above 100 are clamped to 100.
pub fn decode_battery_level(payload: &[u8]) -> Result<BatteryLevel> {
    if payload.is_empty() || payload.len() > MAX_BATTERY_PAYLOAD_LEN {
        return Err(Error::Decode {
            context: format!("Battery payload has invalid length {}", payload.len()),
        });
    }

    let hex: String = payload.iter().map(|b| format!("{:02x}", b)).collect();
    let raw = u32::from_str_radix(&hex, 16).map_err(|e| Error::Decode {
        context: format!("Battery payload {:?} is not a number: {}", hex, e),
    })?;

    Ok(BatteryLevel::new(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(temperature: f32, humidity: f32, pressure: f32) -> Vec<u8> {
        let mut data = Vec::with_capacity(SENSOR_RECORD_LEN);
        data.extend_from_slice(&temperature.to_le_bytes());
        data.extend_from_slice(&humidity.to_le_bytes());
        data.extend_from_slice(&pressure.to_le_bytes());
        data
    }

    #[test]
    fn test_decode_sensor_reading() {
        let reading = decode_sensor_reading(&record(21.5, 40.0, 101325.0)).unwrap();
        assert_eq!(reading.temperature, 21.5);
        assert_eq!(reading.humidity, 40.0);
        assert_eq!(reading.pressure, 1013.25);
    }

    #[test]
    fn test_decode_sensor_known_bits() {
        // 1.0, -2.0, 0.0
        let data = [
            0x00, 0x00, 0x80, 0x3F, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00,
        ];
        let reading = decode_sensor_reading(&data).unwrap();
        assert_eq!(reading.values(), [1.0, -2.0, 0.0]);
    }

    #[test]
    fn test_decode_sensor_ignores_trailing_bytes() {
        let mut data = record(-5.25, 99.5, 90000.0);
        data.extend_from_slice(&[0xAA, 0xBB]);
        let reading = decode_sensor_reading(&data).unwrap();
        assert_eq!(reading.values(), [-5.25, 99.5, 900.0]);
    }

    #[test]
    fn test_decode_sensor_too_short() {
        let data = record(21.5, 40.0, 101325.0);
        for len in [0, 1, 4, 8, 11] {
            assert!(matches!(
                decode_sensor_reading(&data[..len]),
                Err(Error::Decode { .. })
            ));
        }
    }

    #[test]
    fn test_decode_battery_level() {
        assert_eq!(decode_battery_level(&[0x00]).unwrap().percent(), 0);
        assert_eq!(decode_battery_level(&[0x57]).unwrap().percent(), 87);
        assert_eq!(decode_battery_level(&[0x64]).unwrap().percent(), 100);
        assert_eq!(decode_battery_level(&[0x65]).unwrap().percent(), 100);
        assert_eq!(decode_battery_level(&[0xFF]).unwrap().percent(), 100);
        // Multi-byte payloads read as one big-endian number.
        assert_eq!(decode_battery_level(&[0x00, 0x32]).unwrap().percent(), 50);
        assert_eq!(decode_battery_level(&[0x01, 0x00]).unwrap().percent(), 100);
    }

    #[test]
    fn test_decode_battery_invalid_length() {
        assert!(matches!(
            decode_battery_level(&[]),
            Err(Error::Decode { .. })
        ));
        assert!(decode_battery_level(&[0, 0, 0, 0, 1]).is_err());
    }

    proptest! {
        #[test]
        fn prop_single_byte_battery(byte in any::<u8>()) {
            let level = decode_battery_level(&[byte]).unwrap().percent();
            prop_assert_eq!(level, byte.min(100));
        }

        #[test]
        fn prop_short_sensor_payload_rejected(data in proptest::collection::vec(any::<u8>(), 0..SENSOR_RECORD_LEN)) {
            prop_assert!(decode_sensor_reading(&data).is_err());
        }
    }
}
