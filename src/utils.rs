//! Utility functions for the airs-ble crate.

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use airs_ble::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert pascals, as reported by the sensor, to hectopascals for display.
///
/// # Example
///
/// ```
/// use airs_ble::pascals_to_hectopascals;
///
/// assert_eq!(pascals_to_hectopascals(101325.0), 1013.25);
/// ```
#[inline]
pub fn pascals_to_hectopascals(pascals: f32) -> f32 {
    pascals / 100.0
}
