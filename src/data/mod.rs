//! Data structures for sensor telemetry.
//!
//! This module contains the value types emitted by a connected sensor.

pub mod telemetry;

pub use telemetry::{BatteryLevel, SensorReading};
