//! Scan for AIRS sensors, connect to the first one and print its telemetry.
//!
//! Run with: cargo run --example stream_telemetry

use airs_ble::{AirsDevice, DeviceConfig, DeviceEvent, Error, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("airs_ble=info".parse().unwrap()),
        )
        .init();

    println!("AIRS Telemetry");
    println!("==============\n");
    println!("Scanning for sensors...\n");

    let device = AirsDevice::new(DeviceConfig::default()).await?;
    let mut events = device.subscribe();

    device.start_scan()?;

    loop {
        match events.recv().await {
            Ok(DeviceEvent::PeripheralFound(info)) => println!("  found {}", info),
            Ok(DeviceEvent::ScanFinished) => break,
            Ok(DeviceEvent::ScanError(kind)) => {
                return Err(Error::Scan { kind });
            }
            Ok(_) => {}
            Err(e) => return Err(Error::Internal(e.to_string())),
        }
    }

    let sensors = device.device_list();
    if sensors.is_empty() {
        println!("\nNo AIRS sensors found.");
        device.shutdown().await?;
        return Ok(());
    }

    println!("\nConnecting to {}...", sensors[0]);
    device.start_connect(0).await?;

    println!("Press Ctrl+C to exit.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            event = events.recv() => match event {
                Ok(DeviceEvent::SensorReading(reading)) => {
                    println!(
                        "[{}] {:6.2}°C ({:6.2}°F)  {:5.1}% RH  {:7.2} hPa",
                        reading.received_at.format("%H:%M:%S"),
                        reading.temperature,
                        reading.temperature_fahrenheit(),
                        reading.humidity,
                        reading.pressure
                    );
                }
                Ok(DeviceEvent::BatteryLevel(level)) => println!("Battery: {}", level),
                Ok(DeviceEvent::SessionStateChanged(state)) => println!("Session: {}", state),
                Ok(DeviceEvent::Disconnected) => {
                    println!("Sensor disconnected.");
                    break;
                }
                Ok(DeviceEvent::ControllerError(reason)) => {
                    println!("Connection failed: {}", reason);
                    break;
                }
                Ok(_) => {}
                Err(e) => println!("Event stream lagged: {}", e),
            },
        }
    }

    device.disconnect()?;
    device.shutdown().await?;

    Ok(())
}
