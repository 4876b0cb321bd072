//! High-level handle for one AIRS sensor session.
//!
//! [`AirsDevice`] owns a driver task that holds the [`Scanner`], the
//! [`Session`] and the platform. Commands and platform completions are
//! processed one at a time on that task, so the state machines never see
//! concurrent mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ble::backend::BtleplugPlatform;
use crate::ble::peripheral::PeripheralInfo;
use crate::ble::platform::{BlePlatform, PlatformEvent};
use crate::ble::scanner::Scanner;
use crate::ble::session::{Session, SessionState};
use crate::config::DeviceConfig;
use crate::data::{BatteryLevel, SensorReading};
use crate::error::{Error, Result};
use crate::events::DeviceEvent;

/// Handle for a registered callback.
///
/// The callback stays registered until the handle is dropped or
/// [`unregister`](Self::unregister) is called.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Requests sent to the driver task.
enum Command {
    StartScan,
    StopScan,
    Connect {
        index: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect,
    WriteData {
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    BatteryLevel {
        reply: oneshot::Sender<BatteryLevel>,
    },
    Shutdown,
}

/// State mirrored out of the driver task for synchronous getters.
#[derive(Debug, Default)]
struct Snapshot {
    session_state: SessionState,
    is_scanning: bool,
    peripherals: Vec<PeripheralInfo>,
    device_list: Vec<String>,
}

/// A connection to AIRS sensors.
pub struct AirsDevice {
    /// Command channel into the driver task.
    command_tx: mpsc::UnboundedSender<Command>,
    /// Device event channel.
    event_tx: broadcast::Sender<DeviceEvent>,
    /// State published by the driver task.
    snapshot: Arc<RwLock<Snapshot>>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Driver task handle.
    driver_handle: RwLock<Option<JoinHandle<()>>>,
}

impl AirsDevice {
    /// Create a device on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or Bluetooth is not
    /// available.
    pub async fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;

        let (platform_tx, platform_rx) = mpsc::unbounded_channel();
        let platform = BtleplugPlatform::new(platform_tx).await?;

        Self::with_platform(platform, platform_rx, config)
    }

    /// Create a device on a custom platform.
    ///
    /// `platform_events` must receive every event the platform and its
    /// controllers produce. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_platform<P>(
        platform: P,
        platform_events: mpsc::UnboundedReceiver<PlatformEvent<P::Handle>>,
        config: DeviceConfig,
    ) -> Result<Self>
    where
        P: BlePlatform + Send + 'static,
        P::Handle: Send + 'static,
        P::Controller: Send + 'static,
    {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(RwLock::new(Snapshot::default()));

        let driver = Driver {
            scanner: Scanner::new(&config, event_tx.clone()),
            session: Session::new(event_tx.clone()),
            platform,
            snapshot: snapshot.clone(),
        };
        let handle = tokio::spawn(driver.run(command_rx, platform_events));

        Ok(Self {
            command_tx,
            event_tx,
            snapshot,
            callback_counter: AtomicU64::new(0),
            driver_handle: RwLock::new(Some(handle)),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::Internal("device driver stopped".to_string()))
    }

    async fn request<T>(&self, command: Command, reply: oneshot::Receiver<T>) -> Result<T> {
        self.send(command)?;
        reply
            .await
            .map_err(|_| Error::Internal("device driver dropped the request".to_string()))
    }

    // === Scanning ===

    /// Start a discovery pass, restarting any pass in progress.
    pub fn start_scan(&self) -> Result<()> {
        self.send(Command::StartScan)
    }

    /// Stop the current discovery pass and publish what was found.
    pub fn stop_scan(&self) -> Result<()> {
        self.send(Command::StopScan)
    }

    /// Check if a discovery pass is running.
    pub fn is_scanning(&self) -> bool {
        self.snapshot.read().is_scanning
    }

    /// Names published by the last finished discovery pass.
    pub fn device_list(&self) -> Vec<String> {
        self.snapshot.read().device_list.clone()
    }

    /// Peripherals accepted by the current (or last) discovery pass.
    ///
    /// The position of an entry is the index taken by [`start_connect`](Self::start_connect).
    pub fn peripherals(&self) -> Vec<PeripheralInfo> {
        self.snapshot.read().peripherals.clone()
    }

    // === Session ===

    /// Connect to the discovered peripheral at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeripheralNotFound`] if no peripheral is listed at
    /// `index`.
    pub async fn start_connect(&self, index: usize) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Connect { index, reply }, rx).await?
    }

    /// Disconnect the current session.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Write a payload to the sensor's transport TX characteristic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] until the transport service is resolved.
    pub async fn write_data(&self, data: impl Into<Bytes>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let data = data.into();
        self.request(Command::WriteData { data, reply }, rx).await?
    }

    /// Request a battery read and return the last known level.
    pub async fn battery_level(&self) -> Result<BatteryLevel> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::BatteryLevel { reply }, rx).await
    }

    /// Get the session state.
    pub fn session_state(&self) -> SessionState {
        self.snapshot.read().session_state
    }

    // === Events ===

    /// Subscribe to every device event.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for decoded sensor readings.
    pub fn on_sensor_reading<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&SensorReading) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(DeviceEvent::SensorReading(reading)) => callback(&reading),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Sensor reading callback lagged by {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Register a callback for battery level updates.
    pub fn on_battery_level<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(BatteryLevel) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(DeviceEvent::BatteryLevel(level)) => callback(level),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Battery callback lagged by {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Stop scanning, release the session and end the driver task.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down AIRS device");

        let _ = self.command_tx.send(Command::Shutdown);

        let handle = self.driver_handle.write().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| Error::Internal(format!("device driver failed: {}", e)))?;
        }

        Ok(())
    }
}

impl Drop for AirsDevice {
    fn drop(&mut self) {
        if let Some(handle) = self.driver_handle.write().take() {
            handle.abort();
        }
    }
}

/// Owner of the scanner and session, run on its own task.
struct Driver<P: BlePlatform> {
    platform: P,
    scanner: Scanner<P::Handle>,
    session: Session<P>,
    snapshot: Arc<RwLock<Snapshot>>,
}

impl<P: BlePlatform> Driver<P> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut platform_events: mpsc::UnboundedReceiver<PlatformEvent<P::Handle>>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = platform_events.recv() => self.handle_platform_event(event),
            }
            self.publish();
        }

        if self.scanner.is_scanning() {
            self.scanner.stop_scan(&mut self.platform);
        }
        self.session.disconnect();
        self.publish();

        debug!("Device driver task ended");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartScan => {
                self.scanner.start_scan(&mut self.platform);
            }
            Command::StopScan => self.scanner.stop_scan(&mut self.platform),
            Command::Connect { index, reply } => {
                let result = match self.scanner.peripheral(index) {
                    Some(peripheral) => {
                        let peripheral = peripheral.clone();
                        self.session.start_connect(peripheral, &mut self.platform);
                        Ok(())
                    }
                    None => Err(Error::PeripheralNotFound { index }),
                };
                let _ = reply.send(result);
            }
            Command::Disconnect => self.session.disconnect(),
            Command::WriteData { data, reply } => {
                let _ = reply.send(self.session.write_data(&data));
            }
            Command::BatteryLevel { reply } => {
                let _ = reply.send(self.session.battery_level());
            }
            Command::Shutdown => {}
        }
    }

    fn handle_platform_event(&mut self, event: PlatformEvent<P::Handle>) {
        match event {
            PlatformEvent::Scan { pass, event } => self.scanner.handle_event(pass, event),
            PlatformEvent::Gatt { connection, event } => {
                self.session.handle_event(connection, event)
            }
        }
    }

    fn publish(&self) {
        let mut snapshot = self.snapshot.write();
        snapshot.session_state = self.session.state();
        snapshot.is_scanning = self.scanner.is_scanning();
        snapshot.peripherals = self.scanner.discovered().infos();
        snapshot.device_list = self.scanner.device_list().to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_callback_handle_unregisters_once() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        let handle = CallbackHandle::new(7, move || flag.store(true, Ordering::SeqCst));
        assert_eq!(handle.id(), 7);
        handle.unregister();

        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_callback_handle_unregisters_on_drop() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        drop(CallbackHandle::new(1, move || flag.store(true, Ordering::SeqCst)));

        assert!(called.load(Ordering::SeqCst));
    }
}
