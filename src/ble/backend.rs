//! btleplug implementation of the platform contract.
//!
//! Every request spawns a tokio task that performs the btleplug call and
//! reports the outcome as a [`PlatformEvent`] on the shared channel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::peripheral::{PeripheralDescriptor, PeripheralInfo};
use crate::ble::platform::{
    BlePlatform, CharacteristicId, ConnectionId, DescriptorId, GattCharacteristic,
    GattController, GattEvent, PlatformEvent, RawDiscovery, ScanEvent, ScanId, ServiceState,
    WriteMode,
};
use crate::ble::uuids::{is_handled_service, CLIENT_CONFIG_DESCRIPTOR_UUID};
use crate::error::{Error, Result, ScanErrorKind};
use crate::protocol::{NOTIFICATIONS_DISABLE, NOTIFICATIONS_ENABLE};

/// Sender half of the platform event channel.
pub type PlatformEventSender = mpsc::UnboundedSender<PlatformEvent<Peripheral>>;

/// Discovered service table of one connection.
type ServiceTable = Arc<RwLock<HashMap<Uuid, Service>>>;

/// Platform backed by the first btleplug adapter.
pub struct BtleplugPlatform {
    /// The BLE adapter to use.
    adapter: Adapter,
    /// Channel for platform events.
    events: PlatformEventSender,
    /// Handle to the discovery task.
    scan_handle: Option<JoinHandle<()>>,
}

impl BtleplugPlatform {
    /// Create a platform on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(events: PlatformEventSender) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, events))
    }

    /// Create a platform on a specific adapter.
    pub fn with_adapter(adapter: Adapter, events: PlatformEventSender) -> Self {
        Self {
            adapter,
            events,
            scan_handle: None,
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Run one discovery pass until `timeout` elapses.
    async fn run_discovery(
        adapter: Adapter,
        events: PlatformEventSender,
        pass: ScanId,
        timeout: Duration,
    ) {
        let send = |event: ScanEvent<Peripheral>| {
            let _ = events.send(PlatformEvent::Scan { pass, event });
        };

        let mut central_events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to get adapter events: {}", e);
                send(ScanEvent::Error(ScanErrorKind::from(&e)));
                return;
            }
        };

        if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
            error!("Failed to start scan: {}", e);
            send(ScanEvent::Error(ScanErrorKind::from(&e)));
            return;
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = central_events.next() => match event {
                    Some(CentralEvent::DeviceDiscovered(id))
                    | Some(CentralEvent::DeviceUpdated(id)) => {
                        if let Some(raw) = Self::describe(&adapter, &id).await {
                            send(ScanEvent::DeviceDiscovered(raw));
                        }
                    }
                    Some(CentralEvent::StateUpdate(CentralState::PoweredOff)) => {
                        send(ScanEvent::Error(ScanErrorKind::PoweredOff));
                        return;
                    }
                    Some(_) => {}
                    None => {
                        debug!("Adapter event stream ended");
                        break;
                    }
                }
            }
        }

        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        debug!("Scan event loop ended");
        send(ScanEvent::Finished);
    }

    /// Build a discovery report from the peripheral's properties.
    async fn describe(adapter: &Adapter, id: &PeripheralId) -> Option<RawDiscovery<Peripheral>> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        Some(RawDiscovery {
            info: PeripheralInfo {
                address: properties.address.to_string(),
                name: properties.local_name.unwrap_or_default(),
                rssi: properties.rssi.unwrap_or(i16::MIN),
            },
            // btleplug only reports low-energy peripherals.
            low_energy: true,
            handle: peripheral,
        })
    }
}

impl BlePlatform for BtleplugPlatform {
    type Handle = Peripheral;
    type Controller = BtleplugController;

    fn start_discovery(&mut self, pass: ScanId, timeout: Duration) {
        if let Some(handle) = self.scan_handle.take() {
            handle.abort();
        }

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.scan_handle = Some(tokio::spawn(Self::run_discovery(
            adapter, events, pass, timeout,
        )));
    }

    fn stop_discovery(&mut self) {
        if let Some(handle) = self.scan_handle.take() {
            handle.abort();
        }

        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
    }

    fn create_controller(
        &mut self,
        peripheral: &PeripheralDescriptor<Peripheral>,
        connection: ConnectionId,
    ) -> BtleplugController {
        BtleplugController::new(
            self.adapter.clone(),
            peripheral.handle().clone(),
            GattEventSender {
                tx: self.events.clone(),
                connection,
            },
        )
    }
}

impl Drop for BtleplugPlatform {
    fn drop(&mut self) {
        if let Some(handle) = self.scan_handle.take() {
            handle.abort();
        }
    }
}

/// Sends GATT events tagged with one connection id.
#[derive(Clone)]
struct GattEventSender {
    tx: PlatformEventSender,
    connection: ConnectionId,
}

impl GattEventSender {
    fn send(&self, event: GattEvent) {
        let _ = self.tx.send(PlatformEvent::Gatt {
            connection: self.connection,
            event,
        });
    }
}

/// GATT controller for one btleplug peripheral.
pub struct BtleplugController {
    /// Adapter, for watching disconnects.
    adapter: Adapter,
    /// The connected peripheral.
    peripheral: Peripheral,
    /// Event channel for this connection.
    events: GattEventSender,
    /// Services found by the last discovery.
    services: ServiceTable,
    /// Tasks running on behalf of this connection.
    tasks: Vec<JoinHandle<()>>,
}

impl BtleplugController {
    fn new(adapter: Adapter, peripheral: Peripheral, events: GattEventSender) -> Self {
        Self {
            adapter,
            peripheral,
            events,
            services: Arc::new(RwLock::new(HashMap::new())),
            tasks: Vec::new(),
        }
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|handle| !handle.is_finished());
        self.tasks.push(tokio::spawn(task));
    }

    fn find_characteristic(&self, id: &CharacteristicId) -> Option<Characteristic> {
        self.services
            .read()
            .get(&id.service)?
            .characteristics
            .iter()
            .find(|c| c.uuid == id.uuid)
            .cloned()
    }

    fn missing_characteristic(&self, id: &CharacteristicId) {
        self.events.send(GattEvent::ServiceError {
            service: id.service,
            reason: Error::CharacteristicNotFound {
                uuid: id.uuid.to_string(),
            }
            .to_string(),
        });
    }

    /// Find the service owning a notifying characteristic.
    fn owning_service(services: &ServiceTable, characteristic: &Uuid) -> Uuid {
        services
            .read()
            .values()
            .find(|s| s.characteristics.iter().any(|c| c.uuid == *characteristic))
            .map(|s| s.uuid)
            .unwrap_or_else(Uuid::nil)
    }

    /// Connect, then pump notifications until the peripheral disconnects.
    async fn run_connection(
        adapter: Adapter,
        peripheral: Peripheral,
        events: GattEventSender,
        services: ServiceTable,
    ) {
        let mut central_events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                events.send(GattEvent::ControllerError(e.to_string()));
                return;
            }
        };

        if let Err(e) = peripheral.connect().await {
            events.send(GattEvent::ControllerError(e.to_string()));
            return;
        }
        events.send(GattEvent::Connected);

        let mut notifications = match peripheral.notifications().await {
            Ok(n) => n,
            Err(e) => {
                events.send(GattEvent::ControllerError(e.to_string()));
                return;
            }
        };

        let id = peripheral.id();
        let mut notifications_open = true;

        loop {
            tokio::select! {
                notification = notifications.next(), if notifications_open => match notification {
                    Some(notification) => {
                        trace!(
                            "Notification received from {}: {} bytes",
                            notification.uuid,
                            notification.value.len()
                        );
                        let service = Self::owning_service(&services, &notification.uuid);
                        events.send(GattEvent::CharacteristicChanged {
                            characteristic: CharacteristicId::new(service, notification.uuid),
                            value: Bytes::from(notification.value),
                        });
                    }
                    None => {
                        debug!("Notification stream ended");
                        notifications_open = false;
                    }
                },
                event = central_events.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(disconnected)) if disconnected == id => {
                        events.send(GattEvent::Disconnected);
                        break;
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }

        debug!("Connection task ended");
    }
}

impl GattController for BtleplugController {
    fn connect_to_device(&mut self) {
        let task = Self::run_connection(
            self.adapter.clone(),
            self.peripheral.clone(),
            self.events.clone(),
            self.services.clone(),
        );
        self.spawn(task);
    }

    fn disconnect_from_device(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }

        let peripheral = self.peripheral.clone();
        tokio::spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                error!("Failed to disconnect: {}", e);
            }
        });
    }

    fn discover_services(&mut self) {
        let peripheral = self.peripheral.clone();
        let events = self.events.clone();
        let services = self.services.clone();

        self.spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                events.send(GattEvent::ControllerError(e.to_string()));
                return;
            }

            let found = peripheral.services();
            {
                let mut table = services.write();
                table.clear();
                for service in &found {
                    table.insert(service.uuid, service.clone());
                }
            }

            for service in found {
                if is_handled_service(&service.uuid) {
                    debug!("Found service {}", service.uuid);
                } else {
                    trace!("Found unhandled service {}", service.uuid);
                }
                events.send(GattEvent::ServiceDiscovered(service.uuid));
            }
            events.send(GattEvent::DiscoveryFinished);
        });
    }

    fn discover_details(&mut self, service: Uuid) {
        // btleplug resolves characteristics during service discovery.
        let state = if self.services.read().contains_key(&service) {
            ServiceState::Discovered
        } else {
            ServiceState::Invalid
        };

        self.events.send(GattEvent::ServiceStateChanged {
            service,
            state: ServiceState::Discovering,
        });
        self.events
            .send(GattEvent::ServiceStateChanged { service, state });
    }

    fn characteristic(&self, id: &CharacteristicId) -> Option<GattCharacteristic> {
        let characteristic = self.find_characteristic(id)?;

        let mut descriptors: Vec<Uuid> = characteristic
            .descriptors
            .iter()
            .map(|d| d.uuid)
            .collect();

        // Some backends hide the CCCD behind subscribe().
        let notifies = characteristic
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE);
        if notifies && !descriptors.contains(&CLIENT_CONFIG_DESCRIPTOR_UUID) {
            descriptors.push(CLIENT_CONFIG_DESCRIPTOR_UUID);
        }

        Some(GattCharacteristic {
            id: *id,
            descriptors,
        })
    }

    fn read_characteristic(&mut self, id: &CharacteristicId) {
        let Some(characteristic) = self.find_characteristic(id) else {
            self.missing_characteristic(id);
            return;
        };

        let id = *id;
        let peripheral = self.peripheral.clone();
        let events = self.events.clone();

        self.spawn(async move {
            match peripheral.read(&characteristic).await {
                Ok(value) => {
                    trace!("Read {} bytes from characteristic {}", value.len(), id.uuid);
                    events.send(GattEvent::CharacteristicRead {
                        characteristic: id,
                        value: Bytes::from(value),
                    });
                }
                Err(e) => events.send(GattEvent::ServiceError {
                    service: id.service,
                    reason: e.to_string(),
                }),
            }
        });
    }

    fn write_characteristic(&mut self, id: &CharacteristicId, value: &[u8], mode: WriteMode) {
        let Some(characteristic) = self.find_characteristic(id) else {
            self.missing_characteristic(id);
            return;
        };

        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        let uuid = id.uuid;
        let value = value.to_vec();
        let peripheral = self.peripheral.clone();

        // A failed data write is logged only; the service path stays as it is.
        self.spawn(async move {
            if let Err(e) = peripheral.write(&characteristic, &value, write_type).await {
                warn!("Write to {} failed: {}", uuid, e);
            }
        });
    }

    fn write_descriptor(&mut self, id: &DescriptorId, value: &[u8]) {
        let Some(characteristic) = self.find_characteristic(&id.characteristic) else {
            self.missing_characteristic(&id.characteristic);
            return;
        };

        let id = *id;
        let value = value.to_vec();
        let peripheral = self.peripheral.clone();
        let events = self.events.clone();

        self.spawn(async move {
            let is_client_config = id.uuid == CLIENT_CONFIG_DESCRIPTOR_UUID;

            let result = if is_client_config && value == NOTIFICATIONS_ENABLE {
                peripheral.subscribe(&characteristic).await
            } else if is_client_config && value == NOTIFICATIONS_DISABLE {
                peripheral.unsubscribe(&characteristic).await
            } else {
                match characteristic.descriptors.iter().find(|d| d.uuid == id.uuid) {
                    Some(descriptor) => peripheral.write_descriptor(descriptor, &value).await,
                    None => Err(btleplug::Error::NoSuchCharacteristic),
                }
            };

            match result {
                Ok(()) => {
                    debug!("Wrote descriptor {} on {}", id.uuid, id.characteristic.uuid);
                    events.send(GattEvent::DescriptorWritten {
                        descriptor: id,
                        value: Bytes::from(value),
                    });
                }
                Err(e) => events.send(GattEvent::ServiceError {
                    service: id.characteristic.service,
                    reason: e.to_string(),
                }),
            }
        });
    }
}

impl Drop for BtleplugController {
    fn drop(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_is_send() {
        fn assert_send<T: Send + 'static>() {}
        assert_send::<BtleplugController>();
        assert_send::<BtleplugPlatform>();
    }
}
