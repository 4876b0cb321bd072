//! GATT session management.
//!
//! A [`Session`] owns the one active connection: it connects, discovers the
//! transport and battery services, subscribes to their notifications,
//! decodes payloads and tears everything down again.
//!
//! The two service paths are independent. Either may be absent, fail, or
//! complete first; a problem on one never aborts the other.

use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::peripheral::PeripheralDescriptor;
use crate::ble::platform::{
    BlePlatform, CharacteristicId, ConnectionId, DescriptorId, GattController, GattEvent,
    ServiceState, WriteMode,
};
use crate::ble::uuids::*;
use crate::data::BatteryLevel;
use crate::error::{Error, Result};
use crate::events::DeviceEvent;
use crate::protocol::{
    decode_battery_level, decode_sensor_reading, NOTIFICATIONS_DISABLE, NOTIFICATIONS_ENABLE,
};

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No connection.
    #[default]
    Idle,
    /// Link establishment and primary service discovery.
    Connecting,
    /// Characteristic discovery on the found services.
    ServiceDiscovery,
    /// Enabling notifications on the transport RX characteristic.
    SubscribingTransport,
    /// Enabling notifications on the battery level characteristic.
    SubscribingBattery,
    /// Steady state: notifications are decoded and forwarded.
    Ready,
    /// Releasing the connection.
    Disconnecting,
    /// The connection layer failed. Left by a new connect or a disconnect.
    Errored,
}

impl SessionState {
    /// Check if a link is being set up or is up.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Disconnecting | Self::Errored)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ServiceDiscovery => write!(f, "ServiceDiscovery"),
            Self::SubscribingTransport => write!(f, "SubscribingTransport"),
            Self::SubscribingBattery => write!(f, "SubscribingBattery"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Errored => write!(f, "Errored"),
        }
    }
}

/// Progress of one service's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathState {
    /// Waiting for the service details.
    Discovering,
    /// Enable value written, waiting for the confirmation.
    Confirming,
    /// Nothing left to wait for.
    Active,
    /// Gave up on this service.
    Failed,
}

/// Serial transport service proxy.
#[derive(Debug)]
struct TransportPath {
    state: PathState,
    tx: Option<CharacteristicId>,
    notify: Option<DescriptorId>,
}

/// Battery service proxy.
#[derive(Debug)]
struct BatteryPath {
    state: PathState,
    level: Option<CharacteristicId>,
    notify: Option<DescriptorId>,
    last: Option<BatteryLevel>,
}

/// Everything owned by one connection attempt. Dropping it releases the
/// controller and both service proxies together.
struct Link<P: BlePlatform> {
    id: ConnectionId,
    peripheral: PeripheralDescriptor<P::Handle>,
    controller: P::Controller,
    found_transport: bool,
    found_battery: bool,
    services_resolved: bool,
    transport: Option<TransportPath>,
    battery: Option<BatteryPath>,
}

/// The single GATT session.
pub struct Session<P: BlePlatform> {
    /// Current state.
    state: SessionState,
    /// Id handed to the most recent controller.
    last_connection: ConnectionId,
    /// The live connection, if any.
    link: Option<Link<P>>,
    /// Channel for device events.
    event_tx: broadcast::Sender<DeviceEvent>,
}

impl<P: BlePlatform> Session<P> {
    /// Create an idle session.
    pub fn new(event_tx: broadcast::Sender<DeviceEvent>) -> Self {
        Self {
            state: SessionState::Idle,
            last_connection: ConnectionId::default(),
            link: None,
            event_tx,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id of the live connection.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.link.as_ref().map(|link| link.id)
    }

    /// The peripheral of the live connection.
    pub fn peripheral(&self) -> Option<&PeripheralDescriptor<P::Handle>> {
        self.link.as_ref().map(|link| &link.peripheral)
    }

    /// Whether the transport service proxy exists.
    pub fn has_transport(&self) -> bool {
        self.link.as_ref().is_some_and(|link| link.transport.is_some())
    }

    /// Whether the battery service proxy exists.
    pub fn has_battery(&self) -> bool {
        self.link.as_ref().is_some_and(|link| link.battery.is_some())
    }

    /// Whether `write_data` will be accepted.
    pub fn is_transport_ready(&self) -> bool {
        self.tx_characteristic().is_some()
    }

    /// Connect to `peripheral`.
    ///
    /// Any previous connection is disconnected and released before the new
    /// controller is created.
    pub fn start_connect(
        &mut self,
        peripheral: PeripheralDescriptor<P::Handle>,
        platform: &mut P,
    ) -> ConnectionId {
        if self.link.is_some() {
            info!("Releasing previous connection");
            self.disconnect();
        }

        let id = self.last_connection.next();
        self.last_connection = id;

        info!("Connecting to {} (connection {})", peripheral.info(), id);

        let controller = platform.create_controller(&peripheral, id);
        self.link = Some(Link {
            id,
            peripheral,
            controller,
            found_transport: false,
            found_battery: false,
            services_resolved: false,
            transport: None,
            battery: None,
        });
        self.set_state(SessionState::Connecting);

        if let Some(link) = self.link.as_mut() {
            link.controller.connect_to_device();
        }

        id
    }

    /// Disconnect and release the live connection.
    pub fn disconnect(&mut self) {
        if self.link.is_none() {
            if self.state == SessionState::Errored {
                self.set_state(SessionState::Idle);
            }
            return;
        }

        self.set_state(SessionState::Disconnecting);
        self.release(true);
        self.set_state(SessionState::Idle);
        let _ = self.event_tx.send(DeviceEvent::Disconnected);
    }

    /// Write a payload to the TX characteristic without response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if the transport service is not connected
    /// or its TX characteristic is unresolved.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let tx = self.tx_characteristic().ok_or(Error::NotReady)?;
        let link = self.link.as_mut().ok_or(Error::NotReady)?;

        link.controller
            .write_characteristic(&tx, data, WriteMode::WithoutResponse);

        trace!("Wrote {} bytes to TX", data.len());

        Ok(())
    }

    /// Request a fresh battery read and return the last value obtained.
    ///
    /// Returns 0% if the battery level characteristic was never resolved.
    pub fn battery_level(&mut self) -> BatteryLevel {
        let Some(link) = self.link.as_mut() else {
            return BatteryLevel::default();
        };
        let Some(battery) = link.battery.as_ref() else {
            return BatteryLevel::default();
        };
        let Some(level) = battery.level else {
            return BatteryLevel::default();
        };

        link.controller.read_characteristic(&level);
        battery.last.unwrap_or_default()
    }

    /// Handle an event from the controller of `connection`.
    ///
    /// Events from any connection other than the live one are dropped.
    pub fn handle_event(&mut self, connection: ConnectionId, event: GattEvent) {
        if self.connection_id() != Some(connection) {
            trace!(
                "Dropping event from stale connection {}: {:?}",
                connection,
                event
            );
            return;
        }

        match event {
            GattEvent::Connected => {
                info!("Device connected");
                if let Some(link) = self.link.as_mut() {
                    link.controller.discover_services();
                }
            }
            GattEvent::Disconnected => {
                info!("Remote device disconnected");
                self.set_state(SessionState::Disconnecting);
                self.release(false);
                self.set_state(SessionState::Idle);
                let _ = self.event_tx.send(DeviceEvent::Disconnected);
            }
            GattEvent::ControllerError(reason) => {
                error!(
                    "{}",
                    Error::Controller {
                        reason: reason.clone()
                    }
                );
                self.release(true);
                self.set_state(SessionState::Errored);
                let _ = self.event_tx.send(DeviceEvent::ControllerError(reason));
            }
            GattEvent::ServiceDiscovered(uuid) => self.service_discovered(uuid),
            GattEvent::DiscoveryFinished => self.service_scan_done(),
            GattEvent::ServiceStateChanged { service, state } => {
                self.service_state_changed(service, state)
            }
            GattEvent::ServiceError { service, reason } => {
                warn!("Service {} error: {}", service, reason);
                self.fail_path(service);
            }
            GattEvent::CharacteristicChanged {
                characteristic,
                value,
            } => self.update_data(characteristic, &value),
            GattEvent::CharacteristicRead {
                characteristic,
                value,
            } => self.characteristic_read(characteristic, &value),
            GattEvent::DescriptorWritten { descriptor, value } => {
                self.confirmed_descriptor_write(descriptor, &value)
            }
        }
    }

    fn service_discovered(&mut self, uuid: Uuid) {
        let Some(link) = self.link.as_mut() else {
            return;
        };

        if uuid == TRANSPORT_SERVICE_UUID {
            link.found_transport = true;
            info!("Transport service found");
        } else if uuid == BATTERY_SERVICE_UUID {
            link.found_battery = true;
            info!("Battery service found");
        } else {
            trace!("Ignoring service {}", uuid);
        }
    }

    fn service_scan_done(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };

        link.services_resolved = true;
        link.transport = None;
        link.battery = None;

        if link.found_transport {
            info!("Connecting to transport service...");
            link.transport = Some(TransportPath {
                state: PathState::Discovering,
                tx: None,
                notify: None,
            });
            link.controller.discover_details(TRANSPORT_SERVICE_UUID);
        } else {
            warn!(
                "{}",
                Error::ServiceNotFound {
                    uuid: TRANSPORT_SERVICE_UUID.to_string()
                }
            );
        }

        if link.found_battery {
            info!("Connecting to battery service...");
            link.battery = Some(BatteryPath {
                state: PathState::Discovering,
                level: None,
                notify: None,
                last: None,
            });
            link.controller.discover_details(BATTERY_SERVICE_UUID);
        } else {
            warn!(
                "{}",
                Error::ServiceNotFound {
                    uuid: BATTERY_SERVICE_UUID.to_string()
                }
            );
        }

        self.refresh_state();
    }

    fn service_state_changed(&mut self, service: Uuid, state: ServiceState) {
        match state {
            ServiceState::Discovering => trace!("Service {} discovering details", service),
            ServiceState::Invalid => {
                warn!("Service {} is invalid", service);
                self.fail_path(service);
            }
            ServiceState::Discovered if service == TRANSPORT_SERVICE_UUID => {
                self.subscribe_transport()
            }
            ServiceState::Discovered if service == BATTERY_SERVICE_UUID => {
                self.subscribe_battery()
            }
            ServiceState::Discovered => trace!("Ignoring details of service {}", service),
        }
    }

    fn subscribe_transport(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let Some(path) = link.transport.as_mut() else {
            return;
        };
        if path.state != PathState::Discovering {
            return;
        }

        let tx_id = CharacteristicId::new(TRANSPORT_SERVICE_UUID, TRANSPORT_TX_UUID);
        let rx_id = CharacteristicId::new(TRANSPORT_SERVICE_UUID, TRANSPORT_RX_UUID);

        let Some(tx) = link.controller.characteristic(&tx_id) else {
            warn!("Tx characteristic not found");
            path.state = PathState::Failed;
            self.refresh_state();
            return;
        };
        let Some(rx) = link.controller.characteristic(&rx_id) else {
            warn!("Rx characteristic not found");
            path.state = PathState::Failed;
            self.refresh_state();
            return;
        };

        path.tx = Some(tx.id);
        match rx.descriptor(&CLIENT_CONFIG_DESCRIPTOR_UUID) {
            Some(descriptor) => {
                link.controller
                    .write_descriptor(&descriptor, &NOTIFICATIONS_ENABLE);
                path.notify = Some(descriptor);
                path.state = PathState::Confirming;
            }
            None => {
                warn!(
                    "{}",
                    Error::DescriptorNotFound {
                        uuid: rx.id.uuid.to_string()
                    }
                );
                path.state = PathState::Active;
            }
        }

        info!("Connection Start");
        let _ = self.event_tx.send(DeviceEvent::ConnectionReady);
        self.refresh_state();
    }

    fn subscribe_battery(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let Some(path) = link.battery.as_mut() else {
            return;
        };
        if path.state != PathState::Discovering {
            return;
        }

        let level_id = CharacteristicId::new(BATTERY_SERVICE_UUID, BATTERY_LEVEL_UUID);
        let Some(level) = link.controller.characteristic(&level_id) else {
            warn!("Battery characteristic not found");
            path.state = PathState::Failed;
            self.refresh_state();
            return;
        };

        path.level = Some(level.id);
        match level.descriptor(&CLIENT_CONFIG_DESCRIPTOR_UUID) {
            Some(descriptor) => {
                link.controller
                    .write_descriptor(&descriptor, &NOTIFICATIONS_ENABLE);
                path.notify = Some(descriptor);
                path.state = PathState::Confirming;
            }
            None => {
                warn!(
                    "{}",
                    Error::DescriptorNotFound {
                        uuid: level.id.uuid.to_string()
                    }
                );
                path.state = PathState::Active;
            }
        }

        self.refresh_state();
    }

    fn confirmed_descriptor_write(&mut self, descriptor: DescriptorId, value: &[u8]) {
        let Some(link) = self.link.as_mut() else {
            return;
        };

        if let Some(path) = link
            .transport
            .as_mut()
            .filter(|t| t.notify == Some(descriptor))
        {
            if value == NOTIFICATIONS_DISABLE {
                info!("Notifications disabled on RX, disconnecting");
                self.disconnect();
                return;
            }
            if value == NOTIFICATIONS_ENABLE && path.state == PathState::Confirming {
                debug!("Transport notifications enabled");
                path.state = PathState::Active;
            }
        } else if let Some(path) = link
            .battery
            .as_mut()
            .filter(|b| b.notify == Some(descriptor))
        {
            if value == NOTIFICATIONS_ENABLE && path.state == PathState::Confirming {
                debug!("Battery notifications enabled");
                path.state = PathState::Active;
            }
        } else {
            trace!("Ignoring write confirmation for {:?}", descriptor);
        }

        self.refresh_state();
    }

    fn update_data(&mut self, characteristic: CharacteristicId, value: &[u8]) {
        let Some(link) = self.link.as_mut() else {
            return;
        };

        if characteristic.uuid == TRANSPORT_RX_UUID {
            if link.transport.is_none() {
                trace!("Dropping RX notification without transport service");
                return;
            }
            match decode_sensor_reading(value) {
                Ok(reading) => {
                    debug!(
                        "{} bytes: {} {} {}",
                        value.len(),
                        reading.temperature,
                        reading.humidity,
                        reading.pressure
                    );
                    let _ = self.event_tx.send(DeviceEvent::SensorReading(reading));
                }
                Err(e) => warn!("Dropping sensor notification: {}", e),
            }
        } else if characteristic.uuid == BATTERY_LEVEL_UUID {
            let Some(battery) = link.battery.as_mut() else {
                trace!("Dropping battery notification without battery service");
                return;
            };
            match decode_battery_level(value) {
                Ok(level) => {
                    battery.last = Some(level);
                    let _ = self.event_tx.send(DeviceEvent::BatteryLevel(level));
                }
                Err(e) => warn!("Dropping battery notification: {}", e),
            }
        } else {
            trace!("Ignoring notification from {}", characteristic.uuid);
        }
    }

    fn characteristic_read(&mut self, characteristic: CharacteristicId, value: &[u8]) {
        if characteristic.uuid != BATTERY_LEVEL_UUID {
            return;
        }
        let Some(battery) = self.link.as_mut().and_then(|link| link.battery.as_mut()) else {
            return;
        };

        match decode_battery_level(value) {
            Ok(level) => {
                battery.last = Some(level);
                let _ = self.event_tx.send(DeviceEvent::BatteryLevel(level));
            }
            Err(e) => warn!("Ignoring battery read: {}", e),
        }
    }

    fn fail_path(&mut self, service: Uuid) {
        let Some(link) = self.link.as_mut() else {
            return;
        };

        let state = if service == TRANSPORT_SERVICE_UUID {
            link.transport.as_mut().map(|path| &mut path.state)
        } else if service == BATTERY_SERVICE_UUID {
            link.battery.as_mut().map(|path| &mut path.state)
        } else {
            None
        };

        // Only a path still being set up can fail; errors on an active path are logged only.
        match state {
            Some(state) if matches!(*state, PathState::Discovering | PathState::Confirming) => {
                debug!("Service {} path failed", service);
                *state = PathState::Failed;
            }
            Some(state) => {
                trace!("Service {} path is {:?}, not failing it", service, state);
                return;
            }
            None => return,
        }

        self.refresh_state();
    }

    fn tx_characteristic(&self) -> Option<CharacteristicId> {
        self.link
            .as_ref()
            .and_then(|link| link.transport.as_ref())
            .and_then(|path| path.tx)
    }

    /// Drop the live link, optionally closing it first.
    fn release(&mut self, close_link: bool) {
        if let Some(mut link) = self.link.take() {
            if close_link {
                link.controller.disconnect_from_device();
            }
            debug!("Released connection {} to {}", link.id, link.peripheral.name());
        }
    }

    /// Derive the state from the progress of both service paths.
    fn refresh_state(&mut self) {
        let Some(link) = self.link.as_ref() else {
            return;
        };
        if !link.services_resolved {
            return;
        }

        let transport = link.transport.as_ref().map(|p| p.state);
        let battery = link.battery.as_ref().map(|p| p.state);

        let state = if transport == Some(PathState::Confirming) {
            SessionState::SubscribingTransport
        } else if battery == Some(PathState::Confirming) {
            SessionState::SubscribingBattery
        } else if transport == Some(PathState::Discovering)
            || battery == Some(PathState::Discovering)
        {
            SessionState::ServiceDiscovery
        } else {
            SessionState::Ready
        };

        self.set_state(state);
    }

    /// Update the state and emit an event.
    fn set_state(&mut self, new_state: SessionState) {
        let old_state = std::mem::replace(&mut self.state, new_state);

        if old_state != new_state {
            debug!("Session state changed: {} -> {}", old_state, new_state);
            let _ = self
                .event_tx
                .send(DeviceEvent::SessionStateChanged(new_state));
        }
    }
}

impl<P: BlePlatform> Drop for Session<P> {
    fn drop(&mut self) {
        self.release(true);
    }
}
