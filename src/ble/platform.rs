//! Platform BLE stack contract.
//!
//! The scanner and the session never talk to a radio directly. They issue
//! requests through [`BlePlatform`] and [`GattController`], which return
//! immediately, and observe completion through [`PlatformEvent`]s delivered
//! later on the single event-processing task.

use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use crate::ble::peripheral::{PeripheralDescriptor, PeripheralInfo};
use crate::error::ScanErrorKind;

/// Identifies one connection attempt.
///
/// Every GATT event is tagged with the id of the controller that produced
/// it, so events from a replaced controller can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// The id following this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one discovery pass.
///
/// Every scan event is tagged with the id of the pass that produced it, so
/// events queued by a restarted pass can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ScanId(pub u64);

impl ScanId {
    /// The id following this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pass {}", self.0)
    }
}

/// A characteristic, addressed by its service and its own UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicId {
    /// UUID of the owning service.
    pub service: Uuid,
    /// UUID of the characteristic.
    pub uuid: Uuid,
}

impl CharacteristicId {
    /// Create a characteristic id.
    pub const fn new(service: Uuid, uuid: Uuid) -> Self {
        Self { service, uuid }
    }
}

/// A descriptor, addressed by its characteristic and its own UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId {
    /// The characteristic the descriptor belongs to.
    pub characteristic: CharacteristicId,
    /// UUID of the descriptor.
    pub uuid: Uuid,
}

/// A resolved characteristic as seen after service details were discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    /// Where the characteristic lives.
    pub id: CharacteristicId,
    /// UUIDs of the descriptors attached to it.
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    /// Look up one of the characteristic's descriptors.
    pub fn descriptor(&self, uuid: &Uuid) -> Option<DescriptorId> {
        self.descriptors
            .iter()
            .find(|d| *d == uuid)
            .map(|d| DescriptorId {
                characteristic: self.id,
                uuid: *d,
            })
    }
}

/// Write mode for characteristic writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Acknowledged write.
    WithResponse,
    /// Fire-and-forget write.
    WithoutResponse,
}

/// Detail discovery state of a service proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Characteristic discovery is running.
    Discovering,
    /// Characteristics and descriptors are known.
    Discovered,
    /// The service is not available on the connected peripheral.
    Invalid,
}

/// A raw discovery report, before filtering.
#[derive(Debug, Clone)]
pub struct RawDiscovery<H> {
    /// Identity reported by the platform.
    pub info: PeripheralInfo,
    /// Whether the peripheral advertises low-energy capability.
    pub low_energy: bool,
    /// Handle needed to connect to the peripheral.
    pub handle: H,
}

impl<H> RawDiscovery<H> {
    /// Turn the report into a descriptor.
    pub fn into_descriptor(self) -> PeripheralDescriptor<H> {
        PeripheralDescriptor::new(self.info, self.handle)
    }
}

/// Events produced by the discovery agent.
#[derive(Debug, Clone)]
pub enum ScanEvent<H> {
    /// A peripheral was seen.
    DeviceDiscovered(RawDiscovery<H>),
    /// Discovery failed.
    Error(ScanErrorKind),
    /// Discovery ended (timeout or stop).
    Finished,
}

/// Events produced by a GATT controller and its service proxies.
#[derive(Debug, Clone)]
pub enum GattEvent {
    /// The link is up.
    Connected,
    /// The link went down.
    Disconnected,
    /// The connection layer failed.
    ControllerError(String),
    /// A primary service was found.
    ServiceDiscovered(Uuid),
    /// Service discovery completed.
    DiscoveryFinished,
    /// A service proxy changed state.
    ServiceStateChanged {
        /// The service.
        service: Uuid,
        /// Its new state.
        state: ServiceState,
    },
    /// An operation on a service proxy failed.
    ServiceError {
        /// The service.
        service: Uuid,
        /// Description reported by the platform.
        reason: String,
    },
    /// A notification arrived.
    CharacteristicChanged {
        /// The characteristic that changed.
        characteristic: CharacteristicId,
        /// Its new value.
        value: Bytes,
    },
    /// A characteristic read completed.
    CharacteristicRead {
        /// The characteristic that was read.
        characteristic: CharacteristicId,
        /// The value read.
        value: Bytes,
    },
    /// A descriptor write was confirmed.
    DescriptorWritten {
        /// The descriptor written.
        descriptor: DescriptorId,
        /// The value written.
        value: Bytes,
    },
}

/// Any event delivered by the platform.
#[derive(Debug, Clone)]
pub enum PlatformEvent<H> {
    /// Discovery agent event for one pass.
    Scan {
        /// Pass that produced the event.
        pass: ScanId,
        /// The event.
        event: ScanEvent<H>,
    },
    /// GATT event for one connection attempt.
    Gatt {
        /// Connection that produced the event.
        connection: ConnectionId,
        /// The event.
        event: GattEvent,
    },
}

/// Client primitive for one GATT connection.
///
/// All methods return immediately; results arrive as [`GattEvent`]s.
#[cfg_attr(test, mockall::automock)]
pub trait GattController {
    /// Open the link. Completes with `Connected` or `ControllerError`.
    fn connect_to_device(&mut self);

    /// Close the link and stop delivering events.
    fn disconnect_from_device(&mut self);

    /// Discover primary services. Emits `ServiceDiscovered` per service, then `DiscoveryFinished`.
    fn discover_services(&mut self);

    /// Discover the characteristics of one service. Emits `ServiceStateChanged`.
    fn discover_details(&mut self, service: Uuid);

    /// Look up a characteristic whose service details have been discovered.
    fn characteristic(&self, id: &CharacteristicId) -> Option<GattCharacteristic>;

    /// Read a characteristic. Emits `CharacteristicRead`.
    fn read_characteristic(&mut self, id: &CharacteristicId);

    /// Write a characteristic.
    fn write_characteristic(&mut self, id: &CharacteristicId, value: &[u8], mode: WriteMode);

    /// Write a descriptor. Emits `DescriptorWritten` on success.
    fn write_descriptor(&mut self, id: &DescriptorId, value: &[u8]);
}

/// Entry point into the platform BLE stack.
pub trait BlePlatform {
    /// Platform handle stored in each [`PeripheralDescriptor`].
    type Handle: Clone + std::fmt::Debug;
    /// Controller type created for each connection attempt.
    type Controller: GattController;

    /// Begin a time-bounded low-energy discovery pass, restarting any pass in progress.
    ///
    /// Every event of the pass is tagged with `pass`.
    fn start_discovery(&mut self, pass: ScanId, timeout: Duration);

    /// Stop the current discovery pass. No `Finished` event follows.
    fn stop_discovery(&mut self);

    /// Create the controller for one connection attempt.
    fn create_controller(
        &mut self,
        peripheral: &PeripheralDescriptor<Self::Handle>,
        connection: ConnectionId,
    ) -> Self::Controller;
}
