//! BLE scanning functionality.
//!
//! Provides the scanner that builds the list of AIRS sensors in range.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::ble::peripheral::{PeripheralDescriptor, PeripheralInfo};
use crate::ble::platform::{BlePlatform, RawDiscovery, ScanEvent, ScanId};
use crate::config::DeviceConfig;
use crate::error::ScanErrorKind;
use crate::events::DeviceEvent;

/// Check whether a discovery report passes the filter.
///
/// The peripheral must advertise low-energy capability and its name must
/// contain `marker` (case-sensitive).
pub fn matches_filter<H>(raw: &RawDiscovery<H>, marker: &str) -> bool {
    raw.low_energy && raw.info.name.contains(marker)
}

/// Ordered list of accepted peripherals, unique by name.
#[derive(Debug, Clone)]
pub struct DiscoveryList<H> {
    entries: Vec<PeripheralDescriptor<H>>,
}

impl<H> Default for DiscoveryList<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H> DiscoveryList<H> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor unless one with the same name is already listed.
    ///
    /// Returns whether the descriptor was added.
    pub fn push_unique(&mut self, descriptor: PeripheralDescriptor<H>) -> bool {
        if self.contains_name(descriptor.name()) {
            return false;
        }
        self.entries.push(descriptor);
        true
    }

    /// Check whether a peripheral with this exact name is listed.
    pub fn contains_name(&self, name: &str) -> bool {
        self.entries.iter().any(|d| d.name() == name)
    }

    /// Get the descriptor at `index`.
    pub fn get(&self, index: usize) -> Option<&PeripheralDescriptor<H>> {
        self.entries.get(index)
    }

    /// Names in discovery order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|d| d.name().to_string()).collect()
    }

    /// Identity records in discovery order.
    pub fn infos(&self) -> Vec<PeripheralInfo> {
        self.entries.iter().map(|d| d.info().clone()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Scanner for AIRS sensors.
///
/// Drives the platform discovery agent, filters the reports it delivers and
/// publishes the resulting [`DiscoveryList`] when the pass ends.
pub struct Scanner<H> {
    /// Accepted peripherals of the current pass.
    discovered: DiscoveryList<H>,
    /// Names published by the last finished pass.
    published: Vec<String>,
    /// Id of the most recent pass.
    pass: ScanId,
    /// Whether a pass is running.
    is_scanning: bool,
    /// Required name substring.
    name_filter: String,
    /// Length of each pass.
    timeout: Duration,
    /// Channel for device events.
    event_tx: broadcast::Sender<DeviceEvent>,
}

impl<H: Clone + std::fmt::Debug> Scanner<H> {
    /// Create a new scanner.
    pub fn new(config: &DeviceConfig, event_tx: broadcast::Sender<DeviceEvent>) -> Self {
        Self {
            discovered: DiscoveryList::new(),
            published: Vec::new(),
            pass: ScanId::default(),
            is_scanning: false,
            name_filter: config.name_filter.clone(),
            timeout: config.scan_timeout,
            event_tx,
        }
    }

    /// Start a discovery pass.
    ///
    /// Clears all prior discovery state first, so a pass in progress is
    /// restarted. Events still queued from earlier passes are ignored.
    pub fn start_scan<P>(&mut self, platform: &mut P) -> ScanId
    where
        P: BlePlatform<Handle = H>,
    {
        self.discovered.clear();
        self.published.clear();
        self.is_scanning = true;
        self.pass = self.pass.next();

        platform.start_discovery(self.pass, self.timeout);

        info!("Searching for BLE devices... ({})", self.pass);
        self.pass
    }

    /// Stop the current pass and treat it as finished.
    pub fn stop_scan<P>(&mut self, platform: &mut P)
    where
        P: BlePlatform<Handle = H>,
    {
        if !self.is_scanning {
            debug!("Not scanning, ignoring stop request");
            return;
        }

        info!("Stopping BLE scan");
        platform.stop_discovery();
        self.finish();
    }

    /// Handle an event from the discovery agent.
    ///
    /// Events from any pass other than the most recent one are dropped.
    pub fn handle_event(&mut self, pass: ScanId, event: ScanEvent<H>) {
        if pass != self.pass {
            trace!("Dropping event from stale scan {}: {:?}", pass, event);
            return;
        }

        match event {
            ScanEvent::DeviceDiscovered(raw) => self.add_device(raw),
            ScanEvent::Error(kind) => self.scan_error(kind),
            ScanEvent::Finished => {
                if self.is_scanning {
                    self.finish();
                } else {
                    trace!("Ignoring finish of an inactive scan");
                }
            }
        }
    }

    /// Check if a pass is running.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// Peripherals accepted so far in the current (or last) pass.
    pub fn discovered(&self) -> &DiscoveryList<H> {
        &self.discovered
    }

    /// Names published when the last pass finished.
    pub fn device_list(&self) -> &[String] {
        &self.published
    }

    /// Get the descriptor at `index` of the discovery list.
    pub fn peripheral(&self, index: usize) -> Option<&PeripheralDescriptor<H>> {
        self.discovered.get(index)
    }

    fn add_device(&mut self, raw: RawDiscovery<H>) {
        if !self.is_scanning {
            trace!("Ignoring discovery outside of a scan: {}", raw.info);
            return;
        }

        if !raw.low_energy {
            trace!("Ignoring non-LE device: {}", raw.info);
            return;
        }

        debug!(
            "Discovered Device: {} Address: {} RSSI: {} dBm",
            raw.info.name, raw.info.address, raw.info.rssi
        );

        if !matches_filter(&raw, &self.name_filter) {
            return;
        }

        let info = raw.info.clone();
        if self.discovered.push_unique(raw.into_descriptor()) {
            let _ = self.event_tx.send(DeviceEvent::PeripheralFound(info));
        }
    }

    fn scan_error(&mut self, kind: ScanErrorKind) {
        if !self.is_scanning {
            trace!("Ignoring error of an inactive scan: {}", kind);
            return;
        }
        warn!("Scan error: {}", kind);
        self.is_scanning = false;
        let _ = self.event_tx.send(DeviceEvent::ScanError(kind));
    }

    fn finish(&mut self) {
        self.is_scanning = false;

        let names = self.discovered.names();
        debug!("Scan finished with {} device(s)", names.len());

        if names != self.published {
            self.published = names.clone();
            let _ = self.event_tx.send(DeviceEvent::DeviceListChanged(names));
        }
        let _ = self.event_tx.send(DeviceEvent::ScanFinished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::platform::{ConnectionId, MockGattController};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[derive(Default)]
    struct DiscoveryRecorder {
        starts: Vec<(ScanId, Duration)>,
        stops: usize,
    }

    impl BlePlatform for DiscoveryRecorder {
        type Handle = u32;
        type Controller = MockGattController;

        fn start_discovery(&mut self, pass: ScanId, timeout: Duration) {
            self.starts.push((pass, timeout));
        }

        fn stop_discovery(&mut self) {
            self.stops += 1;
        }

        fn create_controller(
            &mut self,
            _peripheral: &PeripheralDescriptor<u32>,
            _connection: ConnectionId,
        ) -> MockGattController {
            MockGattController::new()
        }
    }

    fn raw(name: &str, rssi: i16, low_energy: bool) -> RawDiscovery<u32> {
        RawDiscovery {
            info: PeripheralInfo {
                address: format!("00:00:00:00:00:{:02X}", rssi.unsigned_abs() % 256),
                name: name.to_string(),
                rssi,
            },
            low_energy,
            handle: rssi.unsigned_abs() as u32,
        }
    }

    fn scanner() -> (Scanner<u32>, broadcast::Receiver<DeviceEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (Scanner::new(&DeviceConfig::default(), tx), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_filter_and_dedup() {
        let (mut scanner, mut rx) = scanner();
        let mut platform = DiscoveryRecorder::default();

        let pass = scanner.start_scan(&mut platform);
        assert_eq!(platform.starts, vec![(ScanId(1), Duration::from_secs(5))]);

        scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw("AIRS-1", -60, true)));
        scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw("OTHER-2", -70, true)));
        scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw("AIRS-1", -55, true)));
        scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw("AIRS-3", -80, false)));
        scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw("airs-4", -65, true)));
        scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw("MY-AIRS", -50, true)));

        assert_eq!(scanner.discovered().names(), vec!["AIRS-1", "MY-AIRS"]);
        // The first sighting wins.
        assert_eq!(scanner.peripheral(0).unwrap().rssi(), -60);

        scanner.handle_event(pass, ScanEvent::Finished);
        assert!(!scanner.is_scanning());
        assert_eq!(scanner.device_list(), ["AIRS-1", "MY-AIRS"]);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], DeviceEvent::PeripheralFound(info) if info.name == "AIRS-1"));
        assert!(matches!(&events[1], DeviceEvent::PeripheralFound(info) if info.name == "MY-AIRS"));
        assert_eq!(
            events[2],
            DeviceEvent::DeviceListChanged(vec!["AIRS-1".to_string(), "MY-AIRS".to_string()])
        );
        assert_eq!(events[3], DeviceEvent::ScanFinished);
    }

    #[test]
    fn test_finish_signalled_once() {
        let (mut scanner, mut rx) = scanner();
        let mut platform = DiscoveryRecorder::default();

        let pass = scanner.start_scan(&mut platform);
        scanner.handle_event(pass, ScanEvent::Finished);
        scanner.handle_event(pass, ScanEvent::Finished);

        let finished = drain(&mut rx)
            .into_iter()
            .filter(|e| *e == DeviceEvent::ScanFinished)
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn test_restart_clears_previous_state() {
        let (mut scanner, mut rx) = scanner();
        let mut platform = DiscoveryRecorder::default();

        let pass = scanner.start_scan(&mut platform);
        scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw("AIRS-1", -60, true)));
        scanner.handle_event(pass, ScanEvent::Finished);
        assert_eq!(scanner.device_list().len(), 1);

        // Restart while a pass is nominally in progress.
        let pass = scanner.start_scan(&mut platform);
        scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw("AIRS-2", -61, true)));
        let pass = scanner.start_scan(&mut platform);
        assert!(scanner.discovered().is_empty());
        assert!(scanner.device_list().is_empty());
        assert_eq!(platform.starts.len(), 3);

        scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw("AIRS-1", -62, true)));
        scanner.handle_event(pass, ScanEvent::Finished);
        assert_eq!(scanner.device_list(), ["AIRS-1"]);

        let lists: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                DeviceEvent::DeviceListChanged(names) => Some(names),
                _ => None,
            })
            .collect();
        assert_eq!(lists, vec![vec!["AIRS-1".to_string()], vec!["AIRS-1".to_string()]]);
    }

    #[test]
    fn test_scan_error_is_reported() {
        let (mut scanner, mut rx) = scanner();
        let mut platform = DiscoveryRecorder::default();

        let pass = scanner.start_scan(&mut platform);
        scanner.handle_event(pass, ScanEvent::Error(ScanErrorKind::PoweredOff));
        assert!(!scanner.is_scanning());
        assert_eq!(
            drain(&mut rx),
            vec![DeviceEvent::ScanError(ScanErrorKind::PoweredOff)]
        );

        // A retry is a fresh scan.
        scanner.start_scan(&mut platform);
        assert!(scanner.is_scanning());
    }

    #[test]
    fn test_stop_scan_finishes() {
        let (mut scanner, mut rx) = scanner();
        let mut platform = DiscoveryRecorder::default();

        scanner.stop_scan(&mut platform);
        assert_eq!(platform.stops, 0);

        let pass = scanner.start_scan(&mut platform);
        scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw("AIRS-9", -40, true)));
        scanner.stop_scan(&mut platform);
        assert_eq!(platform.stops, 1);
        assert_eq!(scanner.device_list(), ["AIRS-9"]);
        assert_eq!(drain(&mut rx).last(), Some(&DeviceEvent::ScanFinished));

        // A late finish from the platform is not signalled again.
        scanner.handle_event(pass, ScanEvent::Finished);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_restarted_scan_ignores_previous_pass() {
        let (mut scanner, mut rx) = scanner();
        let mut platform = DiscoveryRecorder::default();

        let first = scanner.start_scan(&mut platform);
        let second = scanner.start_scan(&mut platform);
        assert_ne!(first, second);

        // Still queued from the first pass when the second began.
        scanner.handle_event(first, ScanEvent::DeviceDiscovered(raw("AIRS-1", -60, true)));
        scanner.handle_event(first, ScanEvent::Finished);
        scanner.handle_event(first, ScanEvent::Error(ScanErrorKind::Unknown));
        assert!(scanner.is_scanning());
        assert!(scanner.discovered().is_empty());

        scanner.handle_event(second, ScanEvent::DeviceDiscovered(raw("AIRS-2", -61, true)));
        scanner.handle_event(second, ScanEvent::Finished);
        assert_eq!(scanner.device_list(), ["AIRS-2"]);

        let events = drain(&mut rx);
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == DeviceEvent::ScanFinished)
                .count(),
            1
        );
        assert!(events.contains(&DeviceEvent::DeviceListChanged(vec!["AIRS-2".to_string()])));
        assert!(!events
            .iter()
            .any(|e| matches!(e, DeviceEvent::ScanError(_))));
    }

    #[test]
    fn test_discovery_outside_scan_ignored() {
        let (mut scanner, _rx) = scanner();
        scanner.handle_event(ScanId::default(), ScanEvent::DeviceDiscovered(raw("AIRS-1", -60, true)));
        assert!(scanner.discovered().is_empty());
    }

    proptest! {
        #[test]
        fn prop_list_is_filtered_and_unique(
            reports in proptest::collection::vec(
                ("(AIRS|OTHER|air)-[0-3]", any::<bool>()),
                0..40,
            )
        ) {
            let (mut scanner, _rx) = scanner();
            let mut platform = DiscoveryRecorder::default();
            let pass = scanner.start_scan(&mut platform);

            for (name, low_energy) in &reports {
                scanner.handle_event(pass, ScanEvent::DeviceDiscovered(raw(name, -50, *low_energy)));
            }

            let names = scanner.discovered().names();
            let mut expected: Vec<String> = Vec::new();
            for (name, low_energy) in &reports {
                if *low_energy && name.contains("AIRS") && !expected.contains(name) {
                    expected.push(name.clone());
                }
            }
            prop_assert_eq!(names, expected);
        }
    }
}
