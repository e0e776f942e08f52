//! Per-serial-number device registry with timeout expiry

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::types::Beacon;

/// Availability change reported by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum AvailabilityChange {
    /// First beacon seen for a serial number
    BeginAvailability(Beacon),
    /// A known device is now announcing from a different address
    AddressChanged(Beacon),
    /// A device has been silent longer than the availability timeout
    EndAvailability(u32),
}

impl AvailabilityChange {
    pub fn serial_number(&self) -> u32 {
        match self {
            AvailabilityChange::BeginAvailability(beacon)
            | AvailabilityChange::AddressChanged(beacon) => beacon.serial_number,
            AvailabilityChange::EndAvailability(serial) => *serial,
        }
    }
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    last_heard_at: Instant,
    latest: Beacon,
}

/// Tracks which devices are currently announcing themselves.
///
/// The registry does no I/O and reads no clock; callers pass `now` to both
/// inputs. One owner drives it, so there is never more than one entry per
/// serial number.
#[derive(Debug)]
pub struct DeviceRegistry {
    timeout: Duration,
    entries: HashMap<u32, RegistryEntry>,
}

impl DeviceRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, entries: HashMap::new() }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a beacon heard at `now`.
    pub fn on_beacon(&mut self, beacon: Beacon, now: Instant) -> Option<AvailabilityChange> {
        let serial = beacon.serial_number;
        match self.entries.get_mut(&serial) {
            None => {
                info!(
                    serial,
                    source = %beacon.source,
                    system = %beacon.system_type,
                    version = %beacon.software_version,
                    "Device available"
                );
                self.entries
                    .insert(serial, RegistryEntry { last_heard_at: now, latest: beacon.clone() });
                Some(AvailabilityChange::BeginAvailability(beacon))
            }
            Some(entry) => {
                let moved = entry.latest.source.ip() != beacon.source.ip();
                if moved {
                    info!(
                        serial,
                        from = %entry.latest.source,
                        to = %beacon.source,
                        "Device address changed"
                    );
                }
                entry.last_heard_at = now;
                entry.latest = beacon;
                moved.then(|| AvailabilityChange::AddressChanged(entry.latest.clone()))
            }
        }
    }

    /// Expire every device silent for longer than the timeout.
    pub fn on_tick(&mut self, now: Instant) -> Vec<AvailabilityChange> {
        let timeout = self.timeout;
        let mut expired: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_heard_at) > timeout)
            .map(|(serial, _)| *serial)
            .collect();
        expired.sort_unstable();

        for serial in &expired {
            self.entries.remove(serial);
            info!(serial, "Device no longer available");
        }
        if !expired.is_empty() {
            debug!(remaining = self.entries.len(), "Registry expired {} devices", expired.len());
        }

        expired.into_iter().map(AvailabilityChange::EndAvailability).collect()
    }

    /// Latest beacon for a serial number.
    pub fn get(&self, serial_number: u32) -> Option<&Beacon> {
        self.entries.get(&serial_number).map(|entry| &entry.latest)
    }

    /// Latest beacon of every known device, ordered by serial number.
    pub fn devices(&self) -> Vec<Beacon> {
        let mut devices: Vec<Beacon> =
            self.entries.values().map(|entry| entry.latest.clone()).collect();
        devices.sort_by_key(|beacon| beacon.serial_number);
        devices
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::beacon;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::net::SocketAddr;

    const TIMEOUT: Duration = Duration::from_secs(5);
    const TICK: Duration = Duration::from_secs(1);

    fn addr(last: u8) -> SocketAddr {
        ([192, 168, 1, last], 56124).into()
    }

    #[test]
    fn first_beacon_begins_availability_once() {
        let mut registry = DeviceRegistry::new(TIMEOUT);
        let start = Instant::now();

        let first = registry.on_beacon(beacon(24, addr(24)), start);
        assert!(matches!(first, Some(AvailabilityChange::BeginAvailability(ref b)) if b.serial_number == 24));

        for i in 1..10 {
            let change = registry.on_beacon(beacon(24, addr(24)), start + TICK * i);
            assert_eq!(change, None);
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn address_change_is_reported_without_second_begin() {
        let mut registry = DeviceRegistry::new(TIMEOUT);
        let start = Instant::now();
        registry.on_beacon(beacon(24, addr(24)), start);

        let change = registry.on_beacon(beacon(24, addr(99)), start + TICK);
        match change {
            Some(AvailabilityChange::AddressChanged(b)) => assert_eq!(b.source, addr(99)),
            other => panic!("expected address change, got {:?}", other),
        }
        assert_eq!(registry.get(24).map(|b| b.source), Some(addr(99)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn silent_device_expires_within_timeout_plus_one_tick() {
        let mut registry = DeviceRegistry::new(TIMEOUT);
        let start = Instant::now();
        registry.on_beacon(beacon(24, addr(24)), start);

        let mut ended_at = None;
        for i in 1..=10 {
            let now = start + TICK * i;
            let changes = registry.on_tick(now);
            if changes.contains(&AvailabilityChange::EndAvailability(24)) {
                ended_at = Some(now);
                break;
            }
        }

        let ended_at = ended_at.expect("device should expire");
        assert!(ended_at - start > TIMEOUT);
        assert!(ended_at - start <= TIMEOUT + TICK);
        assert!(registry.is_empty());
    }

    #[test]
    fn beacons_keep_device_alive() {
        let mut registry = DeviceRegistry::new(TIMEOUT);
        let start = Instant::now();
        for i in 0..20 {
            let now = start + TICK * i;
            registry.on_beacon(beacon(7, addr(7)), now);
            assert!(registry.on_tick(now).is_empty());
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn age_equal_to_timeout_is_not_expired() {
        let mut registry = DeviceRegistry::new(TIMEOUT);
        let start = Instant::now();
        registry.on_beacon(beacon(3, addr(3)), start);
        assert!(registry.on_tick(start + TIMEOUT).is_empty());
        assert_eq!(registry.on_tick(start + TIMEOUT + TICK), vec![AvailabilityChange::EndAvailability(3)]);
    }

    #[test]
    fn device_returning_after_expiry_begins_again() {
        let mut registry = DeviceRegistry::new(TIMEOUT);
        let start = Instant::now();
        registry.on_beacon(beacon(24, addr(24)), start);
        registry.on_tick(start + TIMEOUT * 2);

        let change = registry.on_beacon(beacon(24, addr(24)), start + TIMEOUT * 3);
        assert!(matches!(change, Some(AvailabilityChange::BeginAvailability(_))));
    }

    #[test]
    fn devices_are_sorted_by_serial() {
        let mut registry = DeviceRegistry::new(TIMEOUT);
        let now = Instant::now();
        for serial in [30, 10, 20] {
            registry.on_beacon(beacon(serial, addr(serial as u8)), now);
        }
        let serials: Vec<u32> = registry.devices().iter().map(|b| b.serial_number).collect();
        assert_eq!(serials, vec![10, 20, 30]);
    }

    proptest! {
        #[test]
        fn one_begin_and_one_end_per_serial(
            serials in prop::collection::vec(0u32..50, 1..200),
        ) {
            let mut registry = DeviceRegistry::new(TIMEOUT);
            let start = Instant::now();
            let mut begins = Vec::new();

            for (i, serial) in serials.iter().enumerate() {
                let now = start + Duration::from_millis(i as u64 * 10);
                if let Some(AvailabilityChange::BeginAvailability(b)) =
                    registry.on_beacon(beacon(*serial, addr(1)), now)
                {
                    begins.push(b.serial_number);
                }
            }

            let distinct: HashSet<u32> = serials.iter().copied().collect();
            let begun: HashSet<u32> = begins.iter().copied().collect();
            prop_assert_eq!(begins.len(), distinct.len());
            prop_assert_eq!(&begun, &distinct);

            let last = start + Duration::from_millis(serials.len() as u64 * 10);
            let ends = registry.on_tick(last + TIMEOUT + TICK);
            prop_assert_eq!(ends.len(), distinct.len());
            let ended: HashSet<u32> = ends.iter().map(|c| c.serial_number()).collect();
            prop_assert_eq!(&ended, &distinct);
            prop_assert!(registry.on_tick(last + TIMEOUT * 4).is_empty());
        }
    }
}
