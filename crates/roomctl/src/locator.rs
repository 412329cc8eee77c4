//! Scan, resolve the nearest room, and load its devices.

use std::sync::Arc;
use std::time::Duration;

use crate::beacon;
use crate::beacon::BeaconMapping;
use crate::beacon::BeaconScanner;
use crate::beacon::RoomId;
use crate::beacon::ScanError;
use crate::hub;
use crate::hub::Hub;
use crate::hub::HubError;
use crate::room_cache::RoomCacheEntry;

#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("BLE scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Failed to load room devices: {0}")]
    Hub(#[from] HubError),
}

#[derive(Clone)]
pub struct RoomLocator {
    scanner: Arc<dyn BeaconScanner>,
    mapping: Arc<BeaconMapping>,
    min_rssi: Option<i16>,
}

impl RoomLocator {
    pub fn new(
        scanner: Arc<dyn BeaconScanner>,
        mapping: Arc<BeaconMapping>,
        min_rssi: Option<i16>,
    ) -> Self {
        Self {
            scanner,
            mapping,
            min_rssi,
        }
    }

    pub fn scanner(&self) -> &Arc<dyn BeaconScanner> {
        &self.scanner
    }

    pub fn has_mapping(&self) -> bool {
        !self.mapping.is_empty()
    }

    /// Room of the strongest known beacon seen during one window.
    pub async fn detect(&self, window: Duration) -> Result<Option<RoomId>, ScanError> {
        let readings = beacon::scan_once(self.scanner.as_ref(), window).await?;
        Ok(self.resolve(&readings))
    }

    pub fn resolve(&self, readings: &[beacon::BeaconReading]) -> Option<RoomId> {
        let room = beacon::resolve_nearest(readings, &self.mapping, self.min_rssi);
        match &room {
            Some(room) => tracing::info!("Nearest room: {}", room),
            None => tracing::info!("No known beacon among {} reading(s)", readings.len()),
        }
        room
    }

    /// Area name and devices of `room`, restricted to `domains`.
    pub async fn load(
        &self,
        hub: &dyn Hub,
        room: RoomId,
        domains: &[String],
    ) -> Result<RoomCacheEntry, HubError> {
        let name = hub::area_name(hub, room.as_str()).await?;
        let devices = hub::devices_in_area(hub, room.as_str(), domains).await?;
        Ok(RoomCacheEntry::new(room, name, devices))
    }

    /// One scan window followed by the device lookup. `Ok(None)` when no
    /// known beacon was seen.
    pub async fn locate(
        &self,
        hub: &dyn Hub,
        window: Duration,
        domains: &[String],
    ) -> Result<Option<RoomCacheEntry>, LocateError> {
        let Some(room) = self.detect(window).await? else {
            return Ok(None);
        };
        Ok(Some(self.load(hub, room, domains).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::BeaconReading;
    use crate::beacon::MockScanner;
    use crate::hub::Area;
    use crate::hub::Device;
    use crate::hub::MockHub;
    use macaddr::MacAddr6;

    fn mac(last: u8) -> MacAddr6 {
        MacAddr6::new(0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last)
    }

    fn locator(scanner: Arc<MockScanner>) -> RoomLocator {
        let mapping = BeaconMapping::new([
            (mac(1), RoomId::from("kitchen")),
            (mac(2), RoomId::from("office")),
        ]);
        RoomLocator::new(scanner, Arc::new(mapping), None)
    }

    fn hub() -> MockHub {
        MockHub::new("http://mock")
            .with_devices(vec![
                Device::new("light.kitchen", "on").with_name("Kitchen"),
                Device::new("switch.kettle", "off").with_name("Kettle"),
                Device::new("sensor.temp", "21"),
            ])
            .with_area(
                Area::new("kitchen", "Cucina"),
                &["light.kitchen", "switch.kettle", "sensor.temp"],
            )
    }

    #[tokio::test]
    async fn test_locate_loads_room_devices() {
        let scanner = Arc::new(MockScanner::new());
        scanner.push_cycle(vec![
            BeaconReading::new(mac(2), -90),
            BeaconReading::new(mac(1), -55),
        ]);

        let domains = vec!["light".to_string(), "switch".to_string()];
        let entry = locator(scanner)
            .locate(&hub(), Duration::ZERO, &domains)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entry.room_id.as_str(), "kitchen");
        assert_eq!(entry.room_name, "Cucina");
        let ids: Vec<&str> = entry.devices.iter().map(|d| d.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["light.kitchen", "switch.kettle"]);
    }

    #[tokio::test]
    async fn test_locate_without_known_beacon() {
        let scanner = Arc::new(MockScanner::new());
        scanner.push_cycle(vec![BeaconReading::new(mac(9), -40)]);

        let found = locator(scanner)
            .locate(&hub(), Duration::ZERO, &["light".to_string()])
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_locate_propagates_hub_failure() {
        let scanner = Arc::new(MockScanner::new());
        scanner.push_cycle(vec![BeaconReading::new(mac(1), -40)]);
        let hub = hub();
        hub.set_reachable(false);

        let err = locator(scanner)
            .locate(&hub, Duration::ZERO, &["light".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, LocateError::Hub(_)));
    }
}
