//! BLE beacon handling.
//!
//! Beacons are fixed-address BLE advertisers used as proximity markers. A
//! [`BeaconMapping`] ties each known address to a room, and
//! [`resolve_nearest`] turns one scan cycle worth of [`BeaconReading`]s into
//! the room of the strongest known beacon.

mod mapping;
mod scanner;

use std::fmt;

use macaddr::MacAddr6;
use serde::Deserialize;
use serde::Serialize;

pub use mapping::BeaconMapping;
pub use mapping::MappingError;
#[cfg(feature = "ble")]
pub use scanner::BtleplugScanner;
pub use scanner::BeaconScanner;
#[cfg(test)]
pub use scanner::MockScanner;
pub use scanner::ScanError;
pub use scanner::scan_continuous;
pub use scanner::scan_once;

/// Identifier of a room (a Home Assistant area ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A single advertisement observed during a scan cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconReading {
    pub address: MacAddr6,

    /// Received signal strength in dBm; closer to zero is stronger.
    pub rssi: i16,

    /// Advertised local name, if any.
    pub name: Option<String>,
}

impl BeaconReading {
    pub fn new(address: MacAddr6, rssi: i16) -> Self {
        Self {
            address,
            rssi,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name for log output: advertised name, falling back to the address.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

/// Find the strongest reading whose address is in `mapping`.
///
/// Readings below `min_rssi` are ignored when a floor is given. Equal RSSI
/// values keep the first reading encountered.
pub fn nearest_beacon<'r, 'm>(
    readings: &'r [BeaconReading],
    mapping: &'m BeaconMapping,
    min_rssi: Option<i16>,
) -> Option<(&'r BeaconReading, &'m RoomId)> {
    let mut best: Option<(&BeaconReading, &RoomId)> = None;

    for reading in readings {
        let Some(room) = mapping.room_for(&reading.address) else {
            continue;
        };

        if min_rssi.is_some_and(|floor| reading.rssi < floor) {
            tracing::trace!(
                "Ignoring {} below RSSI floor: {}",
                reading.address,
                reading.rssi
            );
            continue;
        }

        tracing::debug!(
            "Beacon {} ({}) -> {} RSSI {}",
            reading.label(),
            reading.address,
            room,
            reading.rssi
        );

        match best {
            Some((current, _)) if reading.rssi <= current.rssi => {}
            _ => best = Some((reading, room)),
        }
    }

    best
}

/// Resolve the room of the strongest known beacon in this scan cycle.
pub fn resolve_nearest(
    readings: &[BeaconReading],
    mapping: &BeaconMapping,
    min_rssi: Option<i16>,
) -> Option<RoomId> {
    nearest_beacon(readings, mapping, min_rssi).map(|(_, room)| room.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddr6 {
        s.parse().unwrap()
    }

    fn mapping() -> BeaconMapping {
        BeaconMapping::new([
            (mac("AA:BB:CC:DD:EE:01"), RoomId::from("kitchen")),
            (mac("AA:BB:CC:DD:EE:02"), RoomId::from("bedroom")),
            (mac("AA:BB:CC:DD:EE:03"), RoomId::from("office")),
        ])
    }

    #[test]
    fn test_strongest_known_reading_wins() {
        let readings = vec![
            BeaconReading::new(mac("AA:BB:CC:DD:EE:01"), -80),
            BeaconReading::new(mac("AA:BB:CC:DD:EE:02"), -52),
            BeaconReading::new(mac("AA:BB:CC:DD:EE:03"), -67),
        ];

        assert_eq!(
            resolve_nearest(&readings, &mapping(), None),
            Some(RoomId::from("bedroom"))
        );
    }

    #[test]
    fn test_unknown_addresses_are_ignored() {
        let readings = vec![
            BeaconReading::new(mac("11:22:33:44:55:66"), -30),
            BeaconReading::new(mac("AA:BB:CC:DD:EE:03"), -90),
        ];

        assert_eq!(
            resolve_nearest(&readings, &mapping(), None),
            Some(RoomId::from("office"))
        );
    }

    #[test]
    fn test_no_match() {
        assert_eq!(resolve_nearest(&[], &mapping(), None), None);

        let readings = vec![BeaconReading::new(mac("11:22:33:44:55:66"), -30)];
        assert_eq!(resolve_nearest(&readings, &mapping(), None), None);
    }

    #[test]
    fn test_empty_mapping_never_matches() {
        let readings = vec![BeaconReading::new(mac("AA:BB:CC:DD:EE:01"), -40)];
        assert_eq!(
            resolve_nearest(&readings, &BeaconMapping::default(), None),
            None
        );
    }

    #[test]
    fn test_tie_keeps_first_encountered() {
        let readings = vec![
            BeaconReading::new(mac("AA:BB:CC:DD:EE:03"), -60),
            BeaconReading::new(mac("AA:BB:CC:DD:EE:01"), -60),
        ];

        assert_eq!(
            resolve_nearest(&readings, &mapping(), None),
            Some(RoomId::from("office"))
        );
    }

    #[test]
    fn test_address_comparison_ignores_case() {
        let readings = vec![BeaconReading::new(mac("aa:bb:cc:dd:ee:02"), -70)];

        assert_eq!(
            resolve_nearest(&readings, &mapping(), None),
            Some(RoomId::from("bedroom"))
        );
    }

    #[test]
    fn test_rssi_floor() {
        let readings = vec![
            BeaconReading::new(mac("AA:BB:CC:DD:EE:01"), -95),
            BeaconReading::new(mac("AA:BB:CC:DD:EE:02"), -99),
        ];

        assert_eq!(resolve_nearest(&readings, &mapping(), Some(-90)), None);
        assert_eq!(
            resolve_nearest(&readings, &mapping(), Some(-96)),
            Some(RoomId::from("kitchen"))
        );
    }

    #[test]
    fn test_nearest_beacon_returns_reading() {
        let readings = vec![
            BeaconReading::new(mac("AA:BB:CC:DD:EE:01"), -70).with_name("kitchen-tag"),
            BeaconReading::new(mac("AA:BB:CC:DD:EE:02"), -75),
        ];

        let mapping = mapping();
        let (reading, room) = nearest_beacon(&readings, &mapping, None).unwrap();
        assert_eq!(reading.label(), "kitchen-tag");
        assert_eq!(room.as_str(), "kitchen");
    }
}
