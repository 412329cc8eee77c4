use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use macaddr::MacAddr6;
use serde::Deserialize;

use super::RoomId;

/// Beacon address to room mapping, loaded once at startup.
///
/// Addresses are stored parsed, so lookups do not depend on the case they
/// were written in.
#[derive(Debug, Clone, Default)]
pub struct BeaconMapping {
    rooms: HashMap<MacAddr6, RoomId>,
}

/// On-disk shapes of the mapping file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MappingFile {
    /// `{"ble_mapping": {"AA:BB:CC:DD:EE:FF": "kitchen"}}`
    Flat { ble_mapping: HashMap<String, String> },

    /// `{"entities": [{"mac": "AA:BB:CC:DD:EE:FF", "area": "kitchen"}]}`
    Legacy { entities: Vec<LegacyEntry> },
}

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    mac: Option<String>,
    area: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("Failed to read mapping file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse mapping file: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Invalid MAC address '{address}' in mapping file")]
    InvalidAddress { address: String },

    #[error("Mapping file {0} contains no beacons")]
    Empty(PathBuf),
}

impl BeaconMapping {
    pub fn new(entries: impl IntoIterator<Item = (MacAddr6, RoomId)>) -> Self {
        Self {
            rooms: entries.into_iter().collect(),
        }
    }

    /// Load a mapping file, accepting both the flat and the legacy shape.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MappingError::Io(path.to_path_buf(), e))?;

        let mapping = Self::from_json(&contents)?;
        if mapping.is_empty() {
            return Err(MappingError::Empty(path.to_path_buf()));
        }

        tracing::info!(
            "Loaded {} beacon(s) from {}",
            mapping.len(),
            path.display()
        );
        Ok(mapping)
    }

    pub fn from_json(contents: &str) -> Result<Self, MappingError> {
        let file: MappingFile = serde_json::from_str(contents).map_err(MappingError::Parse)?;

        let pairs: Vec<(String, String)> = match file {
            MappingFile::Flat { ble_mapping } => ble_mapping.into_iter().collect(),
            MappingFile::Legacy { entities } => entities
                .into_iter()
                .filter_map(|entry| match (entry.mac, entry.area) {
                    (Some(mac), Some(area)) if !mac.is_empty() && !area.is_empty() => {
                        Some((mac, area))
                    }
                    _ => {
                        tracing::warn!("Skipping incomplete legacy mapping entry");
                        None
                    }
                })
                .collect(),
        };

        let mut rooms = HashMap::with_capacity(pairs.len());
        for (address, room) in pairs {
            let mac: MacAddr6 = address
                .trim()
                .parse()
                .map_err(|_| MappingError::InvalidAddress {
                    address: address.clone(),
                })?;
            rooms.insert(mac, RoomId::new(room));
        }

        Ok(Self { rooms })
    }

    pub fn room_for(&self, address: &MacAddr6) -> Option<&RoomId> {
        self.rooms.get(address)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MacAddr6, &RoomId)> {
        self.rooms.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_shape() {
        let mapping = BeaconMapping::from_json(
            r#"{"ble_mapping": {"f2:ec:8f:2a:be:2d": "soggiorno", "AA:BB:CC:DD:EE:FF": "cucina"}}"#,
        )
        .unwrap();

        assert_eq!(mapping.len(), 2);
        let mac: MacAddr6 = "F2:EC:8F:2A:BE:2D".parse().unwrap();
        assert_eq!(mapping.room_for(&mac), Some(&RoomId::from("soggiorno")));
    }

    #[test]
    fn test_legacy_shape_skips_incomplete_entries() {
        let mapping = BeaconMapping::from_json(
            r#"{"entities": [
                {"mac": "aa:bb:cc:dd:ee:ff", "area": "studio"},
                {"mac": "11:22:33:44:55:66"},
                {"area": "bagno"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(mapping.len(), 1);
        let mac: MacAddr6 = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(mapping.room_for(&mac), Some(&RoomId::from("studio")));
    }

    #[test]
    fn test_invalid_address() {
        let err = BeaconMapping::from_json(r#"{"ble_mapping": {"not-a-mac": "x"}}"#).unwrap_err();
        assert!(matches!(err, MappingError::InvalidAddress { .. }));
    }

    #[test]
    fn test_unknown_shape() {
        let err = BeaconMapping::from_json(r#"{"beacons": []}"#).unwrap_err();
        assert!(matches!(err, MappingError::Parse(_)));
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ble_entity.json");
        std::fs::write(&path, r#"{"ble_mapping": {}}"#).unwrap();

        let err = BeaconMapping::from_file(&path).unwrap_err();
        assert!(matches!(err, MappingError::Empty(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = BeaconMapping::from_file("/nonexistent/ble_entity.json").unwrap_err();
        assert!(matches!(err, MappingError::Io(..)));
    }
}
