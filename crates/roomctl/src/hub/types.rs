use serde::Deserialize;
use serde::Serialize;

/// Domain part of a device ID (`light` in `light.kitchen`).
pub fn domain_of(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map(|(domain, _)| domain)
        .unwrap_or(entity_id)
}

/// State object of a single device as reported by `/api/states`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub entity_id: String,
    pub state: String,

    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub last_changed: Option<String>,
}

impl Device {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: serde_json::Map::new(),
            last_changed: None,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_name(self, name: &str) -> Self {
        self.with_attribute("friendly_name", name)
    }

    pub fn domain(&self) -> &str {
        domain_of(&self.entity_id)
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes
            .get("friendly_name")
            .and_then(|v| v.as_str())
    }

    /// Display name: `friendly_name`, else the object ID in title case.
    pub fn name(&self) -> String {
        match self.friendly_name() {
            Some(name) => name.to_string(),
            None => title_case(
                self.entity_id
                    .split_once('.')
                    .map(|(_, object)| object)
                    .unwrap_or(&self.entity_id),
            ),
        }
    }

    /// Cover position in percent, when the device reports one.
    pub fn current_position(&self) -> Option<i64> {
        self.attributes
            .get("current_position")
            .and_then(|v| v.as_i64())
    }

    pub fn is_on(&self) -> bool {
        matches!(self.state.as_str(), "on" | "open")
    }

    pub fn is_available(&self) -> bool {
        self.state != "unavailable"
    }
}

fn title_case(object_id: &str) -> String {
    object_id
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Entry of the area registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub area_id: String,
    pub name: String,
}

impl Area {
    pub fn new(area_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            area_id: area_id.into(),
            name: name.into(),
        }
    }
}

/// Body of `GET /api/`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiStatus {
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_from_state_json() {
        let device: Device = serde_json::from_value(serde_json::json!({
            "entity_id": "cover.living_room_shutter",
            "state": "open",
            "attributes": {"friendly_name": "Tapparella", "current_position": 70},
            "last_changed": "2024-05-01T10:00:00+00:00",
            "context": {"id": "abc"}
        }))
        .unwrap();

        assert_eq!(device.domain(), "cover");
        assert_eq!(device.name(), "Tapparella");
        assert_eq!(device.current_position(), Some(70));
        assert!(device.is_on());
    }

    #[test]
    fn test_name_falls_back_to_object_id() {
        let device = Device::new("light.kitchen_main", "off");
        assert_eq!(device.name(), "Kitchen Main");
        assert!(!device.is_on());
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("switch.fan"), "switch");
        assert_eq!(domain_of("nodot"), "nodot");
    }
}
