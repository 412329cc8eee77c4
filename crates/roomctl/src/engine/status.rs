use std::fmt;

use serde::Serialize;
use serde::Serializer;

use crate::voice::VoiceOutcome;

/// The one-line status shown by the presenters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Scanning,
    NoBeacon,
    NoMapping,
    NoHub,
    Loading { area: String },
    Ready { area: String },
    NoEntities { area: String },
    HubFailed(String),
    Listening,
    Voice(VoiceOutcome),
    Toggled { name: String, state: String },
    ToggleFailed { entity_id: String, error: String },
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "Idle"),
            Status::Scanning => write!(f, "Scanning for BLE devices..."),
            Status::NoBeacon => write!(f, "No BLE device detected"),
            Status::NoMapping => write!(f, "Error: No BLE mapping found"),
            Status::NoHub => write!(f, "Error: No Home Assistant instance available"),
            Status::Loading { area } => write!(f, "Area: {} - Loading entities...", area),
            Status::Ready { area } => write!(f, "Area: {} - Ready", area),
            Status::NoEntities { area } => write!(f, "No entities found for area: {}", area),
            Status::HubFailed(e) => write!(f, "Error: {}", e),
            Status::Listening => write!(f, "Listening..."),
            Status::Voice(outcome) => write!(f, "{}", outcome),
            Status::Toggled { name, state } => write!(f, "{}: {}", name, state),
            Status::ToggleFailed { entity_id, error } => {
                write!(f, "Error: failed to toggle {}: {}", entity_id, error)
            }
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_texts() {
        let area = || "Cucina".to_string();
        assert_eq!(Status::Scanning.to_string(), "Scanning for BLE devices...");
        assert_eq!(
            Status::Loading { area: area() }.to_string(),
            "Area: Cucina - Loading entities..."
        );
        assert_eq!(Status::Ready { area: area() }.to_string(), "Area: Cucina - Ready");
        assert_eq!(
            Status::NoEntities { area: area() }.to_string(),
            "No entities found for area: Cucina"
        );
        assert_eq!(Status::NoBeacon.to_string(), "No BLE device detected");
        assert_eq!(Status::NoMapping.to_string(), "Error: No BLE mapping found");
        assert_eq!(
            Status::NoHub.to_string(),
            "Error: No Home Assistant instance available"
        );
    }

    #[test]
    fn test_serializes_as_text() {
        let json = serde_json::to_value(Status::Ready {
            area: "Office".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!("Area: Office - Ready"));
    }
}
