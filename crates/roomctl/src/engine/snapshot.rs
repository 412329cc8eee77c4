use serde::Serialize;

use super::Status;
use crate::hub::Device;
use crate::voice::VoiceOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomView {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceView {
    pub entity_id: String,
    pub name: String,
    pub domain: String,
    pub state: String,
}

impl From<&Device> for DeviceView {
    fn from(device: &Device) -> Self {
        Self {
            entity_id: device.entity_id.clone(),
            name: device.name(),
            domain: device.domain().to_string(),
            state: device.state.clone(),
        }
    }
}

/// Everything a presenter needs, published by the engine after each change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub title: String,
    pub status: Status,
    pub visible: bool,

    /// URL of the instance in use.
    pub hub: Option<String>,
    pub room: Option<RoomView>,
    pub devices: Vec<DeviceView>,
    pub last_voice: Option<VoiceOutcome>,
}
