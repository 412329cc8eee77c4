//! Messages into the engine, split by origin:
//! - `Trigger`: requests from presenters and the control API
//! - `WorkerMessage`: results reported by spawned workers

use std::sync::Arc;

use super::Status;
use crate::hub::Device;
use crate::hub::Hub;
use crate::room_cache::RoomCacheEntry;
use crate::voice::VoiceOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Forget the cached room and scan again.
    Scan,

    /// Present the room, scanning only when nothing is loaded.
    Show,

    Hide,

    /// User input while presented.
    Interact,

    Toggle(String),

    Voice,

    Quit,
}

pub enum WorkerMessage {
    Status(Status),

    /// A room was resolved and its devices loaded from `hub`.
    RoomReady {
        entry: Arc<RoomCacheEntry>,
        hub: Arc<dyn Hub>,
    },

    /// Fresh states of the presented devices.
    DevicesPolled(Vec<Device>),

    Toggled {
        entity_id: String,
        result: Result<Device, String>,
    },

    Voice(VoiceOutcome),
}

impl std::fmt::Debug for WorkerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerMessage::Status(status) => f.debug_tuple("Status").field(status).finish(),
            WorkerMessage::RoomReady { entry, hub } => f
                .debug_struct("RoomReady")
                .field("room", &entry.room_id)
                .field("devices", &entry.devices.len())
                .field("hub", &hub.url())
                .finish(),
            WorkerMessage::DevicesPolled(devices) => f
                .debug_tuple("DevicesPolled")
                .field(&devices.len())
                .finish(),
            WorkerMessage::Toggled { entity_id, result } => f
                .debug_struct("Toggled")
                .field("entity_id", entity_id)
                .field("ok", &result.is_ok())
                .finish(),
            WorkerMessage::Voice(outcome) => f.debug_tuple("Voice").field(outcome).finish(),
        }
    }
}
