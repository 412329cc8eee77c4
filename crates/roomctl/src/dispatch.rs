//! Resolution of parsed commands against the room's devices and hub service
//! dispatch.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::command::Action;
use crate::command::Group;
use crate::command::ParsedCommand;
use crate::command::Target;
use crate::hub;
use crate::hub::Device;
use crate::hub::Hub;
use crate::hub::HubError;
use crate::room_cache::RoomCacheEntry;

/// Delay between a manual toggle and reading the new state back.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// No room is cached, so there is nothing to scope the command to.
    NoRoom,

    NoDevicesInRoom { room: String },

    NoGroupMembers { group: Group, room: String },

    EntityNotFound { name: String, room: String },

    Executed { succeeded: usize, attempted: usize },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Executed { succeeded, .. } if *succeeded > 0)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::NoRoom => write!(f, "No room detected, run a BLE scan first"),
            Outcome::NoDevicesInRoom { room } => {
                write!(f, "Room {} detected, but it has no devices", room)
            }
            Outcome::NoGroupMembers { group, room } => {
                write!(f, "No {} found in room {}", group, room)
            }
            Outcome::EntityNotFound { name, room } => {
                write!(f, "Device '{}' not found in room {}", name, room)
            }
            Outcome::Executed {
                succeeded,
                attempted,
            } => write!(f, "{}/{} device(s) controlled", succeeded, attempted),
        }
    }
}

/// Hub service for `action` on `entity_id`, as `(domain, service)`.
pub fn service_for(action: Action, entity_id: &str) -> (&str, &'static str) {
    match action {
        Action::TurnOn => (hub::domain_of(entity_id), "turn_on"),
        Action::TurnOff => (hub::domain_of(entity_id), "turn_off"),
        Action::Open => ("cover", "open_cover"),
        Action::Close => ("cover", "close_cover"),
    }
}

fn mentions_led(device: &Device) -> bool {
    device.entity_id.to_lowercase().contains("led") || device.name().to_lowercase().contains("led")
}

/// Lights of `devices` that belong to `group`.
pub fn select_group(devices: &[Device], group: Group) -> Vec<&Device> {
    devices
        .iter()
        .filter(|d| d.domain() == "light")
        .filter(|d| match group {
            Group::AllLights => !mentions_led(d),
            Group::LedLights => mentions_led(d),
        })
        .collect()
}

/// Exact display name match first, then a substring of the display name or
/// the device ID.
pub fn find_device<'a>(devices: &'a [Device], name: &str) -> Option<&'a Device> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }

    devices
        .iter()
        .find(|d| d.name().to_lowercase() == name)
        .or_else(|| {
            devices.iter().find(|d| {
                d.name().to_lowercase().contains(&name) || d.entity_id.to_lowercase().contains(&name)
            })
        })
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Domains searched when the room has no matching device.
    entity_domains: Vec<String>,
}

impl Dispatcher {
    pub fn new(entity_domains: Vec<String>) -> Self {
        Self { entity_domains }
    }

    pub async fn execute(
        &self,
        hub: &dyn Hub,
        room: Option<&RoomCacheEntry>,
        command: &ParsedCommand,
    ) -> Outcome {
        let Some(room) = room else {
            tracing::warn!("Dropping {:?}: no room detected", command);
            return Outcome::NoRoom;
        };

        match &command.target {
            Target::Group(group) => self.execute_group(hub, room, command.action, *group).await,
            Target::Entity(name) => self.execute_entity(hub, room, command.action, name).await,
        }
    }

    async fn execute_group(
        &self,
        hub: &dyn Hub,
        room: &RoomCacheEntry,
        action: Action,
        group: Group,
    ) -> Outcome {
        if room.devices.is_empty() {
            return Outcome::NoDevicesInRoom {
                room: room.room_name.clone(),
            };
        }

        let members = select_group(&room.devices, group);
        if members.is_empty() {
            return Outcome::NoGroupMembers {
                group,
                room: room.room_name.clone(),
            };
        }

        tracing::info!(
            "Running {} on {} ({} device(s)) in {}",
            action,
            group,
            members.len(),
            room.room_name
        );

        let mut succeeded = 0;
        for device in &members {
            if call(hub, action, &device.entity_id).await {
                succeeded += 1;
            }
        }

        Outcome::Executed {
            succeeded,
            attempted: members.len(),
        }
    }

    async fn execute_entity(
        &self,
        hub: &dyn Hub,
        room: &RoomCacheEntry,
        action: Action,
        name: &str,
    ) -> Outcome {
        let entity_id = match find_device(&room.devices, name) {
            Some(device) => Some(device.entity_id.clone()),
            None => match hub::devices_in_domains(hub, &self.entity_domains).await {
                Ok(all) => find_device(&all, name).map(|d| d.entity_id.clone()),
                Err(e) => {
                    tracing::warn!("Failed to load device list from {}: {}", hub.url(), e);
                    None
                }
            },
        };

        let Some(entity_id) = entity_id else {
            return Outcome::EntityNotFound {
                name: name.to_string(),
                room: room.room_name.clone(),
            };
        };

        tracing::info!("Running {} on {} in {}", action, entity_id, room.room_name);
        let succeeded = usize::from(call(hub, action, &entity_id).await);
        Outcome::Executed {
            succeeded,
            attempted: 1,
        }
    }
}

async fn call(hub: &dyn Hub, action: Action, entity_id: &str) -> bool {
    let (domain, service) = service_for(action, entity_id);
    match hub
        .call_service(domain, service, json!({ "entity_id": entity_id }))
        .await
    {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("{}.{} on {} failed: {}", domain, service, entity_id, e);
            false
        }
    }
}

/// Target position for a cover toggle: whichever end is farther away.
pub fn cover_toggle_position(current: i64) -> i64 {
    const MIN: i64 = 0;
    const MAX: i64 = 100;

    if (current - MIN).abs() < (current - MAX).abs() {
        MAX
    } else {
        MIN
    }
}

/// Toggle a device and read its state back after `settle`.
///
/// Covers are driven to the end farther from their current position; every
/// other domain uses its `toggle` service.
pub async fn toggle_device(
    hub: &dyn Hub,
    entity_id: &str,
    settle: Duration,
) -> Result<Device, HubError> {
    let domain = hub::domain_of(entity_id);

    if domain == "cover" {
        let device =
            hub::state_with_retry(hub, entity_id, hub::STATE_ATTEMPTS, hub::STATE_RETRY_DELAY)
                .await?;
        let position = cover_toggle_position(device.current_position().unwrap_or(0));
        tracing::info!("Setting cover {} to position {}", entity_id, position);
        hub.call_service(
            "cover",
            "set_cover_position",
            json!({ "entity_id": entity_id, "position": position }),
        )
        .await?;
    } else {
        tracing::info!("Toggling {}", entity_id);
        hub.call_service(domain, "toggle", json!({ "entity_id": entity_id }))
            .await?;
    }

    tokio::time::sleep(settle).await;
    hub::state_with_retry(hub, entity_id, hub::STATE_ATTEMPTS, hub::STATE_RETRY_DELAY).await
}
