//! Home Assistant REST access.
//!
//! [`Hub`] covers the handful of endpoints in use. The functions here build
//! the area lookups on top of it, falling back to template rendering when an
//! instance does not expose the area registry.

mod client;
mod error;
mod failover;
mod types;

use std::collections::HashMap;
use std::time::Duration;

pub use client::Hub;
pub use client::HubClient;
#[cfg(test)]
pub use client::MockHub;
pub use client::REQUEST_TIMEOUT;
pub use error::HubError;
pub use failover::HubLink;
pub use failover::HubPool;
pub use types::domain_of;
pub use types::ApiStatus;
pub use types::Area;
pub use types::Device;

/// Attempts made by [`state_with_retry`].
pub const STATE_ATTEMPTS: u32 = 3;

/// Base delay of [`state_with_retry`]; attempt `n` waits `n` times this.
pub const STATE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Parse the rendered form of a template list such as `['light.a', 'light.b']`.
pub fn parse_entity_list(rendered: &str) -> Result<Vec<String>, HubError> {
    let trimmed = rendered.trim().trim_matches('"').trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| HubError::Template(rendered.to_string()))?;

    Ok(inner
        .split(',')
        .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect())
}

/// Every area known to the hub, sorted by ID.
pub async fn list_areas(hub: &dyn Hub) -> Result<Vec<Area>, HubError> {
    let mut areas = match hub.area_registry().await? {
        Some(areas) => areas,
        None => {
            let ids = parse_entity_list(&hub.render_template("{{ areas() }}").await?)?;
            let mut areas = Vec::with_capacity(ids.len());
            for id in ids {
                let name = template_area_name(hub, &id).await.unwrap_or_else(|e| {
                    tracing::debug!("Failed to resolve name of area {}: {}", id, e);
                    id.clone()
                });
                areas.push(Area::new(id, name));
            }
            areas
        }
    };

    areas.sort_by(|a, b| a.area_id.cmp(&b.area_id));
    Ok(areas)
}

/// Display name of an area, falling back to its ID when the hub does not
/// know it.
pub async fn area_name(hub: &dyn Hub, area_id: &str) -> Result<String, HubError> {
    match hub.area_registry().await? {
        Some(areas) => Ok(areas
            .into_iter()
            .find(|a| a.area_id == area_id)
            .map(|a| a.name)
            .unwrap_or_else(|| area_id.to_string())),
        None => template_area_name(hub, area_id).await,
    }
}

async fn template_area_name(hub: &dyn Hub, area_id: &str) -> Result<String, HubError> {
    let rendered = hub
        .render_template(&format!("{{{{ area_name('{}') }}}}", area_id))
        .await?;

    let name = rendered.trim();
    if name.is_empty() || name == "None" {
        Ok(area_id.to_string())
    } else {
        Ok(name.to_string())
    }
}

/// IDs of every device assigned to an area, directly or through its device.
pub async fn area_entity_ids(hub: &dyn Hub, area_id: &str) -> Result<Vec<String>, HubError> {
    let rendered = hub
        .render_template(&format!("{{{{ area_entities('{}') }}}}", area_id))
        .await?;
    parse_entity_list(&rendered)
}

/// Devices of an area restricted to `domains`, in the order the hub lists
/// them for the area. Devices without a state are skipped.
pub async fn devices_in_area(
    hub: &dyn Hub,
    area_id: &str,
    domains: &[String],
) -> Result<Vec<Device>, HubError> {
    let ids: Vec<String> = area_entity_ids(hub, area_id)
        .await?
        .into_iter()
        .filter(|id| domains.iter().any(|d| d == domain_of(id)))
        .collect();

    tracing::debug!(
        "[{}] Area {} has {} device(s) in {:?}",
        hub.url(),
        area_id,
        ids.len(),
        domains
    );

    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut states: HashMap<String, Device> = hub
        .states()
        .await?
        .into_iter()
        .map(|d| (d.entity_id.clone(), d))
        .collect();

    Ok(ids.iter().filter_map(|id| states.remove(id)).collect())
}

/// Every device in one of `domains`.
pub async fn devices_in_domains(
    hub: &dyn Hub,
    domains: &[String],
) -> Result<Vec<Device>, HubError> {
    Ok(hub
        .states()
        .await?
        .into_iter()
        .filter(|d| domains.iter().any(|domain| domain == d.domain()))
        .collect())
}

/// Read a device state, retrying transient failures with a linear backoff.
pub async fn state_with_retry(
    hub: &dyn Hub,
    entity_id: &str,
    attempts: u32,
    delay: Duration,
) -> Result<Device, HubError> {
    let mut attempt = 1;
    loop {
        match hub.state(entity_id).await {
            Ok(device) => return Ok(device),
            Err(e @ HubError::NotFound(_)) => return Err(e),
            Err(e) if attempt >= attempts => {
                tracing::error!(
                    "[{}] Reading {} failed after {} attempts: {}",
                    hub.url(),
                    entity_id,
                    attempts,
                    e
                );
                return Err(e);
            }
            Err(e) => {
                tracing::debug!(
                    "[{}] Reading {} failed (attempt {}): {}",
                    hub.url(),
                    entity_id,
                    attempt,
                    e
                );
                tokio::time::sleep(delay * attempt).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;

    fn kitchen_hub() -> MockHub {
        MockHub::new("http://mock")
            .with_devices(vec![
                Device::new("light.kitchen_main", "on").with_name("Kitchen"),
                Device::new("light.kitchen_led", "off").with_name("Kitchen LED"),
                Device::new("switch.kitchen_fan", "off"),
                Device::new("light.bedroom", "off"),
            ])
            .with_area(
                Area::new("kitchen", "Cucina"),
                &[
                    "light.kitchen_led",
                    "switch.kitchen_fan",
                    "light.kitchen_main",
                    "light.ghost",
                ],
            )
            .with_area(Area::new("bedroom", "Camera"), &["light.bedroom"])
    }

    #[test]
    fn test_parse_entity_list() {
        assert_eq!(
            parse_entity_list("['light.a', 'switch.b']").unwrap(),
            vec!["light.a", "switch.b"]
        );
        assert_eq!(
            parse_entity_list("[\"light.a\"]\n").unwrap(),
            vec!["light.a"]
        );
        assert!(parse_entity_list("[]").unwrap().is_empty());
        assert!(matches!(
            parse_entity_list("unknown"),
            Err(HubError::Template(_))
        ));
    }

    #[tokio::test]
    async fn test_devices_in_area_filters_domains_and_keeps_order() {
        let hub = kitchen_hub();
        let devices = devices_in_area(&hub, "kitchen", &["light".to_string()])
            .await
            .unwrap();

        let ids: Vec<&str> = devices.iter().map(|d| d.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["light.kitchen_led", "light.kitchen_main"]);
    }

    #[tokio::test]
    async fn test_devices_in_unknown_area() {
        let hub = kitchen_hub();
        let devices = devices_in_area(&hub, "garage", &["light".to_string()])
            .await
            .unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn test_list_areas_from_registry() {
        let areas = list_areas(&kitchen_hub()).await.unwrap();
        assert_eq!(
            areas,
            vec![Area::new("bedroom", "Camera"), Area::new("kitchen", "Cucina")]
        );
    }

    #[tokio::test]
    async fn test_list_areas_template_fallback() {
        let hub = kitchen_hub().without_registry();
        let areas = list_areas(&hub).await.unwrap();
        assert_eq!(
            areas,
            vec![Area::new("bedroom", "Camera"), Area::new("kitchen", "Cucina")]
        );
    }

    #[tokio::test]
    async fn test_area_name() {
        let hub = kitchen_hub();
        assert_eq!(area_name(&hub, "kitchen").await.unwrap(), "Cucina");
        assert_eq!(area_name(&hub, "garage").await.unwrap(), "garage");

        let hub = kitchen_hub().without_registry();
        assert_eq!(area_name(&hub, "bedroom").await.unwrap(), "Camera");
        assert_eq!(area_name(&hub, "garage").await.unwrap(), "garage");
    }

    #[tokio::test]
    async fn test_state_retry_recovers() {
        let hub = kitchen_hub();
        hub.state_failures.store(2, Ordering::SeqCst);

        let device = state_with_retry(&hub, "light.bedroom", STATE_ATTEMPTS, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(device.state, "off");
        assert_eq!(hub.state_requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_state_retry_gives_up() {
        let hub = kitchen_hub();
        hub.state_failures.store(5, Ordering::SeqCst);

        let result =
            state_with_retry(&hub, "light.bedroom", STATE_ATTEMPTS, Duration::ZERO).await;

        assert!(matches!(result, Err(HubError::Status { status: 502, .. })));
        assert_eq!(hub.state_requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_state_retry_does_not_retry_missing_entity() {
        let hub = kitchen_hub();
        let result = state_with_retry(&hub, "light.ghost", STATE_ATTEMPTS, Duration::ZERO).await;

        assert!(matches!(result, Err(HubError::NotFound(_))));
        assert_eq!(hub.state_requests.load(Ordering::SeqCst), 1);
    }
}
