use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::error::HubError;
use super::types::ApiStatus;
use super::types::Area;
use super::types::Device;

/// Timeout for everything except reachability probes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Trait for Home Assistant REST operations
///
/// This trait allows for mocking the hub for testing purposes
#[async_trait]
pub trait Hub: Send + Sync {
    /// Base URL of the instance, without a trailing slash.
    fn url(&self) -> &str;

    /// `GET /api/` with the given timeout.
    async fn probe(&self, timeout: Duration) -> Result<ApiStatus, HubError>;

    /// `GET /api/states`
    async fn states(&self) -> Result<Vec<Device>, HubError>;

    /// `GET /api/states/{entity_id}`
    async fn state(&self, entity_id: &str) -> Result<Device, HubError>;

    /// `POST /api/services/{domain}/{service}`
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
    ) -> Result<(), HubError>;

    /// `POST /api/template`, returning the rendered text.
    async fn render_template(&self, template: &str) -> Result<String, HubError>;

    /// `GET /api/config/area_registry`. `Ok(None)` when the instance does
    /// not expose the registry over REST.
    async fn area_registry(&self) -> Result<Option<Vec<Area>>, HubError>;
}

/// Mock hub for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockHub {
    pub url: String,
    pub unreachable: std::sync::atomic::AtomicBool,
    pub devices: std::sync::Mutex<Vec<Device>>,

    /// `None` behaves like an instance without the REST registry.
    pub areas: Option<Vec<Area>>,
    pub area_names: std::collections::HashMap<String, String>,
    pub area_entities: std::collections::HashMap<String, Vec<String>>,

    /// Service calls that answer with HTTP 500, as `domain.service/entity_id`.
    pub failing_calls: std::collections::HashSet<String>,

    /// Number of upcoming `state` requests that fail before one succeeds.
    pub state_failures: std::sync::atomic::AtomicUsize,

    pub calls: std::sync::Mutex<Vec<(String, serde_json::Value)>>,
    pub probes: std::sync::atomic::AtomicUsize,
    pub state_requests: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockHub {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_devices(self, devices: Vec<Device>) -> Self {
        *self.devices.lock().unwrap() = devices;
        self
    }

    pub fn with_area(mut self, area: Area, entity_ids: &[&str]) -> Self {
        self.area_names
            .insert(area.area_id.clone(), area.name.clone());
        self.area_entities.insert(
            area.area_id.clone(),
            entity_ids.iter().map(|id| id.to_string()).collect(),
        );
        self.areas.get_or_insert_with(Vec::new).push(area);
        self
    }

    /// Keep the area data but answer 404 on the registry endpoint.
    pub fn without_registry(mut self) -> Self {
        self.areas = None;
        self
    }

    pub fn failing_call(mut self, service: &str, entity_id: &str) -> Self {
        self.failing_calls
            .insert(format!("{}/{}", service, entity_id));
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable
            .store(!reachable, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_state(&self, entity_id: &str, state: &str) {
        let mut devices = self.devices.lock().unwrap();
        if let Some(device) = devices.iter_mut().find(|d| d.entity_id == entity_id) {
            device.state = state.to_string();
        }
    }

    /// Recorded service calls as `(domain.service, data)`.
    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn probes(&self) -> usize {
        self.probes.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn check_reachable(&self, path: &str) -> Result<(), HubError> {
        if self.unreachable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(HubError::Status {
                path: path.to_string(),
                status: 503,
            });
        }
        Ok(())
    }

    fn quoted_arg(template: &str, function: &str) -> Option<String> {
        let start = template.find(&format!("{}('", function))? + function.len() + 2;
        let end = start + template[start..].find('\'')?;
        Some(template[start..end].to_string())
    }
}

#[cfg(test)]
#[async_trait]
impl Hub for MockHub {
    fn url(&self) -> &str {
        &self.url
    }

    async fn probe(&self, _timeout: Duration) -> Result<ApiStatus, HubError> {
        self.probes
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.check_reachable("/api/")?;
        Ok(ApiStatus {
            message: Some("API running.".to_string()),
            version: None,
        })
    }

    async fn states(&self) -> Result<Vec<Device>, HubError> {
        self.check_reachable("/api/states")?;
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn state(&self, entity_id: &str) -> Result<Device, HubError> {
        use std::sync::atomic::Ordering;

        self.state_requests.fetch_add(1, Ordering::SeqCst);
        let path = format!("/api/states/{}", entity_id);
        self.check_reachable(&path)?;

        let pending = self.state_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.state_failures.store(pending - 1, Ordering::SeqCst);
            return Err(HubError::Status { path, status: 502 });
        }

        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.entity_id == entity_id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(entity_id.to_string()))
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
    ) -> Result<(), HubError> {
        let path = format!("/api/services/{}/{}", domain, service);
        self.check_reachable(&path)?;

        let name = format!("{}.{}", domain, service);
        let entity_id = data
            .get("entity_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.calls.lock().unwrap().push((name.clone(), data));

        if self
            .failing_calls
            .contains(&format!("{}/{}", name, entity_id))
        {
            return Err(HubError::Status { path, status: 500 });
        }
        Ok(())
    }

    async fn render_template(&self, template: &str) -> Result<String, HubError> {
        self.check_reachable("/api/template")?;

        if template.contains("areas()") {
            let mut ids: Vec<&String> = self.area_names.keys().collect();
            ids.sort();
            let quoted: Vec<String> = ids.iter().map(|id| format!("'{}'", id)).collect();
            return Ok(format!("[{}]", quoted.join(", ")));
        }
        if let Some(id) = Self::quoted_arg(template, "area_name") {
            return Ok(self.area_names.get(&id).cloned().unwrap_or(id));
        }
        if let Some(id) = Self::quoted_arg(template, "area_entities") {
            let ids = self.area_entities.get(&id).cloned().unwrap_or_default();
            let quoted: Vec<String> = ids.iter().map(|id| format!("'{}'", id)).collect();
            return Ok(format!("[{}]", quoted.join(", ")));
        }

        Err(HubError::Status {
            path: "/api/template".to_string(),
            status: 400,
        })
    }

    async fn area_registry(&self) -> Result<Option<Vec<Area>>, HubError> {
        self.check_reachable("/api/config/area_registry")?;
        Ok(self.areas.clone())
    }
}

/// Real Home Assistant client using reqwest
#[derive(Debug, Clone)]
pub struct HubClient {
    url: String,
    token: String,
    http: reqwest::Client,
}

impl HubClient {
    pub fn new(url: &str, token: &str) -> Result<Self, HubError> {
        let url = url.trim().trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(HubError::InvalidUrl(url.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| HubError::Request {
                path: url.to_string(),
                source,
            })?;

        Ok(Self {
            url: url.to_string(),
            token: token.to_string(),
            http,
        })
    }

    async fn send(
        &self,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, HubError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| HubError::Request {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("[{}] {} returned {}", self.url, path, status);
            return Err(HubError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, HubError> {
        let request = self.http.get(format!("{}{}", self.url, path));
        self.send(path, request)
            .await?
            .json()
            .await
            .map_err(|source| HubError::Request {
                path: path.to_string(),
                source,
            })
    }
}

#[async_trait]
impl Hub for HubClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn probe(&self, timeout: Duration) -> Result<ApiStatus, HubError> {
        let path = "/api/";
        let request = self
            .http
            .get(format!("{}{}", self.url, path))
            .timeout(timeout);

        let response = self.send(path, request).await?;
        // Older instances answer with a bare message; an unparsable body still
        // means the API is up.
        Ok(response.json().await.unwrap_or_default())
    }

    async fn states(&self) -> Result<Vec<Device>, HubError> {
        self.get_json("/api/states").await
    }

    async fn state(&self, entity_id: &str) -> Result<Device, HubError> {
        match self
            .get_json::<Device>(&format!("/api/states/{}", entity_id))
            .await
        {
            Err(HubError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(HubError::NotFound(entity_id.to_string()))
            }
            other => other,
        }
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
    ) -> Result<(), HubError> {
        let path = format!("/api/services/{}/{}", domain, service);
        tracing::debug!("[{}] Calling {}.{} with {}", self.url, domain, service, data);

        let request = self.http.post(format!("{}{}", self.url, path)).json(&data);
        self.send(&path, request).await?;
        Ok(())
    }

    async fn render_template(&self, template: &str) -> Result<String, HubError> {
        let path = "/api/template";
        let request = self
            .http
            .post(format!("{}{}", self.url, path))
            .json(&serde_json::json!({ "template": template }));

        self.send(path, request)
            .await?
            .text()
            .await
            .map_err(|source| HubError::Request {
                path: path.to_string(),
                source,
            })
    }

    async fn area_registry(&self) -> Result<Option<Vec<Area>>, HubError> {
        match self
            .get_json::<Vec<Area>>("/api/config/area_registry")
            .await
        {
            Ok(areas) => Ok(Some(areas)),
            Err(HubError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                tracing::info!(
                    "[{}] Area registry not available, falling back to templates",
                    self.url
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
