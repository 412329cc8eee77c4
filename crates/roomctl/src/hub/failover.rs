use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use super::client::Hub;

/// Probe timeout for instances other than the current one.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Probe timeout when re-checking the instance already in use.
pub const RECHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Instance picked by [`HubPool::detect_available`].
#[derive(Clone)]
pub struct HubLink {
    pub hub: Arc<dyn Hub>,

    /// Set when a different instance than the previous one was selected.
    pub changed: bool,
}

impl std::fmt::Debug for HubLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubLink")
            .field("url", &self.hub.url())
            .field("changed", &self.changed)
            .finish()
    }
}

/// Ordered list of hub instances, primary first.
pub struct HubPool {
    hubs: Vec<Arc<dyn Hub>>,
    current: Mutex<Option<usize>>,
}

impl HubPool {
    pub fn new(hubs: Vec<Arc<dyn Hub>>) -> Self {
        Self {
            hubs,
            current: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }

    /// The instance selected by the last successful detection.
    pub fn current(&self) -> Option<Arc<dyn Hub>> {
        let current = *self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.and_then(|idx| self.hubs.get(idx).cloned())
    }

    /// Find a reachable instance.
    ///
    /// The current instance is re-checked first with a shorter timeout, then
    /// the remaining ones are probed in configuration order. When nothing
    /// answers the current selection is kept, so the next detection starts
    /// from it again.
    pub async fn detect_available(&self) -> Option<HubLink> {
        if self.hubs.is_empty() {
            tracing::error!("No Home Assistant instances configured");
            return None;
        }

        let previous = *self.current.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(idx) = previous {
            let hub = &self.hubs[idx];
            match hub.probe(RECHECK_TIMEOUT).await {
                Ok(_) => {
                    tracing::debug!("[{}] Current instance still available", hub.url());
                    return Some(HubLink {
                        hub: hub.clone(),
                        changed: false,
                    });
                }
                Err(e) => tracing::warn!(
                    "[{}] Current instance no longer available, trying others: {}",
                    hub.url(),
                    e
                ),
            }
        }

        for (idx, hub) in self.hubs.iter().enumerate() {
            if Some(idx) == previous {
                continue;
            }

            tracing::debug!(
                "[{}] Testing instance {}/{}",
                hub.url(),
                idx + 1,
                self.hubs.len()
            );
            match hub.probe(PROBE_TIMEOUT).await {
                Ok(status) => {
                    tracing::info!(
                        "[{}] Using Home Assistant instance ({})",
                        hub.url(),
                        status.message.as_deref().unwrap_or("API running")
                    );
                    *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(idx);
                    return Some(HubLink {
                        hub: hub.clone(),
                        changed: previous.is_some(),
                    });
                }
                Err(e) => tracing::warn!("[{}] Cannot reach instance: {}", hub.url(), e),
            }
        }

        tracing::error!("No Home Assistant instance is reachable");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::super::client::MockHub;
    use super::*;

    fn pool(hubs: &[Arc<MockHub>]) -> HubPool {
        HubPool::new(hubs.iter().map(|h| h.clone() as Arc<dyn Hub>).collect())
    }

    #[tokio::test]
    async fn test_primary_preferred() {
        let primary = Arc::new(MockHub::new("http://primary"));
        let backup = Arc::new(MockHub::new("http://backup"));
        let pool = pool(&[primary.clone(), backup.clone()]);

        let link = pool.detect_available().await.unwrap();
        assert_eq!(link.hub.url(), "http://primary");
        assert!(!link.changed);
        assert_eq!(backup.probes(), 0);
    }

    #[tokio::test]
    async fn test_fails_over_in_order() {
        let primary = Arc::new(MockHub::new("http://primary"));
        let second = Arc::new(MockHub::new("http://second"));
        let third = Arc::new(MockHub::new("http://third"));
        primary.set_reachable(false);
        second.set_reachable(false);
        let pool = pool(&[primary.clone(), second.clone(), third.clone()]);

        let link = pool.detect_available().await.unwrap();
        assert_eq!(link.hub.url(), "http://third");
        assert_eq!(primary.probes(), 1);
        assert_eq!(second.probes(), 1);
    }

    #[tokio::test]
    async fn test_current_rechecked_first() {
        let primary = Arc::new(MockHub::new("http://primary"));
        let backup = Arc::new(MockHub::new("http://backup"));
        primary.set_reachable(false);
        let pool = pool(&[primary.clone(), backup.clone()]);

        let link = pool.detect_available().await.unwrap();
        assert_eq!(link.hub.url(), "http://backup");

        // Primary comes back, but the backup stays in use while it answers
        primary.set_reachable(true);
        let link = pool.detect_available().await.unwrap();
        assert_eq!(link.hub.url(), "http://backup");
        assert!(!link.changed);
        assert_eq!(primary.probes(), 1);
    }

    #[tokio::test]
    async fn test_change_reported() {
        let primary = Arc::new(MockHub::new("http://primary"));
        let backup = Arc::new(MockHub::new("http://backup"));
        let pool = pool(&[primary.clone(), backup.clone()]);

        pool.detect_available().await.unwrap();
        primary.set_reachable(false);

        let link = pool.detect_available().await.unwrap();
        assert_eq!(link.hub.url(), "http://backup");
        assert!(link.changed);
        assert_eq!(pool.current().unwrap().url(), "http://backup");
    }

    #[tokio::test]
    async fn test_none_available_keeps_selection() {
        let primary = Arc::new(MockHub::new("http://primary"));
        let backup = Arc::new(MockHub::new("http://backup"));
        let pool = pool(&[primary.clone(), backup.clone()]);
        pool.detect_available().await.unwrap();

        primary.set_reachable(false);
        backup.set_reachable(false);
        assert!(pool.detect_available().await.is_none());
        assert_eq!(pool.current().unwrap().url(), "http://primary");
    }

    #[tokio::test]
    async fn test_empty_pool() {
        assert!(HubPool::new(Vec::new()).detect_available().await.is_none());
    }
}
