//! Single-entry cache of the most recently resolved room.
//!
//! A lookup within the TTL is served without scanning or querying the hub.
//! Refreshes are serialized by their own gate, so two resolutions never
//! interleave and the entry is always replaced wholesale. The entry itself is
//! only locked to read or swap it: `current` and `invalidate` never wait for a
//! scan in progress.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::beacon::RoomId;
use crate::hub::Device;

/// Room resolved from a scan, together with the devices registered in it.
#[derive(Debug, Clone)]
pub struct RoomCacheEntry {
    pub room_id: RoomId,
    pub room_name: String,
    pub devices: Vec<Device>,
    pub captured_at: Instant,
}

impl RoomCacheEntry {
    pub fn new(room_id: RoomId, room_name: impl Into<String>, devices: Vec<Device>) -> Self {
        Self {
            room_id,
            room_name: room_name.into(),
            devices,
            captured_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.captured_at) < ttl
    }
}

/// Result of [`RoomCache::get_or_refresh`].
#[derive(Debug, Clone)]
pub enum RoomLookup {
    /// Served from the cache without touching the radio or the hub.
    Cached(Arc<RoomCacheEntry>),

    /// Resolved now and stored.
    Refreshed(Arc<RoomCacheEntry>),

    /// Resolution found no known beacon; the cache is now empty.
    NoRoom,
}

impl RoomLookup {
    pub fn entry(&self) -> Option<&Arc<RoomCacheEntry>> {
        match self {
            RoomLookup::Cached(entry) | RoomLookup::Refreshed(entry) => Some(entry),
            RoomLookup::NoRoom => None,
        }
    }
}

#[derive(Debug)]
pub struct RoomCache {
    ttl: Duration,
    entry: Mutex<Option<Arc<RoomCacheEntry>>>,

    /// Held for the whole of a refresh.
    refreshing: Mutex<()>,
}

impl RoomCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
            refreshing: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached entry, if it has not expired.
    pub async fn current(&self) -> Option<Arc<RoomCacheEntry>> {
        self.current_at(Instant::now()).await
    }

    pub async fn current_at(&self, now: Instant) -> Option<Arc<RoomCacheEntry>> {
        let mut guard = self.entry.lock().await;
        Self::fresh(&mut guard, self.ttl, now)
    }

    /// Replace the cached entry, stamping it with the current time.
    pub async fn store(&self, entry: RoomCacheEntry) -> Arc<RoomCacheEntry> {
        self.store_at(entry, Instant::now()).await
    }

    pub async fn store_at(&self, mut entry: RoomCacheEntry, now: Instant) -> Arc<RoomCacheEntry> {
        entry.captured_at = now;
        let entry = Arc::new(entry);
        *self.entry.lock().await = Some(entry.clone());
        entry
    }

    /// Re-stamp the cached entry so its TTL starts over. No-op when empty.
    pub async fn touch(&self) {
        self.touch_at(Instant::now()).await
    }

    pub async fn touch_at(&self, now: Instant) {
        let mut guard = self.entry.lock().await;
        if let Some(entry) = guard.as_mut() {
            Arc::make_mut(entry).captured_at = now;
        }
    }

    pub async fn invalidate(&self, reason: &str) {
        if self.entry.lock().await.take().is_some() {
            tracing::debug!("Room cache invalidated: {}", reason);
        }
    }

    /// Serve the cached entry, or run `refresh` and store its result.
    ///
    /// `refresh` returning `Ok(None)` means no room was detected. Both that
    /// and an error leave the cache empty.
    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<RoomLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<RoomCacheEntry>, E>>,
    {
        self.lookup(Instant::now(), Instant::now, refresh).await
    }

    pub async fn get_or_refresh_at<F, Fut, E>(
        &self,
        now: Instant,
        refresh: F,
    ) -> Result<RoomLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<RoomCacheEntry>, E>>,
    {
        self.lookup(now, || now, refresh).await
    }

    /// Freshness is judged at `now`; a refreshed entry is stamped with
    /// `stamp()` once the refresh has finished.
    async fn lookup<F, Fut, E>(
        &self,
        now: Instant,
        stamp: impl FnOnce() -> Instant,
        refresh: F,
    ) -> Result<RoomLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<RoomCacheEntry>, E>>,
    {
        let _refreshing = self.refreshing.lock().await;

        if let Some(entry) = self.current_at(now).await {
            tracing::debug!(
                "Using cached room {} ({} device(s))",
                entry.room_id,
                entry.devices.len()
            );
            return Ok(RoomLookup::Cached(entry));
        }

        match refresh().await {
            Ok(Some(mut entry)) => {
                entry.captured_at = stamp();
                let entry = Arc::new(entry);
                *self.entry.lock().await = Some(entry.clone());
                tracing::info!(
                    "Cached room {} ({} device(s))",
                    entry.room_id,
                    entry.devices.len()
                );
                Ok(RoomLookup::Refreshed(entry))
            }
            Ok(None) => {
                *self.entry.lock().await = None;
                Ok(RoomLookup::NoRoom)
            }
            Err(e) => {
                *self.entry.lock().await = None;
                Err(e)
            }
        }
    }

    fn fresh(
        slot: &mut Option<Arc<RoomCacheEntry>>,
        ttl: Duration,
        now: Instant,
    ) -> Option<Arc<RoomCacheEntry>> {
        match slot {
            Some(entry) if entry.is_fresh(ttl, now) => Some(entry.clone()),
            Some(_) => {
                *slot = None;
                None
            }
            None => None,
        }
    }
}
