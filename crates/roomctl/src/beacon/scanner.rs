use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::BeaconReading;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("No Bluetooth adapter found")]
    NoAdapter,

    #[cfg(feature = "ble")]
    #[error("Bluetooth error: {0}")]
    Btleplug(#[from] btleplug::Error),

    #[error("Scanner unavailable: {0}")]
    Unavailable(String),
}

/// Source of BLE advertisements.
///
/// This trait allows for mocking the radio for testing purposes
#[async_trait]
pub trait BeaconScanner: Send + Sync {
    /// Listen for `window` and return every advertisement seen, one reading per
    /// peripheral.
    async fn scan(&self, window: Duration) -> Result<Vec<BeaconReading>, ScanError>;
}

/// Mock scanner for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockScanner {
    cycles: std::sync::Mutex<std::collections::VecDeque<Result<Vec<BeaconReading>, String>>>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the readings returned by the next scan. Once the queue is empty
    /// every scan returns no readings.
    pub fn push_cycle(&self, readings: Vec<BeaconReading>) {
        self.cycles.lock().unwrap().push_back(Ok(readings));
    }

    pub fn push_failure(&self, message: &str) {
        self.cycles
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl BeaconScanner for MockScanner {
    async fn scan(&self, _window: Duration) -> Result<Vec<BeaconReading>, ScanError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.cycles.lock().unwrap().pop_front() {
            Some(Ok(readings)) => Ok(readings),
            Some(Err(message)) => Err(ScanError::Unavailable(message)),
            None => Ok(Vec::new()),
        }
    }
}

/// Real scanner using the first adapter reported by btleplug.
#[cfg(feature = "ble")]
#[derive(Debug, Default)]
pub struct BtleplugScanner;

#[cfg(feature = "ble")]
impl BtleplugScanner {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "ble")]
#[async_trait]
impl BeaconScanner for BtleplugScanner {
    async fn scan(&self, window: Duration) -> Result<Vec<BeaconReading>, ScanError> {
        use btleplug::api::Central;
        use btleplug::api::Manager as _;
        use btleplug::api::Peripheral as _;
        use btleplug::api::ScanFilter;
        use btleplug::platform::Manager;
        use macaddr::MacAddr6;

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(ScanError::NoAdapter)?;

        tracing::debug!("Scanning for {:?}", window);
        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(window).await;

        let peripherals = adapter.peripherals().await;
        if let Err(e) = adapter.stop_scan().await {
            tracing::warn!("Failed to stop BLE scan: {}", e);
        }

        let mut readings = Vec::new();
        for peripheral in peripherals? {
            let address: MacAddr6 = peripheral.address().into_inner().into();

            let properties = match peripheral.properties().await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!("Failed to read properties of {}: {}", address, e);
                    continue;
                }
            };

            // Cached peripherals without a fresh advertisement carry no RSSI
            let Some(rssi) = properties.rssi else {
                continue;
            };

            readings.push(BeaconReading {
                address,
                rssi,
                name: properties.local_name,
            });
        }

        tracing::debug!("Scan finished with {} reading(s)", readings.len());
        Ok(readings)
    }
}

/// Run a single scan window.
pub async fn scan_once<S>(scanner: &S, window: Duration) -> Result<Vec<BeaconReading>, ScanError>
where
    S: BeaconScanner + ?Sized,
{
    scanner.scan(window).await
}

/// Scan repeatedly until `stop` flips to `true` or `on_cycle` breaks.
///
/// Each window is allowed to finish; the stop signal is checked between
/// windows and interrupts the idle delay. A failed window is logged and the
/// loop carries on after the idle delay.
pub async fn scan_continuous<S, F>(
    scanner: &S,
    window: Duration,
    idle: Duration,
    mut stop: watch::Receiver<bool>,
    mut on_cycle: F,
) where
    S: BeaconScanner + ?Sized,
    F: FnMut(Vec<BeaconReading>) -> ControlFlow<()>,
{
    let mut cycle = 0usize;
    loop {
        if *stop.borrow() {
            break;
        }

        cycle += 1;
        match scanner.scan(window).await {
            Ok(readings) => {
                tracing::debug!("Scan cycle {}: {} reading(s)", cycle, readings.len());
                if on_cycle(readings).is_break() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Scan cycle {} failed: {}", cycle, e),
        }

        if *stop.borrow() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(idle) => {}
            changed = stop.changed() => {
                // Sender gone means nobody can ask us to stop any more
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Continuous scan stopped after {} cycle(s)", cycle);
}
