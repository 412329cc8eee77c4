use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::message::Trigger;
use super::message::WorkerMessage;
use super::snapshot::DeviceView;
use super::snapshot::RoomView;
use super::snapshot::Snapshot;
use super::status::Status;
use crate::beacon;
use crate::config::DisplayConfig;
use crate::config::FiltersConfig;
use crate::config::ScanConfig;
use crate::dispatch;
use crate::feedback::Cue;
use crate::feedback::Feedback;
use crate::hub;
use crate::hub::Device;
use crate::hub::Hub;
use crate::hub::HubError;
use crate::hub::HubPool;
use crate::locator::RoomLocator;
use crate::room_cache::RoomCache;
use crate::room_cache::RoomCacheEntry;
use crate::room_cache::RoomLookup;
use crate::supervisor::TaskSlot;
use crate::voice::VoiceAssistant;
use crate::voice::VoiceOutcome;
use crate::window::Expiry;
use crate::window::WindowTimers;
use crate::window::WindowVisibility;

/// Capacity for the presenter→engine trigger channel
const TRIGGER_CHANNEL_SIZE: usize = 32;

/// Capacity for the worker→engine message channel
const WORKER_CHANNEL_SIZE: usize = 64;

/// Everything the engine and its workers share.
pub struct AppContext {
    pub display: DisplayConfig,
    pub filters: FiltersConfig,
    pub scan: ScanConfig,
    pub timers: WindowTimers,
    pub hubs: Arc<HubPool>,
    pub locator: RoomLocator,

    /// `None` when voice control is disabled.
    pub voice: Option<Arc<VoiceAssistant>>,
    pub feedback: Feedback,

    /// Wait between a manual toggle and reading the state back.
    pub settle: Duration,
}

/// Cheap handle for presenters: send triggers, watch snapshots.
#[derive(Clone)]
pub struct EngineHandle {
    triggers: mpsc::Sender<Trigger>,
    snapshot: watch::Receiver<Snapshot>,
}

impl EngineHandle {
    /// Queue a trigger. Returns false once the engine has stopped.
    pub async fn send(&self, trigger: Trigger) -> bool {
        self.triggers.send(trigger).await.is_ok()
    }

    /// Queue a trigger without waiting. Returns false when the queue is
    /// full or the engine has stopped.
    pub fn try_send(&self, trigger: Trigger) -> bool {
        match self.triggers.try_send(trigger) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping trigger: {}", e);
                false
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }
}

/// roomctl engine
///
/// Owns the presentation state. Triggers from presenters and results from
/// workers arrive over channels; only this loop mutates the state, and each
/// change is published as a [`Snapshot`].
pub struct Engine {
    ctx: Arc<AppContext>,

    triggers: mpsc::Receiver<Trigger>,
    worker_tx: mpsc::Sender<WorkerMessage>,
    worker_rx: mpsc::Receiver<WorkerMessage>,
    snapshot_tx: watch::Sender<Snapshot>,

    /// Stop signal for the continuous scan.
    stop_tx: watch::Sender<bool>,

    rooms: Arc<RoomCache>,
    /// Shared by display scans and voice cycles: one radio user at a time.
    scan_slot: TaskSlot,

    window: WindowVisibility,
    status: Status,
    room: Option<Arc<RoomCacheEntry>>,
    devices: Vec<Device>,
    hub: Option<Arc<dyn Hub>>,
    last_voice: Option<VoiceOutcome>,
    poll: Option<JoinHandle<()>>,
}

impl Engine {
    /// Create a new Engine and the handle used to drive it.
    pub fn new(ctx: AppContext) -> (Self, EngineHandle) {
        let (trigger_tx, triggers) = mpsc::channel(TRIGGER_CHANNEL_SIZE);
        let (worker_tx, worker_rx) = mpsc::channel(WORKER_CHANNEL_SIZE);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot {
            title: ctx.display.title.clone(),
            ..Default::default()
        });
        let (stop_tx, _) = watch::channel(false);

        let engine = Self {
            rooms: Arc::new(RoomCache::new(ctx.display.room_ttl)),
            ctx: Arc::new(ctx),
            triggers,
            worker_tx,
            worker_rx,
            snapshot_tx,
            stop_tx,
            scan_slot: TaskSlot::new("scan"),
            window: WindowVisibility::default(),
            status: Status::Idle,
            room: None,
            devices: Vec::new(),
            hub: None,
            last_voice: None,
            poll: None,
        };
        let handle = EngineHandle {
            triggers: trigger_tx,
            snapshot: snapshot_rx,
        };

        (engine, handle)
    }

    /// Run the engine's main loop until `Quit` or every handle is dropped.
    pub async fn run(mut self) {
        info!("Engine starting");

        loop {
            let deadline = self.window.next_deadline();
            tokio::select! {
                trigger = self.triggers.recv() => match trigger {
                    None | Some(Trigger::Quit) => break,
                    Some(trigger) => self.handle_trigger(trigger).await,
                },
                Some(msg) = self.worker_rx.recv() => self.handle_worker(msg),
                _ = sleep_until(deadline) => self.tick(),
            }
            self.publish();
        }

        self.stop_tx.send_replace(true);
        self.stop_poll();
        info!("Engine shutting down");
    }

    async fn handle_trigger(&mut self, trigger: Trigger) {
        debug!("Trigger: {:?}", trigger);
        let now = Instant::now();

        match trigger {
            Trigger::Show => {
                let effect = self.window.show(now, &self.ctx.timers);
                debug!("Shown ({:?})", effect);
                if let Some(room) = self.room.clone() {
                    info!("Reusing {} loaded device(s) of {}", self.devices.len(), room.room_name);
                    self.status = ready_status(&room.room_name, &self.devices);
                    self.start_poll();
                } else {
                    self.start_scan();
                }
            }
            Trigger::Scan => {
                if self.scan_slot.is_busy() {
                    info!("Scan already in progress, dropping rescan");
                    return;
                }
                self.rooms.invalidate("rescan requested").await;
                self.stop_poll();
                self.room = None;
                self.devices.clear();
                self.window.show(now, &self.ctx.timers);
                self.start_scan();
            }
            Trigger::Hide => {
                self.stop_tx.send_replace(true);
                self.stop_poll();
                self.window
                    .hide(now, &self.ctx.timers, !self.devices.is_empty());
                if self.window == WindowVisibility::Hidden {
                    self.clear_room();
                }
            }
            Trigger::Interact => self.window.interact(now, &self.ctx.timers),
            Trigger::Toggle(entity_id) => {
                self.window.interact(now, &self.ctx.timers);
                self.spawn_toggle(entity_id);
            }
            Trigger::Voice => self.spawn_voice(),
            Trigger::Quit => {}
        }
    }

    fn handle_worker(&mut self, msg: WorkerMessage) {
        debug!("Worker message: {:?}", msg);

        match msg {
            WorkerMessage::Status(status) => self.status = status,
            WorkerMessage::RoomReady { entry, hub } => {
                self.hub = Some(hub);
                if !self.window.is_visible() {
                    debug!("Room {} resolved while hidden, not presenting", entry.room_id);
                    return;
                }

                self.devices = entry.devices.clone();
                self.status = ready_status(&entry.room_name, &self.devices);
                self.room = Some(entry);
                self.start_poll();
            }
            WorkerMessage::DevicesPolled(polled) => {
                for fresh in polled {
                    if let Some(device) =
                        self.devices.iter_mut().find(|d| d.entity_id == fresh.entity_id)
                    {
                        *device = fresh;
                    }
                }
            }
            WorkerMessage::Toggled { entity_id, result } => match result {
                Ok(fresh) => {
                    self.status = Status::Toggled {
                        name: fresh.name(),
                        state: fresh.state.clone(),
                    };
                    if let Some(device) = self.devices.iter_mut().find(|d| d.entity_id == entity_id)
                    {
                        *device = fresh;
                    }
                }
                Err(error) => self.status = Status::ToggleFailed { entity_id, error },
            },
            WorkerMessage::Voice(outcome) => {
                self.status = Status::Voice(outcome.clone());
                self.last_voice = Some(outcome);
            }
        }
    }

    fn tick(&mut self) {
        let has_devices = !self.devices.is_empty();
        match self
            .window
            .tick(Instant::now(), &self.ctx.timers, has_devices)
        {
            Some(Expiry::AutoHidden) => {
                info!("Hiding after inactivity");
                self.stop_tx.send_replace(true);
                self.stop_poll();
                if self.window == WindowVisibility::Hidden {
                    self.clear_room();
                }
            }
            Some(Expiry::Cleanup) => {
                info!("Dropping loaded devices");
                self.clear_room();
            }
            None => {}
        }
    }

    fn clear_room(&mut self) {
        self.room = None;
        self.devices.clear();
        self.status = Status::Idle;
    }

    fn publish(&self) {
        let snapshot = Snapshot {
            title: self.ctx.display.title.clone(),
            status: self.status.clone(),
            visible: self.window.is_visible(),
            hub: self.hub.as_ref().map(|h| h.url().to_string()),
            room: self.room.as_ref().map(|r| RoomView {
                id: r.room_id.to_string(),
                name: r.room_name.clone(),
            }),
            devices: self.devices.iter().map(DeviceView::from).collect(),
            last_voice: self.last_voice.clone(),
        };

        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    fn start_scan(&mut self) {
        self.stop_tx.send_replace(false);
        let worker = scan_worker(
            self.ctx.clone(),
            self.rooms.clone(),
            self.worker_tx.clone(),
            self.stop_tx.subscribe(),
        );
        self.scan_slot.spawn("room scan", worker);
    }

    fn start_poll(&mut self) {
        self.stop_poll();

        let Some(hub) = self.hub.clone() else {
            return;
        };
        if self.devices.is_empty() || !self.window.is_visible() {
            return;
        }

        let ids = self.devices.iter().map(|d| d.entity_id.clone()).collect();
        self.poll = Some(tokio::spawn(poll_worker(
            hub,
            ids,
            self.ctx.display.poll_interval,
            self.worker_tx.clone(),
        )));
    }

    fn stop_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
    }

    fn spawn_toggle(&self, entity_id: String) {
        let ctx = self.ctx.clone();
        let hub = self.hub.clone();
        let tx = self.worker_tx.clone();

        tokio::spawn(async move {
            let hub = match hub {
                Some(hub) => hub,
                None => match ctx.hubs.detect_available().await {
                    Some(link) => link.hub,
                    None => {
                        report(&tx, Status::NoHub).await;
                        return;
                    }
                },
            };

            let result = dispatch::toggle_device(hub.as_ref(), &entity_id, ctx.settle)
                .await
                .map_err(|e| e.to_string());
            tx.send(WorkerMessage::Toggled { entity_id, result })
                .await
                .ok();
        });
    }

    fn spawn_voice(&self) {
        let Some(voice) = self.ctx.voice.clone() else {
            warn!("Voice control is disabled");
            return;
        };

        let ctx = self.ctx.clone();
        let rooms = self.rooms.clone();
        let tx = self.worker_tx.clone();

        self.scan_slot.spawn("voice command", async move {
            report(&tx, Status::Listening).await;

            let Some(link) = ctx.hubs.detect_available().await else {
                ctx.feedback.play(Cue::Failure);
                report(&tx, Status::NoHub).await;
                return;
            };
            if link.changed {
                rooms.invalidate("hub instance changed").await;
                voice.invalidate_room("hub instance changed").await;
            }

            let outcome = voice.run_cycle(link.hub.as_ref()).await;
            tx.send(WorkerMessage::Voice(outcome)).await.ok();
        });
    }
}

fn ready_status(area: &str, devices: &[Device]) -> Status {
    if devices.is_empty() {
        Status::NoEntities {
            area: area.to_string(),
        }
    } else {
        Status::Ready {
            area: area.to_string(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

async fn report(tx: &mpsc::Sender<WorkerMessage>, status: Status) {
    tx.send(WorkerMessage::Status(status)).await.ok();
}

/// Resolve the room for the presenter, scanning window after window until a
/// known beacon shows up or the stop signal flips.
async fn scan_worker(
    ctx: Arc<AppContext>,
    rooms: Arc<RoomCache>,
    tx: mpsc::Sender<WorkerMessage>,
    stop: watch::Receiver<bool>,
) {
    if !ctx.locator.has_mapping() {
        report(&tx, Status::NoMapping).await;
        return;
    }

    report(&tx, Status::Scanning).await;

    let Some(link) = ctx.hubs.detect_available().await else {
        report(&tx, Status::NoHub).await;
        return;
    };
    if link.changed {
        rooms.invalidate("hub instance changed").await;
        if let Some(voice) = &ctx.voice {
            voice.invalidate_room("hub instance changed").await;
        }
    }

    let hub = link.hub;
    let lookup = rooms
        .get_or_refresh(|| scan_until_found(&ctx, hub.as_ref(), &tx, stop))
        .await;

    match lookup {
        Ok(RoomLookup::NoRoom) => {
            debug!("Scan stopped before a room was found");
        }
        Ok(lookup) => {
            if let Some(entry) = lookup.entry().cloned() {
                tx.send(WorkerMessage::RoomReady { entry, hub }).await.ok();
            }
        }
        Err(e) => {
            warn!("[{}] Failed to load room: {}", hub.url(), e);
            report(&tx, Status::HubFailed(e.to_string())).await;
        }
    }
}

async fn scan_until_found(
    ctx: &AppContext,
    hub: &dyn Hub,
    tx: &mpsc::Sender<WorkerMessage>,
    stop: watch::Receiver<bool>,
) -> Result<Option<RoomCacheEntry>, HubError> {
    let mut found = None;
    beacon::scan_continuous(
        ctx.locator.scanner().as_ref(),
        ctx.scan.window,
        ctx.scan.idle,
        stop,
        |readings| match ctx.locator.resolve(&readings) {
            Some(room) => {
                found = Some(room);
                ControlFlow::Break(())
            }
            None => {
                tx.try_send(WorkerMessage::Status(Status::NoBeacon)).ok();
                ControlFlow::Continue(())
            }
        },
    )
    .await;

    let Some(room) = found else {
        return Ok(None);
    };

    let area = hub::area_name(hub, room.as_str()).await?;
    report(tx, Status::Loading { area: area.clone() }).await;
    let devices = hub::devices_in_area(hub, room.as_str(), &ctx.filters.entity_domains).await?;
    info!("[{}] Area {} has {} device(s)", hub.url(), area, devices.len());

    Ok(Some(RoomCacheEntry::new(room, area, devices)))
}

/// Refresh the presented devices every `interval` until aborted.
async fn poll_worker(
    hub: Arc<dyn Hub>,
    ids: Vec<String>,
    interval: Duration,
    tx: mpsc::Sender<WorkerMessage>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately and the devices were just loaded
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match hub.states().await {
            Ok(all) => {
                let polled: Vec<Device> = all
                    .into_iter()
                    .filter(|d| ids.contains(&d.entity_id))
                    .collect();
                if tx.send(WorkerMessage::DevicesPolled(polled)).await.is_err() {
                    break;
                }
            }
            Err(e) => debug!("[{}] State poll failed: {}", hub.url(), e),
        }
    }
}
