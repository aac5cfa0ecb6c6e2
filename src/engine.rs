//! The explicitly constructed orchestrator core.
//!
//! One [`Engine`] owns every shared map and lock of the system: device
//! registry, in-flight event contexts, worker set, journals and trigger
//! bindings. Workers receive it by `Arc` instead of reaching for globals.

use crate::camera::{CameraService, SimulatedCamera};
use crate::catalogue::Catalogue;
use crate::config::{PinBackendKind, WatchpostConfig};
use crate::debounce::DebounceGate;
use crate::error::{CameraError, Result, WatchpostError};
use crate::events::{
    EventContextStore, EventId, EventJournal, EventStore, FiredTrigger, WorkerId, WorkerSet,
};
use crate::gpio::{DeviceStateStore, MemoryPins, PinBackend, SysfsPins};
use crate::model::{Action, DeviceSpec, SourceKind, Trigger};
use crate::motion::OperatingHours;
use crate::notify::{self, LogTransport, MailTransport};
use crate::registry::DeviceRegistry;
use crate::status::StatusBoard;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// `(source, device, event)` a trigger is armed on
pub type BindingKey = (SourceKind, String, String);

/// The recording currently in progress, with the bookkeeping to close it
#[derive(Debug, Clone)]
pub struct OpenVideo {
    pub path: PathBuf,
    pub started: DateTime<Local>,
    pub event_id: Option<EventId>,
    pub worker: Option<WorkerId>,
    pub row_id: Option<i64>,
}

impl OpenVideo {
    pub fn elapsed(&self) -> Duration {
        (Local::now() - self.started).to_std().unwrap_or_default()
    }
}

pub struct Engine {
    config: WatchpostConfig,
    catalogue: Arc<Catalogue>,
    registry: Arc<DeviceRegistry>,
    debounce: DebounceGate,
    contexts: EventContextStore,
    workers: WorkerSet,
    journal: EventJournal,
    store: EventStore,
    status: StatusBoard,
    camera: Arc<dyn CameraService>,
    mailer: Arc<dyn MailTransport>,
    schedule: OperatingHours,
    stream_lock: tokio::sync::Mutex<()>,
    open_video: Mutex<Option<OpenVideo>>,
    triggers: HashMap<String, Trigger>,
    actions: HashMap<String, Action>,
    bindings: Mutex<HashMap<BindingKey, String>>,
    trigger_tx: mpsc::Sender<FiredTrigger>,
    trigger_rx: Mutex<Option<mpsc::Receiver<FiredTrigger>>>,
}

/// Builder for [`Engine`]; collaborators left unset get in-process stand-ins
pub struct EngineBuilder {
    config: WatchpostConfig,
    camera: Option<Arc<dyn CameraService>>,
    mailer: Option<Arc<dyn MailTransport>>,
    pins: Option<Arc<dyn PinBackend>>,
    state_store: Option<Arc<DeviceStateStore>>,
    journal: Option<EventJournal>,
    store: Option<EventStore>,
}

impl EngineBuilder {
    pub fn new(config: WatchpostConfig) -> Self {
        Self {
            config,
            camera: None,
            mailer: None,
            pins: None,
            state_store: None,
            journal: None,
            store: None,
        }
    }

    pub fn camera(mut self, camera: Arc<dyn CameraService>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn mailer(mut self, mailer: Arc<dyn MailTransport>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn pins(mut self, pins: Arc<dyn PinBackend>) -> Self {
        self.pins = Some(pins);
        self
    }

    pub fn state_store(mut self, state_store: Arc<DeviceStateStore>) -> Self {
        self.state_store = Some(state_store);
        self
    }

    pub fn journal(mut self, journal: EventJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn store(mut self, store: EventStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Arc<Engine>> {
        let config = self.config;
        let catalogue = Arc::new(Catalogue::builtin());

        let camera = self
            .camera
            .unwrap_or_else(|| Arc::new(SimulatedCamera::new(config.camera.clone())));
        let mailer = self
            .mailer
            .unwrap_or_else(|| Arc::new(LogTransport::new(&config.notification.id)));
        let pins = self.pins.unwrap_or_else(|| Arc::new(MemoryPins::new()));
        let state_store = self
            .state_store
            .unwrap_or_else(|| Arc::new(DeviceStateStore::in_memory()));
        let journal = self.journal.unwrap_or_else(EventJournal::in_memory);
        let store = match self.store {
            Some(store) => store,
            None => EventStore::in_memory()?,
        };

        let devices = effective_devices(&config);
        let registry = Arc::new(
            DeviceRegistry::new(Arc::clone(&catalogue), &devices, pins, state_store)?
                .with_camera(&config.camera.id, Arc::clone(&camera))
                .with_mailer(&config.notification.id, Arc::clone(&mailer)),
        );

        let mut triggers = HashMap::new();
        for trigger in &config.trigger {
            if triggers.insert(trigger.id.clone(), trigger.clone()).is_some() {
                return Err(WatchpostError::configuration(format!(
                    "trigger id '{}' declared twice",
                    trigger.id
                )));
            }
        }
        let mut actions = HashMap::new();
        for action in &config.action {
            if actions.insert(action.id.clone(), action.clone()).is_some() {
                return Err(WatchpostError::configuration(format!(
                    "action id '{}' declared twice",
                    action.id
                )));
            }
        }

        let schedule = OperatingHours::from_config(&config.motion.schedule)?;
        let (trigger_tx, trigger_rx) = mpsc::channel(config.system.trigger_channel_capacity.max(1));

        info!(
            "Engine built: {} device(s), {} trigger(s), {} action(s)",
            devices.len(),
            triggers.len(),
            actions.len()
        );

        Ok(Arc::new(Engine {
            debounce: DebounceGate::new(Arc::clone(&registry)),
            config,
            catalogue,
            registry,
            contexts: EventContextStore::new(),
            workers: WorkerSet::new(),
            journal,
            store,
            status: StatusBoard::new(),
            camera,
            mailer,
            schedule,
            stream_lock: tokio::sync::Mutex::new(()),
            open_video: Mutex::new(None),
            triggers,
            actions,
            bindings: Mutex::new(HashMap::new()),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        }))
    }
}

/// Device specs with the parameters of active GPIO triggers applied on top
fn effective_devices(config: &WatchpostConfig) -> Vec<DeviceSpec> {
    let mut devices = config.device.clone();
    let overlays = config
        .trigger
        .iter()
        .filter(|t| t.active && t.source == SourceKind::GeneralIo && !t.params.is_empty());
    for trigger in overlays {
        if let Some(spec) = devices.iter_mut().find(|d| d.id == trigger.device) {
            for (name, value) in &trigger.params {
                spec.params.insert(name.clone(), value.clone());
            }
        }
    }
    devices
}

impl Engine {
    pub fn builder(config: WatchpostConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Engine wired to the configured collaborators.
    ///
    /// A dry run keeps everything in memory: simulated pins, log-only mail,
    /// no files written besides camera output.
    pub fn from_config(config: WatchpostConfig, dry_run: bool) -> Result<Arc<Self>> {
        if dry_run {
            info!("Dry run: using in-memory pins, journal and store");
            return EngineBuilder::new(config).build();
        }

        let pins: Arc<dyn PinBackend> = match config.devices.backend {
            PinBackendKind::Memory => Arc::new(MemoryPins::new()),
            PinBackendKind::Sysfs => Arc::new(SysfsPins::new(&config.devices.sysfs_root)),
        };
        let mailer = notify::transport_from_config(&config.notification)?;
        let state_store = Arc::new(DeviceStateStore::open(&config.devices.state_file)?);
        let journal = EventJournal::open(&config.events.log_path)?;
        let store = EventStore::open(&config.events.database_path)?;

        EngineBuilder::new(config)
            .pins(pins)
            .mailer(mailer)
            .state_store(state_store)
            .journal(journal)
            .store(store)
            .build()
    }

    pub fn config(&self) -> &WatchpostConfig {
        &self.config
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn debounce(&self) -> &DebounceGate {
        &self.debounce
    }

    pub fn contexts(&self) -> &EventContextStore {
        &self.contexts
    }

    pub fn workers(&self) -> &WorkerSet {
        &self.workers
    }

    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn camera(&self) -> &Arc<dyn CameraService> {
        &self.camera
    }

    pub fn mailer(&self) -> &Arc<dyn MailTransport> {
        &self.mailer
    }

    pub fn schedule(&self) -> &OperatingHours {
        &self.schedule
    }

    pub fn camera_id(&self) -> &str {
        &self.config.camera.id
    }

    pub fn trigger(&self, id: &str) -> Option<&Trigger> {
        self.triggers.get(id)
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.get(id)
    }

    /// Triggers in configuration order
    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.config
            .trigger
            .iter()
            .filter_map(|t| self.triggers.get(&t.id))
    }

    pub(crate) fn bind(&self, key: BindingKey, trigger_id: &str) {
        self.bindings.lock().insert(key, trigger_id.to_string());
    }

    pub(crate) fn unbind(&self, key: &BindingKey) -> Option<String> {
        self.bindings.lock().remove(key)
    }

    pub(crate) fn bindings(&self) -> Vec<(BindingKey, String)> {
        self.bindings
            .lock()
            .iter()
            .map(|(key, id)| (key.clone(), id.clone()))
            .collect()
    }

    /// Whether a trigger currently has an armed binding
    pub fn is_armed(&self, trigger_id: &str) -> bool {
        self.bindings.lock().values().any(|id| id == trigger_id)
    }

    /// Push the trigger bound to `(source, device, event)` onto the dispatcher channel.
    ///
    /// Returns `None` when nothing is armed on that event or the channel is
    /// full; otherwise a receiver yielding the id of the event that resulted
    /// (`None` if the firing was suppressed).
    pub fn stimulate(
        &self,
        source: SourceKind,
        device_id: &str,
        event: &str,
    ) -> Result<Option<oneshot::Receiver<Option<EventId>>>> {
        let key = (source, device_id.to_string(), event.to_string());
        let Some(trigger_id) = self.bindings.lock().get(&key).cloned() else {
            debug!("No trigger armed on {} {} {}", source, device_id, event);
            return Ok(None);
        };

        let (reply, receiver) = oneshot::channel();
        match self.trigger_tx.try_send(FiredTrigger {
            trigger_id,
            reply: Some(reply),
        }) {
            Ok(()) => Ok(Some(receiver)),
            Err(TrySendError::Full(fired)) => {
                warn!("Trigger channel full, dropping firing of {}", fired.trigger_id);
                Ok(None)
            }
            Err(TrySendError::Closed(_)) => Err(WatchpostError::system("trigger channel closed")),
        }
    }

    /// Hand the fired-trigger receiver to the dispatcher; only the first caller gets it
    pub fn take_trigger_receiver(&self) -> Option<mpsc::Receiver<FiredTrigger>> {
        self.trigger_rx.lock().take()
    }

    /// Start the live preview if needed, serialized under the stream-start lock.
    ///
    /// A fresh start holds the lock through the settle delay so no capture
    /// sees unconverged exposure.
    pub async fn ensure_live_preview(&self) -> std::result::Result<(), CameraError> {
        let _stream = self.stream_lock.lock().await;
        if self.camera.start_live_preview().await? {
            let settle = self.camera.settle_time();
            if !settle.is_zero() {
                debug!("Preview started fresh, settling for {:?}", settle);
                tokio::time::sleep(settle).await;
            }
        }
        Ok(())
    }

    pub fn open_video(&self) -> Option<OpenVideo> {
        self.open_video.lock().clone()
    }

    pub(crate) fn set_open_video(&self, video: OpenVideo) {
        if let Some(previous) = self.open_video.lock().replace(video) {
            warn!(
                "Recording bookkeeping for {} replaced before it was closed",
                previous.path.display()
            );
        }
    }

    /// Stop the active recording and close its bookkeeping.
    ///
    /// Returns the stopped file, or `None` when nothing was recording.
    pub async fn stop_video(&self) -> std::result::Result<Option<PathBuf>, CameraError> {
        let stopped = self.camera.stop_video().await?;
        let open = self.open_video.lock().take();

        if let Some(open) = open {
            let now = Local::now();
            let seconds = (now - open.started).num_milliseconds() as f64 / 1000.0;
            if let Some(row_id) = open.row_id {
                if let Err(e) = self.store.update_action_duration(row_id, seconds) {
                    warn!("Failed to record video duration: {}", e);
                }
            }
            if let (Some(event_id), Some(worker)) = (&open.event_id, open.worker) {
                self.contexts.update_action(event_id, worker, |action| {
                    if let Some(video) = action.video.as_mut() {
                        video.stopped = Some(now);
                    }
                });
            }
            self.journal.record(
                "Video",
                &format!("stopped {} after {:.1}s", open.path.display(), seconds),
            );
        }
        Ok(stopped)
    }

    /// Completion barrier of an event's last action.
    ///
    /// Waits until every sibling worker and every helper has left the worker
    /// set. Helpers registered while waiting are picked up on the next round.
    pub async fn await_siblings(&self, event_id: &str, own: WorkerId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let pending: Vec<WorkerId> = self
                .contexts
                .get(event_id)
                .map(|context| context.sibling_workers(own))
                .unwrap_or_default()
                .into_iter()
                .filter(|id| self.workers.contains(*id))
                .collect();
            if pending.is_empty() {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.workers.wait_for(&pending, remaining).await {
                return false;
            }
        }
    }

    /// Completion barrier without a give-up: waits round after round,
    /// warning each time a round of `system.barrier_timeout` expires.
    pub async fn settle_siblings(&self, event_id: &str, own: WorkerId, waiter: &str) {
        let timeout = self.config.system.barrier_timeout();
        while !self.await_siblings(event_id, own, timeout).await {
            warn!(
                "Event {} ({} last) still has running actions after {:?}",
                event_id, waiter, timeout
            );
        }
    }

    /// Log a failed operation to the journal and the status board
    pub fn record_failure(&self, category: SourceKind, subject: &str, error: &dyn fmt::Display) {
        warn!("{} failed: {}", subject, error);
        self.journal
            .record("Error", &format!("{}: {}", subject, error));
        self.status
            .post_error(category.as_str(), format!("{} failed", subject), Some(error.to_string()));
    }
}
