//! Lazily instantiated device handles guarded by per-device busy flags.
//!
//! The busy flag is the only mutual-exclusion primitive for physical devices:
//! at most one caller holds it for a `(source, device)` pair at any instant.
//! The same entry carries the last-access timestamp consulted by debouncing.

use crate::camera::CameraService;
use crate::catalogue::{Catalogue, DeviceRole};
use crate::error::{DeviceError, Result, WatchpostError};
use crate::gpio::{DeviceStateStore, GpioDevice, PinBackend};
use crate::model::{DeviceSpec, SourceKind};
use crate::notify::MailTransport;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const BACKOFF_START: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_millis(200);

/// Live handle to an instantiated device
#[derive(Clone)]
pub enum DeviceHandle {
    Gpio(Arc<GpioDevice>),
    Camera(Arc<dyn CameraService>),
    Mailer(Arc<dyn MailTransport>),
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceHandle::Gpio(device) => write!(f, "Gpio({})", device.id()),
            DeviceHandle::Camera(camera) => write!(f, "Camera({})", camera.name()),
            DeviceHandle::Mailer(mailer) => write!(f, "Mailer({})", mailer.name()),
        }
    }
}

impl DeviceHandle {
    pub fn as_gpio(&self) -> Option<&Arc<GpioDevice>> {
        match self {
            DeviceHandle::Gpio(device) => Some(device),
            _ => None,
        }
    }

    pub fn as_camera(&self) -> Option<&Arc<dyn CameraService>> {
        match self {
            DeviceHandle::Camera(camera) => Some(camera),
            _ => None,
        }
    }

    pub fn as_mailer(&self) -> Option<&Arc<dyn MailTransport>> {
        match self {
            DeviceHandle::Mailer(mailer) => Some(mailer),
            _ => None,
        }
    }
}

/// Cached device with its busy flag and bound trigger events
#[derive(Debug)]
pub struct RegistryEntry {
    pub capability: String,
    pub handle: DeviceHandle,
    pub busy: bool,
    pub last_access: Option<Instant>,
    pub events: BTreeSet<String>,
}

type EntryKey = (SourceKind, String);

pub struct DeviceRegistry {
    catalogue: Arc<Catalogue>,
    specs: HashMap<String, DeviceSpec>,
    backend: Arc<dyn PinBackend>,
    state_store: Arc<DeviceStateStore>,
    camera: Option<(String, Arc<dyn CameraService>)>,
    mailer: Option<(String, Arc<dyn MailTransport>)>,
    entries: Mutex<HashMap<EntryKey, RegistryEntry>>,
}

/// Holds a device's busy flag; releases it when dropped
pub struct BusyLease<'a> {
    registry: &'a DeviceRegistry,
    source: SourceKind,
    device_id: String,
}

impl Drop for BusyLease<'_> {
    fn drop(&mut self) {
        self.registry.release(self.source, &self.device_id);
    }
}

impl DeviceRegistry {
    pub fn new(
        catalogue: Arc<Catalogue>,
        devices: &[DeviceSpec],
        backend: Arc<dyn PinBackend>,
        state_store: Arc<DeviceStateStore>,
    ) -> Result<Self> {
        let mut specs = HashMap::new();
        for spec in devices {
            if specs.insert(spec.id.clone(), spec.clone()).is_some() {
                return Err(WatchpostError::configuration(format!(
                    "device id '{}' declared twice",
                    spec.id
                )));
            }
        }

        Ok(Self {
            catalogue,
            specs,
            backend,
            state_store,
            camera: None,
            mailer: None,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Register the camera service under a device id
    pub fn with_camera(mut self, id: &str, camera: Arc<dyn CameraService>) -> Self {
        self.camera = Some((id.to_string(), camera));
        self
    }

    /// Register the mail transport under a device id
    pub fn with_mailer(mut self, id: &str, mailer: Arc<dyn MailTransport>) -> Self {
        self.mailer = Some((id.to_string(), mailer));
        self
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn device_spec(&self, device_id: &str) -> Option<&DeviceSpec> {
        self.specs.get(device_id)
    }

    /// Registry key for a device; notifications always resolve to the mailer
    fn key(&self, source: SourceKind, device_id: &str) -> EntryKey {
        match (source, &self.mailer) {
            (SourceKind::Notification, Some((id, _))) if device_id.is_empty() => {
                (source, id.clone())
            }
            _ => (source, device_id.to_string()),
        }
    }

    fn not_configured(device_id: &str) -> WatchpostError {
        DeviceError::NotConfigured {
            device: device_id.to_string(),
        }
        .into()
    }

    fn instantiate(&self, source: SourceKind, device_id: &str) -> Result<RegistryEntry> {
        let (capability, handle) = match source {
            SourceKind::Camera | SourceKind::MotionSampler => match &self.camera {
                Some((id, camera)) if id == device_id => (
                    crate::catalogue::CAMERA_CAPABILITY.to_string(),
                    DeviceHandle::Camera(Arc::clone(camera)),
                ),
                _ => return Err(Self::not_configured(device_id)),
            },
            SourceKind::Notification => match &self.mailer {
                Some((id, mailer)) if id == device_id => (
                    crate::catalogue::MAILER_CAPABILITY.to_string(),
                    DeviceHandle::Mailer(Arc::clone(mailer)),
                ),
                _ => return Err(Self::not_configured(device_id)),
            },
            SourceKind::GeneralIo => {
                let spec = self
                    .specs
                    .get(device_id)
                    .ok_or_else(|| Self::not_configured(device_id))?;
                let capability = self.catalogue.validate_device(spec)?;
                if capability.role == DeviceRole::Service {
                    return Err(WatchpostError::configuration(format!(
                        "device {} has service capability {} and cannot be driven as GPIO",
                        device_id, capability.name
                    )));
                }

                let restored = if self.tracks_state(device_id) {
                    self.state_store.get(device_id).map(|state| state.value)
                } else {
                    None
                };
                let device =
                    GpioDevice::open(spec, capability, Arc::clone(&self.backend), restored)?;
                (
                    capability.name.to_string(),
                    DeviceHandle::Gpio(Arc::new(device)),
                )
            }
        };

        info!("Instantiated {} device {} ({})", source, device_id, capability);
        Ok(RegistryEntry {
            capability,
            handle,
            busy: false,
            last_access: None,
            events: BTreeSet::new(),
        })
    }

    /// Run `f` on the entry for a device, instantiating it on first reference
    fn with_entry<T>(
        &self,
        source: SourceKind,
        device_id: &str,
        f: impl FnOnce(&mut RegistryEntry) -> T,
    ) -> Result<T> {
        let key = self.key(source, device_id);
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) {
            let entry = self.instantiate(source, &key.1)?;
            entries.insert(key.clone(), entry);
        }
        match entries.get_mut(&key) {
            Some(entry) => Ok(f(entry)),
            None => Err(Self::not_configured(device_id)),
        }
    }

    /// Fetch a device handle, optionally test-and-setting its busy flag.
    ///
    /// With `want_busy` the call never blocks: it returns `acquired = false`
    /// when another caller holds the flag.
    pub fn acquire(
        &self,
        source: SourceKind,
        device_id: &str,
        want_busy: bool,
    ) -> Result<(bool, DeviceHandle)> {
        self.with_entry(source, device_id, |entry| {
            if !want_busy {
                return (true, entry.handle.clone());
            }
            if entry.busy {
                return (false, entry.handle.clone());
            }
            entry.busy = true;
            entry.last_access = Some(Instant::now());
            (true, entry.handle.clone())
        })
    }

    /// Clear a device's busy flag
    pub fn release(&self, source: SourceKind, device_id: &str) {
        let key = self.key(source, device_id);
        if let Some(entry) = self.entries.lock().get_mut(&key) {
            entry.busy = false;
        }
    }

    /// Acquire the busy flag, polling with backoff when `wait` is set.
    ///
    /// Returns `None` when the device stayed busy (immediately without `wait`,
    /// after `timeout` otherwise).
    pub async fn lease(
        &self,
        source: SourceKind,
        device_id: &str,
        wait: bool,
        timeout: Duration,
    ) -> Result<Option<(BusyLease<'_>, DeviceHandle)>> {
        let deadline = Instant::now() + timeout;
        let mut backoff = BACKOFF_START;

        loop {
            let (acquired, handle) = self.acquire(source, device_id, true)?;
            if acquired {
                let lease = BusyLease {
                    registry: self,
                    source,
                    device_id: device_id.to_string(),
                };
                return Ok(Some((lease, handle)));
            }
            if !wait {
                debug!("Device {} busy, not waiting", device_id);
                return Ok(None);
            }
            if Instant::now() >= deadline {
                warn!("Device {} still busy after {:?}", device_id, timeout);
                return Ok(None);
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    /// Debounce check against the device's last access.
    ///
    /// Returns true (bouncing) without touching state when the last access is
    /// more recent than `bounce`; otherwise refreshes the timestamp.
    pub fn check_bounce(
        &self,
        source: SourceKind,
        device_id: &str,
        bounce: Duration,
    ) -> Result<bool> {
        self.with_entry(source, device_id, |entry| {
            let now = Instant::now();
            match entry.last_access {
                Some(last) if now.duration_since(last) < bounce => true,
                _ => {
                    entry.last_access = Some(now);
                    false
                }
            }
        })
    }

    /// Bind a trigger event to a device; a second binding of the same event is rejected
    pub fn bind_event(&self, source: SourceKind, device_id: &str, event: &str) -> Result<()> {
        let inserted =
            self.with_entry(source, device_id, |entry| entry.events.insert(event.to_string()))?;
        if !inserted {
            return Err(WatchpostError::configuration(format!(
                "event '{}' of device {} is already bound to a trigger",
                event, device_id
            )));
        }
        debug!("Bound {} on {} {}", event, source, device_id);
        Ok(())
    }

    pub fn unbind_event(&self, source: SourceKind, device_id: &str, event: &str) {
        let key = self.key(source, device_id);
        if let Some(entry) = self.entries.lock().get_mut(&key) {
            entry.events.remove(event);
        }
    }

    pub fn is_busy(&self, source: SourceKind, device_id: &str) -> bool {
        let key = self.key(source, device_id);
        self.entries
            .lock()
            .get(&key)
            .map(|entry| entry.busy)
            .unwrap_or(false)
    }

    pub fn last_access(&self, source: SourceKind, device_id: &str) -> Option<Instant> {
        let key = self.key(source, device_id);
        self.entries
            .lock()
            .get(&key)
            .and_then(|entry| entry.last_access)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a GPIO device's value must survive restarts
    pub fn tracks_state(&self, device_id: &str) -> bool {
        let Some(spec) = self.specs.get(device_id) else {
            return false;
        };
        self.catalogue.needs_calibration(spec)
            || self
                .catalogue
                .get(&spec.capability)
                .map(|c| c.tracks_state)
                .unwrap_or(false)
    }

    /// Persist the current value of a state-tracking device
    pub fn persist_state(&self, device: &GpioDevice) -> Result<()> {
        if self.tracks_state(device.id()) {
            self.state_store.set(device.id(), device.value())?;
        }
        Ok(())
    }

    /// Close every cached handle and clear the registry
    pub async fn close_all(&self) {
        let drained: Vec<(EntryKey, RegistryEntry)> = self.entries.lock().drain().collect();

        for ((source, id), entry) in drained {
            match entry.handle {
                DeviceHandle::Gpio(device) => {
                    if let Err(e) = self.persist_state(&device) {
                        warn!("Failed to persist state of {}: {}", id, e);
                    }
                    device.close();
                }
                DeviceHandle::Camera(camera) => {
                    if let Err(e) = camera.stop_live_preview().await {
                        warn!("Failed to stop preview of {}: {}", id, e);
                    }
                }
                DeviceHandle::Mailer(_) => {}
            }
            debug!("Released {} device {}", source, id);
        }

        let remaining = self.len();
        if remaining != 0 {
            error!(
                "Device registry still holds {} entr(ies) after teardown",
                remaining
            );
        } else {
            info!("Device registry closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MemoryPins;
    use crate::model::{ParamMap, ParamValue};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn led(id: &str, pin: i64) -> DeviceSpec {
        let mut params = ParamMap::new();
        params.insert("pin".to_string(), ParamValue::Int(pin));
        DeviceSpec {
            id: id.to_string(),
            capability: "LED".to_string(),
            params,
            needs_calibration: None,
        }
    }

    fn registry(devices: &[DeviceSpec]) -> DeviceRegistry {
        DeviceRegistry::new(
            Arc::new(Catalogue::builtin()),
            devices,
            Arc::new(MemoryPins::new()),
            Arc::new(DeviceStateStore::in_memory()),
        )
        .unwrap()
    }

    #[test]
    fn test_lazy_instantiation_and_caching() {
        let registry = registry(&[led("porch", 17)]);
        assert!(registry.is_empty());

        let (_, first) = registry.acquire(SourceKind::GeneralIo, "porch", false).unwrap();
        let (_, second) = registry.acquire(SourceKind::GeneralIo, "porch", false).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(
            first.as_gpio().unwrap(),
            second.as_gpio().unwrap()
        ));
    }

    #[test]
    fn test_unknown_device_rejected() {
        let registry = registry(&[]);
        assert!(registry.acquire(SourceKind::GeneralIo, "ghost", false).is_err());
        assert!(registry.acquire(SourceKind::Camera, "camera", false).is_err());
    }

    #[test]
    fn test_busy_flag_is_exclusive() {
        let registry = registry(&[led("porch", 17)]);

        let (acquired, _) = registry.acquire(SourceKind::GeneralIo, "porch", true).unwrap();
        assert!(acquired);
        let (acquired, _) = registry.acquire(SourceKind::GeneralIo, "porch", true).unwrap();
        assert!(!acquired);

        registry.release(SourceKind::GeneralIo, "porch");
        let (acquired, _) = registry.acquire(SourceKind::GeneralIo, "porch", true).unwrap();
        assert!(acquired);
    }

    #[test]
    fn test_duplicate_event_binding_rejected() {
        let registry = registry(&[led("porch", 17)]);
        registry
            .bind_event(SourceKind::GeneralIo, "porch", "when_pressed")
            .unwrap();
        let err = registry
            .bind_event(SourceKind::GeneralIo, "porch", "when_pressed")
            .unwrap_err();
        assert!(matches!(err, WatchpostError::Configuration { .. }));

        registry.unbind_event(SourceKind::GeneralIo, "porch", "when_pressed");
        assert!(registry
            .bind_event(SourceKind::GeneralIo, "porch", "when_pressed")
            .is_ok());
    }

    #[tokio::test]
    async fn test_check_bounce_refreshes_only_when_accepted() {
        let registry = registry(&[led("porch", 17)]);
        let bounce = Duration::from_millis(200);

        assert!(!registry.check_bounce(SourceKind::GeneralIo, "porch", bounce).unwrap());
        let first = registry.last_access(SourceKind::GeneralIo, "porch").unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.check_bounce(SourceKind::GeneralIo, "porch", bounce).unwrap());
        assert_eq!(registry.last_access(SourceKind::GeneralIo, "porch"), Some(first));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!registry.check_bounce(SourceKind::GeneralIo, "porch", bounce).unwrap());
        assert!(registry.last_access(SourceKind::GeneralIo, "porch").unwrap() > first);
    }

    #[tokio::test]
    async fn test_lease_without_wait_fails_fast() {
        let registry = registry(&[led("porch", 17)]);
        let held = registry
            .lease(SourceKind::GeneralIo, "porch", false, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(held.is_some());

        let denied = registry
            .lease(SourceKind::GeneralIo, "porch", false, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(denied.is_none());

        drop(held);
        assert!(!registry.is_busy(SourceKind::GeneralIo, "porch"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_holders_never_exceed_one() {
        let registry = Arc::new(registry(&[led("porch", 17)]));
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let holders = Arc::clone(&holders);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let lease = registry
                        .lease(SourceKind::GeneralIo, "porch", true, Duration::from_secs(10))
                        .await
                        .unwrap();
                    assert!(lease.is_some());
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    drop(lease);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_all_releases_pins() {
        let pins = Arc::new(MemoryPins::new());
        let registry = DeviceRegistry::new(
            Arc::new(Catalogue::builtin()),
            &[led("porch", 17)],
            pins.clone(),
            Arc::new(DeviceStateStore::in_memory()),
        )
        .unwrap();

        registry.acquire(SourceKind::GeneralIo, "porch", false).unwrap();
        assert!(pins.is_claimed(17));

        registry.close_all().await;
        assert!(registry.is_empty());
        assert!(!pins.is_claimed(17));
    }
}
