//! Fixtures shared by the engine-level test modules.

use crate::config::WatchpostConfig;
use crate::engine::Engine;
use crate::gpio::MemoryPins;
use crate::model::{Action, ActionBinding, DeviceSpec, ParamMap, ParamValue, SourceKind, Trigger};
use crate::notify::recording::RecordingTransport;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub(crate) struct Harness {
    pub dir: TempDir,
    pub engine: Arc<Engine>,
    pub mail: Arc<RecordingTransport>,
    pub pins: Arc<MemoryPins>,
}

/// Small frames, no settle delay, every file under a temp dir
pub(crate) fn test_config(dir: &TempDir) -> WatchpostConfig {
    let path = |name: &str| dir.path().join(name).to_string_lossy().into_owned();
    let mut config = WatchpostConfig::default();
    config.camera.resolution = (64, 48);
    config.camera.settle_time_ms = 0;
    config.camera.photo_dir = path("photos");
    config.camera.video_dir = path("videos");
    config.motion.test_dir = path("motion-test");
    config.motion.frame_interval_ms = 20;
    config.motion.min_area = 50.0;
    config.events.log_path = path("events.log");
    config.events.database_path = path("events.db");
    config.devices.state_file = path("device_state.json");
    config.devices.busy_wait_timeout_ms = 3_000;
    config.devices.input_poll_ms = 10;
    config.notification.recipients = vec!["ops@example.com".to_string()];
    config.system.barrier_timeout_secs = 5;
    config.system.drain_interval_ms = 20;
    config.system.drain_retries = 50;
    config.system.stop_timeout_secs = 2;
    config
}

pub(crate) fn harness_with(dir: TempDir, config: WatchpostConfig) -> Harness {
    let mail = Arc::new(RecordingTransport::new());
    let pins = Arc::new(MemoryPins::new());
    let engine = Engine::builder(config)
        .mailer(mail.clone())
        .pins(pins.clone())
        .build()
        .unwrap();
    Harness {
        dir,
        engine,
        mail,
        pins,
    }
}

/// Build a harness after letting the caller extend the default test config
pub(crate) fn harness(configure: impl FnOnce(&mut WatchpostConfig)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    configure(&mut config);
    harness_with(dir, config)
}

pub(crate) fn params(entries: &[(&str, ParamValue)]) -> ParamMap {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub(crate) fn device(id: &str, capability: &str, pin: i64) -> DeviceSpec {
    DeviceSpec {
        id: id.to_string(),
        capability: capability.to_string(),
        params: params(&[("pin", ParamValue::Int(pin))]),
        needs_calibration: None,
    }
}

/// Button that reads active when its line is high
pub(crate) fn button(id: &str, pin: i64) -> DeviceSpec {
    let mut spec = device(id, "Button", pin);
    spec.params
        .insert("active_state".to_string(), ParamValue::Bool(true));
    spec
}

pub(crate) fn action(id: &str, source: SourceKind, device: &str, method: &str) -> Action {
    Action {
        id: id.to_string(),
        source,
        device: device.to_string(),
        method: method.to_string(),
        params: ParamMap::new(),
        control: ParamMap::new(),
    }
}

pub(crate) fn trigger(
    id: &str,
    source: SourceKind,
    device: &str,
    event: &str,
    actions: &[&str],
) -> Trigger {
    Trigger {
        id: id.to_string(),
        source,
        device: device.to_string(),
        event: event.to_string(),
        params: ParamMap::new(),
        control: ParamMap::new(),
        active: true,
        actions: actions
            .iter()
            .map(|action| ActionBinding {
                action: action.to_string(),
                enabled: true,
            })
            .collect(),
    }
}

/// Wait until the event context is finalized
pub(crate) async fn wait_closed(engine: &Engine, event_id: &str) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while engine.contexts().contains(event_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("event was never finalized");
}

/// Poll `condition` every few milliseconds for up to five seconds
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
