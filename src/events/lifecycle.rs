use crate::catalogue::{validate_trigger_params, CapabilityType, DeviceRole, CAMERA_CAPABILITY, MAILER_CAPABILITY};
use crate::engine::Engine;
use crate::error::{DeviceError, Result, WatchpostError};
use crate::model::{Action, SourceKind, Trigger};
use crate::registry::DeviceRegistry;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of arming the configured triggers
#[derive(Debug, Default, Clone)]
pub struct ArmReport {
    pub armed: Vec<String>,
    /// Trigger id and reason
    pub rejected: Vec<(String, String)>,
}

/// Binds armed triggers to their devices and drains in-flight work on the way out
pub struct TriggerLifecycle {
    engine: Arc<Engine>,
}

impl TriggerLifecycle {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    fn capability_of<'a>(
        &'a self,
        source: SourceKind,
        device_id: &str,
    ) -> Result<&'a CapabilityType> {
        let engine = &self.engine;
        let catalogue = engine.catalogue();
        let service = |name: &str| {
            catalogue
                .get(name)
                .ok_or_else(|| WatchpostError::configuration(format!("capability {} missing", name)))
        };

        match source {
            SourceKind::Camera | SourceKind::MotionSampler => {
                if device_id != engine.camera_id() {
                    return Err(DeviceError::NotConfigured {
                        device: device_id.to_string(),
                    }
                    .into());
                }
                service(CAMERA_CAPABILITY)
            }
            SourceKind::Notification => {
                if !device_id.is_empty() && device_id != engine.config().notification.id {
                    return Err(DeviceError::NotConfigured {
                        device: device_id.to_string(),
                    }
                    .into());
                }
                service(MAILER_CAPABILITY)
            }
            SourceKind::GeneralIo => {
                let spec = engine.registry().device_spec(device_id).ok_or_else(|| {
                    DeviceError::NotConfigured {
                        device: device_id.to_string(),
                    }
                })?;
                Ok(catalogue.validate_device(spec)?)
            }
        }
    }

    fn validate_action(&self, action: &Action) -> Result<()> {
        if !action.source.is_action_target() {
            return Err(WatchpostError::configuration(format!(
                "action {} targets {}, which accepts no actions",
                action.id, action.source
            )));
        }
        let device = match action.source {
            SourceKind::Camera if action.device.is_empty() => self.engine.camera_id(),
            _ => action.device.as_str(),
        };
        let capability = self.capability_of(action.source, device)?;
        self.engine.catalogue().validate_action(action, capability)?;
        Ok(())
    }

    /// Validate one trigger against the catalogue and bind it to its device
    pub fn arm(&self, trigger: &Trigger) -> Result<()> {
        if !trigger.source.is_trigger_source() {
            return Err(WatchpostError::configuration(format!(
                "trigger {} cannot originate from {}",
                trigger.id, trigger.source
            )));
        }

        let capability = self.capability_of(trigger.source, &trigger.device)?;
        if !capability.emits(&trigger.event) {
            return Err(WatchpostError::configuration(format!(
                "{} ({}) does not emit '{}'",
                trigger.device, capability.name, trigger.event
            )));
        }
        validate_trigger_params(&trigger.id, capability, &trigger.params)?;

        for action_id in trigger.enabled_actions() {
            let action = self.engine.action(action_id).ok_or_else(|| {
                WatchpostError::configuration(format!(
                    "trigger {} references unknown action '{}'",
                    trigger.id, action_id
                ))
            })?;
            self.validate_action(action)?;
        }

        // instantiates the device, so trigger parameters are in effect once armed
        self.engine
            .registry()
            .bind_event(trigger.source, &trigger.device, &trigger.event)?;
        self.engine.bind(
            (trigger.source, trigger.device.clone(), trigger.event.clone()),
            &trigger.id,
        );

        info!(
            "Armed trigger {} on {} {} {}",
            trigger.id, trigger.source, trigger.device, trigger.event
        );
        Ok(())
    }

    /// Arm every active trigger; rejected triggers are reported, never armed
    pub fn arm_all(&self) -> ArmReport {
        let mut report = ArmReport::default();
        for trigger in self.engine.triggers() {
            if !trigger.active {
                debug!("Trigger {} inactive, not arming", trigger.id);
                continue;
            }
            match self.arm(trigger) {
                Ok(()) => report.armed.push(trigger.id.clone()),
                Err(e) => {
                    error!("Trigger {} rejected: {}", trigger.id, e);
                    self.engine
                        .journal()
                        .record("Error", &format!("trigger {} rejected: {}", trigger.id, e));
                    self.engine.status().post_error(
                        "Trigger",
                        format!("trigger {} rejected", trigger.id),
                        Some(e.to_string()),
                    );
                    report.rejected.push((trigger.id.clone(), e.to_string()));
                }
            }
        }
        report
    }

    /// Remove every binding
    pub fn disarm_all(&self) {
        for (key, trigger_id) in self.engine.bindings() {
            let (source, device, event) = &key;
            self.engine.registry().unbind_event(*source, device, event);
            self.engine.unbind(&key);
            debug!("Disarmed trigger {}", trigger_id);
        }
    }

    /// Wait for in-flight action workers, abandoning them after the configured retries
    pub async fn drain(&self) -> bool {
        let system = &self.engine.config().system;
        let workers = self.engine.workers();
        for attempt in 1..=system.drain_retries {
            if workers.wait_empty(system.drain_interval()).await {
                return true;
            }
            debug!(
                "Drain attempt {}/{}: {} worker(s) running",
                attempt,
                system.drain_retries,
                workers.len()
            );
        }
        if workers.is_empty() {
            return true;
        }
        warn!(
            "Abandoning {} action worker(s) still running after drain",
            workers.len()
        );
        false
    }

    /// Input devices with at least one armed GPIO trigger
    fn watched_inputs(&self) -> BTreeSet<String> {
        let registry = self.engine.registry();
        self.engine
            .bindings()
            .into_iter()
            .filter(|((source, _, _), _)| *source == SourceKind::GeneralIo)
            .map(|((_, device, _), _)| device)
            .filter(|device| is_input(registry, device))
            .collect()
    }

    fn spawn_watcher(&self, device_id: String, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let handle = match engine
                .registry()
                .acquire(SourceKind::GeneralIo, &device_id, false)
            {
                Ok((_, handle)) => handle,
                Err(e) => {
                    error!("Input watcher for {} not started: {}", device_id, e);
                    return;
                }
            };
            let Some(device) = handle.as_gpio().cloned() else {
                return;
            };

            let mut ticker = tokio::time::interval(engine.config().devices.input_poll_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            debug!("Watching input {}", device_id);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match device.poll_event() {
                            Ok(Some(event)) => {
                                debug!("{} reported {}", device_id, event);
                                if let Err(e) = engine.stimulate(SourceKind::GeneralIo, &device_id, event) {
                                    warn!("Stimulus from {} dropped: {}", device_id, e);
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!("Polling {} failed: {}", device_id, e);
                            }
                        }
                    }
                }
            }
            debug!("Input watcher for {} stopped", device_id);
        })
    }

    /// Arm the configured triggers and keep watching inputs until cancelled.
    ///
    /// The returned task disarms every trigger and drains in-flight workers
    /// once `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> (ArmReport, JoinHandle<bool>) {
        let report = self.arm_all();
        info!(
            "{} trigger(s) armed, {} rejected",
            report.armed.len(),
            report.rejected.len()
        );

        let watchers_cancel = cancel.child_token();
        let watchers: Vec<JoinHandle<()>> = self
            .watched_inputs()
            .into_iter()
            .map(|device| self.spawn_watcher(device, watchers_cancel.clone()))
            .collect();

        let task = tokio::spawn(async move {
            cancel.cancelled().await;
            info!("Trigger lifecycle stopping");

            watchers_cancel.cancel();
            for result in join_all(watchers).await {
                if let Err(e) = result {
                    warn!("Input watcher ended abnormally: {}", e);
                }
            }

            self.disarm_all();
            self.drain().await
        });
        (report, task)
    }
}

fn is_input(registry: &DeviceRegistry, device_id: &str) -> bool {
    registry
        .device_spec(device_id)
        .and_then(|spec| registry.catalogue().get(&spec.capability))
        .map(|capability| capability.role == DeviceRole::Input)
        .unwrap_or(false)
}
