use crate::error::Result;
use crate::model::Trigger;
use crate::registry::DeviceRegistry;
use std::sync::Arc;
use tracing::debug;

/// Suppresses trigger firings that arrive within the trigger's bounce time.
///
/// Uses the device's registry last-access timestamp, so a busy acquisition of
/// the same device also restarts the bounce window.
pub struct DebounceGate {
    registry: Arc<DeviceRegistry>,
}

impl DebounceGate {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// True when the firing must be dropped; triggers without a bounce time never bounce
    pub fn is_bouncing(&self, trigger: &Trigger) -> Result<bool> {
        let Some(bounce) = trigger.bounce_time() else {
            return Ok(false);
        };

        let bouncing = self
            .registry
            .check_bounce(trigger.source, &trigger.device, bounce)?;
        if bouncing {
            debug!(
                "Trigger {} suppressed: {} fired within {:?}",
                trigger.id, trigger.device, bounce
            );
        }
        Ok(bouncing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::Catalogue;
    use crate::gpio::{DeviceStateStore, MemoryPins};
    use crate::model::{DeviceSpec, ParamMap, ParamValue, SourceKind};
    use std::time::Duration;

    fn setup() -> (Arc<DeviceRegistry>, DebounceGate) {
        let mut params = ParamMap::new();
        params.insert("pin".to_string(), ParamValue::Int(4));
        let button = DeviceSpec {
            id: "button".to_string(),
            capability: "Button".to_string(),
            params,
            needs_calibration: None,
        };
        let registry = Arc::new(
            DeviceRegistry::new(
                Arc::new(Catalogue::builtin()),
                &[button],
                Arc::new(MemoryPins::new()),
                Arc::new(DeviceStateStore::in_memory()),
            )
            .unwrap(),
        );
        let gate = DebounceGate::new(Arc::clone(&registry));
        (registry, gate)
    }

    fn trigger(bounce: Option<f64>) -> Trigger {
        let mut control = ParamMap::new();
        if let Some(bounce) = bounce {
            control.insert("bounce_time".to_string(), ParamValue::Float(bounce));
        }
        Trigger {
            id: "T".to_string(),
            source: SourceKind::GeneralIo,
            device: "button".to_string(),
            event: "when_pressed".to_string(),
            params: ParamMap::new(),
            control,
            active: true,
            actions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_no_bounce_time_never_bounces() {
        let (registry, gate) = setup();
        let trigger = trigger(None);
        for _ in 0..3 {
            assert!(!gate.is_bouncing(&trigger).unwrap());
        }
        // no bookkeeping for triggers without a bounce time
        assert!(registry
            .last_access(SourceKind::GeneralIo, "button")
            .is_none());
    }

    #[tokio::test]
    async fn test_second_firing_within_window_bounces() {
        let (_registry, gate) = setup();
        let trigger = trigger(Some(0.2));

        assert!(!gate.is_bouncing(&trigger).unwrap());
        assert!(gate.is_bouncing(&trigger).unwrap());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!gate.is_bouncing(&trigger).unwrap());
    }

    #[tokio::test]
    async fn test_busy_acquire_restarts_window() {
        let (registry, gate) = setup();
        let trigger = trigger(Some(0.2));

        assert!(!gate.is_bouncing(&trigger).unwrap());
        tokio::time::sleep(Duration::from_millis(250)).await;

        let (acquired, _) = registry
            .acquire(SourceKind::GeneralIo, "button", true)
            .unwrap();
        assert!(acquired);
        registry.release(SourceKind::GeneralIo, "button");

        assert!(gate.is_bouncing(&trigger).unwrap());
    }
}
