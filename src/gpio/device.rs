use super::backend::{PinBackend, PinMode};
use super::operations::{operations_for, Operation};
use crate::catalogue::{CapabilityType, DeviceRole};
use crate::error::DeviceError;
use crate::model::{DeviceSpec, ParamMap, ParamValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mutable runtime state of a GPIO device
#[derive(Debug, Clone, Default)]
pub(crate) struct GpioState {
    /// Logical value: 0/1 for digital outputs, PWM duty, servo position or stepper angle
    pub value: f64,
    /// Index into the stepper half-step sequence
    pub phase: usize,
    /// Last observed input activity, for edge detection
    pub last_active: Option<bool>,
    pub closed: bool,
}

/// A live handle to a GPIO device with its resolved operation table
pub struct GpioDevice {
    id: String,
    capability: &'static str,
    role: DeviceRole,
    events: Vec<&'static str>,
    pub(crate) pins: Vec<u32>,
    pub(crate) params: ParamMap,
    pub(crate) backend: Arc<dyn PinBackend>,
    pub(crate) state: Mutex<GpioState>,
    operations: HashMap<&'static str, Operation>,
}

impl std::fmt::Debug for GpioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioDevice")
            .field("id", &self.id)
            .field("capability", &self.capability)
            .field("pins", &self.pins)
            .finish()
    }
}

fn pins_from_params(spec: &DeviceSpec) -> Result<Vec<u32>, DeviceError> {
    let to_pin = |param: &str, pin: i64| {
        u32::try_from(pin).map_err(|_| DeviceError::InvalidParameter {
            device: spec.id.clone(),
            param: param.to_string(),
            details: format!("{} is not a valid pin number", pin),
        })
    };

    if let Some(pin) = spec.params.get("pin").and_then(ParamValue::as_i64) {
        return Ok(vec![to_pin("pin", pin)?]);
    }
    match spec.params.get("pins") {
        Some(ParamValue::IntTuple(pins)) => pins.iter().map(|p| to_pin("pins", *p)).collect(),
        _ => Ok(Vec::new()),
    }
}

impl GpioDevice {
    /// Instantiate a device, claiming its pins and applying the initial value
    pub fn open(
        spec: &DeviceSpec,
        capability: &CapabilityType,
        backend: Arc<dyn PinBackend>,
        restored_value: Option<f64>,
    ) -> Result<Self, DeviceError> {
        let mut pins = pins_from_params(spec)?;
        if pins.is_empty() && capability.name == "StepperMotor" {
            pins = vec![5, 6, 13, 19];
        }
        if pins.is_empty() {
            return Err(DeviceError::InvalidParameter {
                device: spec.id.clone(),
                param: "pin".to_string(),
                details: "no pin configured".to_string(),
            });
        }

        let mode = match capability.role {
            DeviceRole::Input => PinMode::Input,
            _ => PinMode::Output,
        };

        let mut claimed = Vec::with_capacity(pins.len());
        for pin in &pins {
            if let Err(e) = backend.claim(*pin, mode) {
                for pin in claimed {
                    backend.release(pin);
                }
                return Err(e);
            }
            claimed.push(*pin);
        }

        let device = Self {
            id: spec.id.clone(),
            capability: capability.name,
            role: capability.role,
            events: capability.events.clone(),
            pins,
            params: spec.params.clone(),
            backend,
            state: Mutex::new(GpioState::default()),
            operations: operations_for(capability.name),
        };

        if let Some(value) = restored_value {
            info!("Restored {} to persisted value {}", device.id, value);
            device.state.lock().value = value;
        } else if device.role == DeviceRole::Output {
            device.apply_initial_value()?;
        }

        debug!(
            "Opened {} device {} on pins {:?} via {} backend",
            device.capability,
            device.id,
            device.pins,
            device.backend.name()
        );
        Ok(device)
    }

    fn apply_initial_value(&self) -> Result<(), DeviceError> {
        match self.params.get("initial_value") {
            Some(value) if !value.is_none() => self.set_property("value", value),
            _ => Ok(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capability(&self) -> &'static str {
        self.capability
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Current logical value
    pub fn value(&self) -> f64 {
        self.state.lock().value
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub(crate) fn param_f64(&self, name: &str) -> Option<f64> {
        self.params.get(name).and_then(ParamValue::as_f64)
    }

    pub(crate) fn param_bool(&self, name: &str) -> Option<bool> {
        self.params.get(name).and_then(ParamValue::as_bool)
    }

    fn ensure_open(&self, operation: &str) -> Result<(), DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::Operation {
                device: self.id.clone(),
                operation: operation.to_string(),
                details: "device is closed".to_string(),
            });
        }
        Ok(())
    }

    /// Invoke an action target: a method with parameters or a property assignment
    pub fn invoke(&self, target: &str, params: &ParamMap) -> Result<(), DeviceError> {
        self.ensure_open(target)?;
        match self.operations.get(target) {
            Some(Operation::Method(method)) => method(self, params),
            Some(Operation::Property(setter)) => {
                let value = params.get("value").ok_or_else(|| DeviceError::InvalidParameter {
                    device: self.id.clone(),
                    param: "value".to_string(),
                    details: format!("assignment to '{}' needs a value", target),
                })?;
                setter(self, value)
            }
            None => Err(DeviceError::UnknownTarget {
                device: self.id.clone(),
                target: target.to_string(),
            }),
        }
    }

    /// Assign a property directly
    pub fn set_property(&self, target: &str, value: &ParamValue) -> Result<(), DeviceError> {
        self.ensure_open(target)?;
        match self.operations.get(target) {
            Some(Operation::Property(setter)) => setter(self, value),
            _ => Err(DeviceError::UnknownTarget {
                device: self.id.clone(),
                target: target.to_string(),
            }),
        }
    }

    /// Write a logical level to the first pin honouring `active_high`
    pub(crate) fn write_level(&self, level: f64) -> Result<(), DeviceError> {
        let active_high = self.param_bool("active_high").unwrap_or(true);
        let physical = if active_high { level } else { 1.0 - level };
        self.backend.write(self.pins[0], physical)?;
        self.state.lock().value = level;
        Ok(())
    }

    /// Whether the input line is currently in its active state
    fn input_active(&self) -> Result<bool, DeviceError> {
        let raw = self.backend.read(self.pins[0])? >= 0.5;
        let active_high = match self.params.get("active_state").and_then(ParamValue::as_bool) {
            Some(active_state) => active_state,
            // pull-up inputs read low when activated
            None => !self.param_bool("pull_up").unwrap_or(true),
        };
        Ok(raw == active_high)
    }

    /// Sample an input device and report an edge as the corresponding event name.
    ///
    /// The first sample establishes the baseline and never reports an event.
    pub fn poll_event(&self) -> Result<Option<&'static str>, DeviceError> {
        if self.role != DeviceRole::Input || self.events.len() < 2 {
            return Ok(None);
        }
        self.ensure_open("poll")?;

        let active = self.input_active()?;
        let mut state = self.state.lock();
        let previous = state.last_active.replace(active);
        state.value = if active { 1.0 } else { 0.0 };

        Ok(match previous {
            Some(previous) if previous != active => {
                Some(if active { self.events[0] } else { self.events[1] })
            }
            _ => None,
        })
    }

    /// Drive outputs to rest and release every claimed line
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        if self.role == DeviceRole::Output {
            for pin in &self.pins {
                if let Err(e) = self.backend.write(*pin, 0.0) {
                    warn!("Failed to reset pin {} of {} on close: {}", pin, self.id, e);
                }
            }
        }
        for pin in &self.pins {
            self.backend.release(*pin);
        }
        info!("Closed device {}", self.id);
    }
}

impl Drop for GpioDevice {
    fn drop(&mut self) {
        self.close();
    }
}
