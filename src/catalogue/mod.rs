//! Closed catalogue of device capability types.
//!
//! Each capability type declares its constructor parameters, the events it can
//! emit and the targets (methods or properties) an action may invoke on it.

mod builtin;
mod schema;

pub use schema::{validate_overlay, validate_params, ParamSpec, ParamType};

use crate::error::DeviceError;
use crate::model::{Action, DeviceSpec, ParamMap};
use serde::Serialize;
use std::collections::BTreeMap;

/// Whether a device is observed for events or driven by actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Input,
    Output,
    Service,
}

/// How an action target is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Invoked with the action's parameter map
    Method,
    /// Assigned from the action's `value` parameter
    Property,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSpec {
    pub name: &'static str,
    pub kind: TargetKind,
    pub params: Vec<ParamSpec>,
    pub controls: Vec<ParamSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityType {
    pub name: &'static str,
    pub role: DeviceRole,
    pub params: Vec<ParamSpec>,
    pub events: Vec<&'static str>,
    pub targets: Vec<TargetSpec>,
    pub needs_calibration: bool,
    pub tracks_state: bool,
}

impl CapabilityType {
    pub fn target(&self, name: &str) -> Option<&TargetSpec> {
        self.targets.iter().find(|target| target.name == name)
    }

    pub fn emits(&self, event: &str) -> bool {
        self.events.iter().any(|e| *e == event)
    }
}

/// Registry of all known capability types
#[derive(Debug, Clone)]
pub struct Catalogue {
    types: BTreeMap<&'static str, CapabilityType>,
}

/// Capability name used for the camera service
pub const CAMERA_CAPABILITY: &str = "Camera";
/// Capability name used for the mail transport
pub const MAILER_CAPABILITY: &str = "Mailer";

impl Catalogue {
    /// The built-in closed catalogue
    pub fn builtin() -> Self {
        let types = builtin::capability_types()
            .into_iter()
            .map(|capability| (capability.name, capability))
            .collect();
        Self { types }
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityType> {
        self.types.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.keys().copied()
    }

    /// Look up the capability type of a device, rejecting unknown names
    pub fn resolve(&self, device: &DeviceSpec) -> Result<&CapabilityType, DeviceError> {
        self.get(&device.capability)
            .ok_or_else(|| DeviceError::UnknownCapability {
                device: device.id.clone(),
                capability: device.capability.clone(),
            })
    }

    /// Validate a device's constructor parameters against its capability type
    pub fn validate_device(&self, device: &DeviceSpec) -> Result<&CapabilityType, DeviceError> {
        let capability = self.resolve(device)?;
        validate_params(&device.id, &capability.params, &device.params)?;
        Ok(capability)
    }

    /// Validate an action's method, parameters and controls against a capability type
    pub fn validate_action(
        &self,
        action: &Action,
        capability: &CapabilityType,
    ) -> Result<(), DeviceError> {
        let target = capability
            .target(&action.method)
            .ok_or_else(|| DeviceError::UnknownTarget {
                device: action.device.clone(),
                target: action.method.clone(),
            })?;
        validate_params(&action.id, &target.params, &action.params)?;
        validate_params(&action.id, &target.controls, &action.control)?;
        Ok(())
    }

    /// Effective calibration flag for a device
    pub fn needs_calibration(&self, device: &DeviceSpec) -> bool {
        device.needs_calibration.unwrap_or_else(|| {
            self.get(&device.capability)
                .map(|c| c.needs_calibration)
                .unwrap_or(false)
        })
    }
}

/// Validate a trigger's arming parameters against the capability's constructor schema.
///
/// They overlay the device's own parameters, so only the keys given are checked.
pub fn validate_trigger_params(
    owner: &str,
    capability: &CapabilityType,
    params: &ParamMap,
) -> Result<(), DeviceError> {
    validate_overlay(owner, &capability.params, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParamValue, SourceKind};

    fn device(capability: &str, params: &[(&str, ParamValue)]) -> DeviceSpec {
        DeviceSpec {
            id: "dev".to_string(),
            capability: capability.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            needs_calibration: None,
        }
    }

    #[test]
    fn test_builtin_contains_gpio_and_services() {
        let catalogue = Catalogue::builtin();
        for name in ["LED", "Button", "MotionSensor", "StepperMotor", "Camera", "Mailer"] {
            assert!(catalogue.get(name).is_some(), "missing {}", name);
        }
        assert!(catalogue.get("Button").unwrap().emits("when_pressed"));
        assert_eq!(catalogue.get("Button").unwrap().role, DeviceRole::Input);
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let catalogue = Catalogue::builtin();
        let err = catalogue
            .validate_device(&device("FluxCapacitor", &[]))
            .unwrap_err();
        assert!(matches!(err, DeviceError::UnknownCapability { .. }));
    }

    #[test]
    fn test_validate_action_target() {
        let catalogue = Catalogue::builtin();
        let led = catalogue
            .validate_device(&device("LED", &[("pin", ParamValue::Int(17))]))
            .unwrap();

        let mut action = Action {
            id: "A1".to_string(),
            source: SourceKind::GeneralIo,
            device: "dev".to_string(),
            method: "on".to_string(),
            params: ParamMap::new(),
            control: ParamMap::new(),
        };
        action
            .control
            .insert("duration".to_string(), ParamValue::Float(1.5));
        assert!(catalogue.validate_action(&action, led).is_ok());

        action.method = "explode".to_string();
        assert!(matches!(
            catalogue.validate_action(&action, led),
            Err(DeviceError::UnknownTarget { .. })
        ));
    }

    #[test]
    fn test_trigger_params_overlay_device_params() {
        let catalogue = Catalogue::builtin();
        let button = catalogue.get("Button").unwrap();

        // the pin comes from the device spec
        assert!(validate_trigger_params("doorbell", button, &ParamMap::new()).is_ok());

        let mut params = ParamMap::new();
        params.insert("bounce_time".to_string(), ParamValue::Float(0.2));
        assert!(validate_trigger_params("doorbell", button, &params).is_ok());

        params.insert("pin".to_string(), ParamValue::Str("GPIO4".to_string()));
        assert!(validate_trigger_params("doorbell", button, &params).is_err());

        let mut unknown = ParamMap::new();
        unknown.insert("colour".to_string(), ParamValue::Int(1));
        assert!(validate_trigger_params("doorbell", button, &unknown).is_err());
    }

    #[test]
    fn test_calibration_default_and_override() {
        let catalogue = Catalogue::builtin();
        let mut stepper = device("StepperMotor", &[]);
        assert!(catalogue.needs_calibration(&stepper));
        stepper.needs_calibration = Some(false);
        assert!(!catalogue.needs_calibration(&stepper));
        assert!(!catalogue.needs_calibration(&device("LED", &[])));
    }
}
