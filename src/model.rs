//! Configuration-level domain types: triggers, actions and device specs.
//!
//! These are consumed read-only by the engine once triggers are armed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Origin of a trigger or target of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Camera,
    #[serde(rename = "gpio")]
    GeneralIo,
    #[serde(rename = "motion")]
    MotionSampler,
    Notification,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Camera => "Camera",
            SourceKind::GeneralIo => "GPIO",
            SourceKind::MotionSampler => "MotionDetector",
            SourceKind::Notification => "SMTP",
        }
    }

    /// Whether a trigger may originate from this kind
    pub fn is_trigger_source(&self) -> bool {
        matches!(
            self,
            SourceKind::Camera | SourceKind::GeneralIo | SourceKind::MotionSampler
        )
    }

    /// Whether an action may target this kind
    pub fn is_action_target(&self) -> bool {
        matches!(
            self,
            SourceKind::Camera | SourceKind::GeneralIo | SourceKind::Notification
        )
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dynamically typed parameter value as found in device, trigger and action maps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntTuple(Vec<i64>),
    FloatTuple(Vec<f64>),
    None,
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            ParamValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ParamValue::None)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
            ParamValue::IntTuple(v) => write!(f, "{:?}", v),
            ParamValue::FloatTuple(v) => write!(f, "{:?}", v),
            ParamValue::None => f.write_str("None"),
        }
    }
}

/// Named parameter map; ordered so that log output is stable
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Render a parameter map as `k=v, k=v`
pub fn format_params(params: &ParamMap) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn control_f64(control: &ParamMap, key: &str) -> Option<f64> {
    control.get(key).and_then(ParamValue::as_f64)
}

fn control_bool(control: &ParamMap, key: &str) -> Option<bool> {
    control.get(key).and_then(ParamValue::as_bool)
}

fn seconds(value: Option<f64>) -> Option<Duration> {
    value
        .filter(|s| *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
}

fn default_true() -> bool {
    true
}

/// Reference from a trigger to a reusable action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionBinding {
    pub action: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A configured binding of a device event to a reaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub source: SourceKind,
    pub device: String,
    pub event: String,
    /// Applied to the device before arming
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default)]
    pub control: ParamMap,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub actions: Vec<ActionBinding>,
}

impl Trigger {
    /// Minimum time between accepted firings, if declared
    pub fn bounce_time(&self) -> Option<Duration> {
        seconds(control_f64(&self.control, "bounce_time"))
    }

    /// Whether fired events are written to the event store
    pub fn log_event(&self) -> bool {
        control_bool(&self.control, "log_event").unwrap_or(true)
    }

    /// Enabled action ids in declaration order
    pub fn enabled_actions(&self) -> impl Iterator<Item = &str> {
        self.actions
            .iter()
            .filter(|binding| binding.enabled)
            .map(|binding| binding.action.as_str())
    }
}

/// A configured, reusable operation on a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub source: SourceKind,
    #[serde(default)]
    pub device: String,
    pub method: String,
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default)]
    pub control: ParamMap,
}

impl Action {
    /// Number of shots for a photo burst; at least one
    pub fn burst_count(&self) -> u32 {
        control_f64(&self.control, "burst_count")
            .map(|n| n.max(1.0) as u32)
            .unwrap_or(1)
    }

    pub fn burst_interval(&self) -> Duration {
        seconds(control_f64(&self.control, "burst_interval")).unwrap_or(Duration::ZERO)
    }

    /// On-duration for GPIO actions or recording length for video actions
    pub fn duration(&self) -> Option<Duration> {
        seconds(control_f64(&self.control, "duration"))
    }

    /// Whether to wait for a busy device instead of failing fast
    pub fn wait(&self) -> bool {
        control_bool(&self.control, "wait").unwrap_or(true)
    }

    pub fn attach_photo(&self) -> bool {
        control_bool(&self.control, "attach_photo").unwrap_or(false)
    }

    pub fn attach_video(&self) -> bool {
        control_bool(&self.control, "attach_video").unwrap_or(false)
    }
}

/// A configured hardware device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub id: String,
    /// Name of a catalogue capability type
    pub capability: String,
    #[serde(default)]
    pub params: ParamMap,
    /// Overrides the capability's calibration default
    #[serde(default)]
    pub needs_calibration: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_controls() {
        let trigger: Trigger = toml::from_str(
            r#"
            id = "T1"
            source = "gpio"
            device = "button"
            event = "when_pressed"
            control = { bounce_time = 0.5, log_event = false }
            actions = [{ action = "A1" }, { action = "A2", enabled = false }, { action = "A3" }]
            "#,
        )
        .unwrap();

        assert_eq!(trigger.source, SourceKind::GeneralIo);
        assert_eq!(trigger.bounce_time(), Some(Duration::from_millis(500)));
        assert!(!trigger.log_event());
        assert_eq!(trigger.enabled_actions().collect::<Vec<_>>(), vec!["A1", "A3"]);
    }

    #[test]
    fn test_out_of_range_seconds_are_ignored() {
        assert_eq!(seconds(Some(1e20)), None);
        assert_eq!(seconds(Some(f64::INFINITY)), None);
        assert_eq!(seconds(Some(f64::NAN)), None);
        assert_eq!(seconds(Some(-1.0)), None);
        assert_eq!(seconds(Some(0.25)), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_bounce_is_none() {
        let mut control = ParamMap::new();
        control.insert("bounce_time".into(), ParamValue::Int(0));
        let trigger = Trigger {
            id: "T".into(),
            source: SourceKind::MotionSampler,
            device: "cam".into(),
            event: "motion".into(),
            params: ParamMap::new(),
            control,
            active: true,
            actions: Vec::new(),
        };
        assert!(trigger.bounce_time().is_none());
    }

    #[test]
    fn test_action_controls() {
        let action: Action = toml::from_str(
            r#"
            id = "A1"
            source = "camera"
            method = "take_photo"
            control = { burst_count = 3, burst_interval = 1.0, wait = false }
            "#,
        )
        .unwrap();

        assert_eq!(action.burst_count(), 3);
        assert_eq!(action.burst_interval(), Duration::from_secs(1));
        assert!(!action.wait());
        assert!(action.duration().is_none());
    }

    #[test]
    fn test_param_value_untagged() {
        let params: ParamMap = toml::from_str(
            r#"
            pin = 17
            frequency = 2.5
            active_high = true
            name = "porch"
            pins = [5, 6, 13, 19]
            "#,
        )
        .unwrap();

        assert_eq!(params["pin"], ParamValue::Int(17));
        assert_eq!(params["frequency"], ParamValue::Float(2.5));
        assert_eq!(params["active_high"], ParamValue::Bool(true));
        assert_eq!(params["name"].as_str(), Some("porch"));
        assert_eq!(params["pins"], ParamValue::IntTuple(vec![5, 6, 13, 19]));
    }
}
