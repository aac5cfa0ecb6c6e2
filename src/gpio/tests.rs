use super::*;
use crate::catalogue::Catalogue;
use crate::model::{DeviceSpec, ParamMap, ParamValue};
use std::sync::Arc;

fn spec(id: &str, capability: &str, params: &[(&str, ParamValue)]) -> DeviceSpec {
    DeviceSpec {
        id: id.to_string(),
        capability: capability.to_string(),
        params: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        needs_calibration: None,
    }
}

fn open(pins: &Arc<MemoryPins>, spec: &DeviceSpec) -> GpioDevice {
    let catalogue = Catalogue::builtin();
    let capability = catalogue.validate_device(spec).unwrap();
    let backend: Arc<dyn PinBackend> = pins.clone();
    GpioDevice::open(spec, capability, backend, None).unwrap()
}

#[test]
fn test_led_methods_and_property() {
    let pins = Arc::new(MemoryPins::new());
    let led = open(&pins, &spec("led", "LED", &[("pin", ParamValue::Int(17))]));

    led.invoke("on", &ParamMap::new()).unwrap();
    assert_eq!(pins.level(17), Some(1.0));
    assert_eq!(led.value(), 1.0);

    led.invoke("toggle", &ParamMap::new()).unwrap();
    assert_eq!(pins.level(17), Some(0.0));

    let mut params = ParamMap::new();
    params.insert("value".to_string(), ParamValue::Bool(true));
    led.invoke("value", &params).unwrap();
    assert_eq!(pins.level(17), Some(1.0));
}

#[test]
fn test_active_low_output_inverts_pin() {
    let pins = Arc::new(MemoryPins::new());
    let led = open(
        &pins,
        &spec(
            "led",
            "LED",
            &[
                ("pin", ParamValue::Int(22)),
                ("active_high", ParamValue::Bool(false)),
            ],
        ),
    );

    led.invoke("on", &ParamMap::new()).unwrap();
    assert_eq!(pins.level(22), Some(0.0));
    assert_eq!(led.value(), 1.0);
}

#[test]
fn test_blink_sequence() {
    let pins = Arc::new(MemoryPins::new());
    let buzzer = open(&pins, &spec("bz", "Buzzer", &[("pin", ParamValue::Int(5))]));

    let mut params = ParamMap::new();
    params.insert("on_time".to_string(), ParamValue::Float(0.0));
    params.insert("off_time".to_string(), ParamValue::Float(0.0));
    params.insert("n".to_string(), ParamValue::Int(2));
    buzzer.invoke("beep", &params).unwrap();

    let levels: Vec<f64> = pins
        .history()
        .into_iter()
        .filter(|(pin, _)| *pin == 5)
        .map(|(_, level)| level)
        .collect();
    assert_eq!(levels, vec![1.0, 0.0, 1.0, 0.0]);
}

#[test]
fn test_unknown_target_is_an_error() {
    let pins = Arc::new(MemoryPins::new());
    let led = open(&pins, &spec("led", "LED", &[("pin", ParamValue::Int(17))]));
    assert!(led.invoke("explode", &ParamMap::new()).is_err());
}

#[test]
fn test_button_edges_become_events() {
    let pins = Arc::new(MemoryPins::new());
    // pull-up default: pressed pulls the line low
    pins.set_input(27, 1.0);
    let button = open(&pins, &spec("btn", "Button", &[("pin", ParamValue::Int(27))]));

    assert_eq!(button.poll_event().unwrap(), None);
    pins.set_input(27, 0.0);
    assert_eq!(button.poll_event().unwrap(), Some("when_pressed"));
    assert_eq!(button.poll_event().unwrap(), None);
    pins.set_input(27, 1.0);
    assert_eq!(button.poll_event().unwrap(), Some("when_released"));
}

#[test]
fn test_stepper_tracks_angle() {
    let pins = Arc::new(MemoryPins::new());
    let stepper = open(
        &pins,
        &spec(
            "stepper",
            "StepperMotor",
            &[
                ("pins", ParamValue::IntTuple(vec![5, 6, 13, 19])),
                ("stride_angle", ParamValue::Float(1.0)),
                ("gpio_delay", ParamValue::Float(0.0)),
            ],
        ),
    );

    let mut params = ParamMap::new();
    params.insert("angle".to_string(), ParamValue::Float(45.0));
    stepper.invoke("rotate", &params).unwrap();
    assert!((stepper.value() - 45.0).abs() < 1e-9);

    params.insert("angle".to_string(), ParamValue::Float(10.0));
    stepper.invoke("rotate_to", &params).unwrap();
    assert!((stepper.value() - 10.0).abs() < 1e-9);

    stepper.invoke("stop", &ParamMap::new()).unwrap();
    for pin in [5, 6, 13, 19] {
        assert_eq!(pins.level(pin), Some(0.0));
    }
}

#[test]
fn test_close_releases_pins() {
    let pins = Arc::new(MemoryPins::new());
    let led = open(&pins, &spec("led", "LED", &[("pin", ParamValue::Int(17))]));
    assert!(pins.is_claimed(17));

    led.close();
    assert!(!pins.is_claimed(17));
    assert!(led.invoke("on", &ParamMap::new()).is_err());
}

#[test]
fn test_pin_conflict_rejected() {
    let pins = Arc::new(MemoryPins::new());
    let _first = open(&pins, &spec("a", "LED", &[("pin", ParamValue::Int(17))]));

    let catalogue = Catalogue::builtin();
    let second = spec("b", "LED", &[("pin", ParamValue::Int(17))]);
    let capability = catalogue.validate_device(&second).unwrap();
    let backend: Arc<dyn PinBackend> = pins.clone();
    assert!(GpioDevice::open(&second, capability, backend, None).is_err());
}

#[test]
fn test_negative_pin_rejected() {
    let pins = Arc::new(MemoryPins::new());
    let catalogue = Catalogue::builtin();
    let led = spec("led", "LED", &[("pin", ParamValue::Int(-1))]);
    let capability = catalogue.validate_device(&led).unwrap();
    let backend: Arc<dyn PinBackend> = pins.clone();

    let err = GpioDevice::open(&led, capability, backend, None).unwrap_err();
    assert!(matches!(
        err,
        crate::error::DeviceError::InvalidParameter { ref param, .. } if param == "pin"
    ));
    // nothing wrapped around to a high pin number
    assert!(!pins.is_claimed(u32::MAX));
}
