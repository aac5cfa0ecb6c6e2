//! Per-capability operation tables.
//!
//! Each capability type maps its target names to plain function pointers once,
//! at device instantiation, instead of resolving names on every call.

use super::device::GpioDevice;
use crate::error::DeviceError;
use crate::model::{ParamMap, ParamValue};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

pub(crate) type MethodFn = fn(&GpioDevice, &ParamMap) -> Result<(), DeviceError>;
pub(crate) type SetterFn = fn(&GpioDevice, &ParamValue) -> Result<(), DeviceError>;

#[derive(Clone, Copy)]
pub(crate) enum Operation {
    Method(MethodFn),
    Property(SetterFn),
}

pub(crate) fn operations_for(capability: &str) -> HashMap<&'static str, Operation> {
    let mut ops: HashMap<&'static str, Operation> = HashMap::new();
    match capability {
        "LED" | "DigitalOutputDevice" => {
            ops.insert("on", Operation::Method(on));
            ops.insert("off", Operation::Method(off));
            ops.insert("toggle", Operation::Method(toggle));
            ops.insert("blink", Operation::Method(blink));
            ops.insert("value", Operation::Property(set_digital));
        }
        "Buzzer" => {
            ops.insert("on", Operation::Method(on));
            ops.insert("off", Operation::Method(off));
            ops.insert("toggle", Operation::Method(toggle));
            ops.insert("beep", Operation::Method(blink));
            ops.insert("value", Operation::Property(set_digital));
        }
        "PWMLED" => {
            ops.insert("on", Operation::Method(on));
            ops.insert("off", Operation::Method(off));
            ops.insert("toggle", Operation::Method(toggle));
            ops.insert("blink", Operation::Method(blink));
            ops.insert("pulse", Operation::Method(pulse));
            ops.insert("value", Operation::Property(set_pwm));
        }
        "Servo" => {
            ops.insert("min", Operation::Method(servo_min));
            ops.insert("mid", Operation::Method(servo_mid));
            ops.insert("max", Operation::Method(servo_max));
            ops.insert("detach", Operation::Method(servo_detach));
            ops.insert("value", Operation::Property(set_servo));
        }
        "StepperMotor" => {
            ops.insert("step", Operation::Method(stepper_step));
            ops.insert("rotate", Operation::Method(stepper_rotate));
            ops.insert("rotate_to", Operation::Method(stepper_rotate_to));
            ops.insert("swing", Operation::Method(stepper_swing));
            ops.insert("stop", Operation::Method(stepper_stop));
        }
        _ => {}
    }
    ops
}

fn param_f64(device: &GpioDevice, params: &ParamMap, name: &str) -> Result<f64, DeviceError> {
    params
        .get(name)
        .and_then(ParamValue::as_f64)
        .ok_or_else(|| DeviceError::InvalidParameter {
            device: device.id().to_string(),
            param: name.to_string(),
            details: "numeric value required".to_string(),
        })
}

fn opt_f64(params: &ParamMap, name: &str, default: f64) -> f64 {
    params
        .get(name)
        .and_then(ParamValue::as_f64)
        .unwrap_or(default)
}

fn sleep_secs(seconds: f64) {
    if seconds > 0.0 {
        thread::sleep(Duration::from_secs_f64(seconds));
    }
}

fn on(device: &GpioDevice, _params: &ParamMap) -> Result<(), DeviceError> {
    device.write_level(1.0)
}

fn off(device: &GpioDevice, _params: &ParamMap) -> Result<(), DeviceError> {
    device.write_level(0.0)
}

fn toggle(device: &GpioDevice, _params: &ParamMap) -> Result<(), DeviceError> {
    let next = if device.value() > 0.0 { 0.0 } else { 1.0 };
    device.write_level(next)
}

/// Blink (or beep) `n` times, blocking for the whole sequence
fn blink(device: &GpioDevice, params: &ParamMap) -> Result<(), DeviceError> {
    let on_time = opt_f64(params, "on_time", 1.0);
    let off_time = opt_f64(params, "off_time", 1.0);
    let n = opt_f64(params, "n", 1.0).max(1.0) as u32;

    for _ in 0..n {
        device.write_level(1.0)?;
        sleep_secs(on_time);
        device.write_level(0.0)?;
        sleep_secs(off_time);
    }
    Ok(())
}

const PULSE_STEPS: u32 = 25;

fn pulse(device: &GpioDevice, params: &ParamMap) -> Result<(), DeviceError> {
    let fade_in = opt_f64(params, "fade_in_time", 1.0);
    let fade_out = opt_f64(params, "fade_out_time", 1.0);
    let n = opt_f64(params, "n", 1.0).max(1.0) as u32;

    for _ in 0..n {
        for step in 0..=PULSE_STEPS {
            device.write_level(step as f64 / PULSE_STEPS as f64)?;
            sleep_secs(fade_in / PULSE_STEPS as f64);
        }
        for step in (0..=PULSE_STEPS).rev() {
            device.write_level(step as f64 / PULSE_STEPS as f64)?;
            sleep_secs(fade_out / PULSE_STEPS as f64);
        }
    }
    Ok(())
}

fn set_digital(device: &GpioDevice, value: &ParamValue) -> Result<(), DeviceError> {
    let level = value.as_bool().ok_or_else(|| DeviceError::InvalidParameter {
        device: device.id().to_string(),
        param: "value".to_string(),
        details: format!("boolean required, got {}", value),
    })?;
    device.write_level(if level { 1.0 } else { 0.0 })
}

fn set_pwm(device: &GpioDevice, value: &ParamValue) -> Result<(), DeviceError> {
    let level = value
        .as_f64()
        .filter(|v| (0.0..=1.0).contains(v))
        .ok_or_else(|| DeviceError::InvalidParameter {
            device: device.id().to_string(),
            param: "value".to_string(),
            details: format!("duty cycle between 0 and 1 required, got {}", value),
        })?;
    device.write_level(level)
}

/// Servo positions are `-1.0..=1.0`; the pin carries the resulting duty cycle
fn set_servo(device: &GpioDevice, value: &ParamValue) -> Result<(), DeviceError> {
    if value.is_none() {
        return servo_detach(device, &ParamMap::new());
    }
    let position = value
        .as_f64()
        .filter(|v| (-1.0..=1.0).contains(v))
        .ok_or_else(|| DeviceError::InvalidParameter {
            device: device.id().to_string(),
            param: "value".to_string(),
            details: format!("position between -1 and 1 required, got {}", value),
        })?;

    let min_pulse = device.param_f64("min_pulse_width").unwrap_or(0.001);
    let max_pulse = device.param_f64("max_pulse_width").unwrap_or(0.002);
    let frame = device.param_f64("frame_width").unwrap_or(0.02);
    let pulse = min_pulse + (position + 1.0) / 2.0 * (max_pulse - min_pulse);

    device.backend.write(device.pins[0], pulse / frame)?;
    device.state.lock().value = position;
    Ok(())
}

fn servo_min(device: &GpioDevice, _params: &ParamMap) -> Result<(), DeviceError> {
    set_servo(device, &ParamValue::Float(-1.0))
}

fn servo_mid(device: &GpioDevice, _params: &ParamMap) -> Result<(), DeviceError> {
    set_servo(device, &ParamValue::Float(0.0))
}

fn servo_max(device: &GpioDevice, _params: &ParamMap) -> Result<(), DeviceError> {
    set_servo(device, &ParamValue::Float(1.0))
}

fn servo_detach(device: &GpioDevice, _params: &ParamMap) -> Result<(), DeviceError> {
    device.backend.write(device.pins[0], 0.0)
}

/// Half-step drive sequence for a four-coil unipolar stepper
const HALF_STEP: [[u8; 4]; 8] = [
    [1, 0, 0, 0],
    [1, 1, 0, 0],
    [0, 1, 0, 0],
    [0, 1, 1, 0],
    [0, 0, 1, 0],
    [0, 0, 1, 1],
    [0, 0, 0, 1],
    [1, 0, 0, 1],
];

/// Degrees per half step of a geared 28BYJ-48
const DEFAULT_STRIDE_ANGLE: f64 = 360.0 / 4096.0;

fn stride_angle(device: &GpioDevice) -> f64 {
    device
        .param_f64("stride_angle")
        .filter(|s| *s > 0.0)
        .unwrap_or(DEFAULT_STRIDE_ANGLE)
}

fn drive_steps(device: &GpioDevice, steps: i64) -> Result<(), DeviceError> {
    if device.pins.len() != 4 {
        return Err(DeviceError::Operation {
            device: device.id().to_string(),
            operation: "step".to_string(),
            details: format!("stepper needs 4 pins, has {}", device.pins.len()),
        });
    }

    let delay = device.param_f64("gpio_delay").unwrap_or(0.001);
    let stride = stride_angle(device);
    let direction: i64 = if steps >= 0 { 1 } else { -1 };

    for _ in 0..steps.unsigned_abs() {
        let phase = {
            let mut state = device.state.lock();
            state.phase = (state.phase as i64 + direction).rem_euclid(HALF_STEP.len() as i64) as usize;
            state.phase
        };
        for (pin, level) in device.pins.iter().zip(HALF_STEP[phase].iter()) {
            device.backend.write(*pin, *level as f64)?;
        }
        device.state.lock().value += direction as f64 * stride;
        sleep_secs(delay);
    }
    Ok(())
}

fn stepper_step(device: &GpioDevice, params: &ParamMap) -> Result<(), DeviceError> {
    let steps = param_f64(device, params, "steps")? as i64;
    drive_steps(device, steps)
}

fn stepper_rotate(device: &GpioDevice, params: &ParamMap) -> Result<(), DeviceError> {
    let angle = param_f64(device, params, "angle")?;
    drive_steps(device, (angle / stride_angle(device)).round() as i64)
}

fn rotate_to(device: &GpioDevice, target: f64) -> Result<(), DeviceError> {
    let delta = target - device.value();
    drive_steps(device, (delta / stride_angle(device)).round() as i64)
}

fn stepper_rotate_to(device: &GpioDevice, params: &ParamMap) -> Result<(), DeviceError> {
    let angle = param_f64(device, params, "angle")?;
    rotate_to(device, angle)
}

fn stepper_swing(device: &GpioDevice, params: &ParamMap) -> Result<(), DeviceError> {
    let from = param_f64(device, params, "from_angle")?;
    let to = param_f64(device, params, "to_angle")?;
    rotate_to(device, from)?;
    rotate_to(device, to)
}

fn stepper_stop(device: &GpioDevice, _params: &ParamMap) -> Result<(), DeviceError> {
    for pin in &device.pins {
        device.backend.write(*pin, 0.0)?;
    }
    Ok(())
}
