use super::schema::{ParamSpec, ParamType};
use super::{CapabilityType, DeviceRole, TargetKind, TargetSpec, CAMERA_CAPABILITY, MAILER_CAPABILITY};

use ParamType::*;

/// Controls every GPIO target accepts
fn gpio_controls() -> Vec<ParamSpec> {
    vec![
        ParamSpec::optional("duration", FloatOrNone),
        ParamSpec::optional("wait", Bool),
    ]
}

fn method(name: &'static str, params: Vec<ParamSpec>) -> TargetSpec {
    TargetSpec {
        name,
        kind: TargetKind::Method,
        params,
        controls: gpio_controls(),
    }
}

fn property(name: &'static str, ty: ParamType) -> TargetSpec {
    TargetSpec {
        name,
        kind: TargetKind::Property,
        params: vec![ParamSpec::required("value", ty)],
        controls: gpio_controls(),
    }
}

fn blink_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::optional("on_time", Float),
        ParamSpec::optional("off_time", Float),
        ParamSpec::optional("n", Int),
    ]
}

fn digital_output(name: &'static str, pulse_method: &'static str) -> CapabilityType {
    CapabilityType {
        name,
        role: DeviceRole::Output,
        params: vec![
            ParamSpec::required("pin", Int),
            ParamSpec::optional("active_high", Bool),
            ParamSpec::optional("initial_value", BoolOrNone),
        ],
        events: vec![],
        targets: vec![
            method("on", vec![]),
            method("off", vec![]),
            method("toggle", vec![]),
            method(pulse_method, blink_params()),
            property("value", Bool),
        ],
        needs_calibration: false,
        tracks_state: false,
    }
}

fn digital_input(name: &'static str, events: Vec<&'static str>) -> CapabilityType {
    CapabilityType {
        name,
        role: DeviceRole::Input,
        params: vec![
            ParamSpec::required("pin", Int),
            ParamSpec::optional("pull_up", BoolOrNone),
            ParamSpec::optional("active_state", BoolOrNone),
            ParamSpec::optional("bounce_time", FloatOrNone),
        ],
        events,
        targets: vec![],
        needs_calibration: false,
        tracks_state: false,
    }
}

pub(super) fn capability_types() -> Vec<CapabilityType> {
    let camera_controls = || {
        vec![
            ParamSpec::optional("burst_count", Int),
            ParamSpec::optional("burst_interval", Float),
            ParamSpec::optional("duration", FloatOrNone),
            ParamSpec::optional("wait", Bool),
        ]
    };
    let camera_target = |name: &'static str| TargetSpec {
        name,
        kind: TargetKind::Method,
        params: vec![],
        controls: camera_controls(),
    };

    vec![
        digital_output("LED", "blink"),
        digital_output("DigitalOutputDevice", "blink"),
        digital_output("Buzzer", "beep"),
        CapabilityType {
            name: "PWMLED",
            role: DeviceRole::Output,
            params: vec![
                ParamSpec::required("pin", Int),
                ParamSpec::optional("active_high", Bool),
                ParamSpec::optional("initial_value", Float),
                ParamSpec::optional("frequency", Int),
            ],
            events: vec![],
            targets: vec![
                method("on", vec![]),
                method("off", vec![]),
                method("toggle", vec![]),
                method("blink", blink_params()),
                method(
                    "pulse",
                    vec![
                        ParamSpec::optional("fade_in_time", Float),
                        ParamSpec::optional("fade_out_time", Float),
                        ParamSpec::optional("n", Int),
                    ],
                ),
                property("value", Float),
            ],
            needs_calibration: false,
            tracks_state: false,
        },
        digital_input("Button", vec!["when_pressed", "when_released"]),
        digital_input("MotionSensor", vec!["when_motion", "when_no_motion"]),
        digital_input("LineSensor", vec!["when_line", "when_no_line"]),
        CapabilityType {
            name: "Servo",
            role: DeviceRole::Output,
            params: vec![
                ParamSpec::required("pin", Int),
                ParamSpec::optional("initial_value", FloatOrNone),
                ParamSpec::optional("min_pulse_width", Float),
                ParamSpec::optional("max_pulse_width", Float),
                ParamSpec::optional("frame_width", Float),
            ],
            events: vec![],
            targets: vec![
                method("min", vec![]),
                method("mid", vec![]),
                method("max", vec![]),
                method("detach", vec![]),
                property("value", FloatOrNone),
            ],
            needs_calibration: false,
            tracks_state: false,
        },
        CapabilityType {
            name: "StepperMotor",
            role: DeviceRole::Output,
            params: vec![
                ParamSpec::optional("pins", TupleOfInt),
                ParamSpec::optional("stride_angle", Float),
                ParamSpec::optional("gpio_delay", Float),
            ],
            events: vec![],
            targets: vec![
                method("step", vec![ParamSpec::required("steps", Int)]),
                method("rotate", vec![ParamSpec::required("angle", Float)]),
                method("rotate_to", vec![ParamSpec::required("angle", Float)]),
                method(
                    "swing",
                    vec![
                        ParamSpec::required("from_angle", Float),
                        ParamSpec::required("to_angle", Float),
                    ],
                ),
                method("stop", vec![]),
            ],
            needs_calibration: true,
            tracks_state: true,
        },
        CapabilityType {
            name: CAMERA_CAPABILITY,
            role: DeviceRole::Service,
            params: vec![],
            events: vec!["motion_detected", "photo_taken", "video_started"],
            targets: vec![
                camera_target("take_photo"),
                camera_target("take_raw_photo"),
                camera_target("start_video"),
                camera_target("stop_video"),
                camera_target("record_video"),
            ],
            needs_calibration: false,
            tracks_state: false,
        },
        CapabilityType {
            name: MAILER_CAPABILITY,
            role: DeviceRole::Service,
            params: vec![],
            events: vec![],
            targets: vec![TargetSpec {
                name: "send_mail",
                kind: TargetKind::Method,
                params: vec![
                    ParamSpec::optional("subject", String),
                    ParamSpec::optional("message", String),
                    ParamSpec::optional("to", String),
                ],
                controls: vec![
                    ParamSpec::optional("attach_photo", Bool),
                    ParamSpec::optional("attach_video", Bool),
                ],
            }],
            needs_calibration: false,
            tracks_state: false,
        },
    ]
}
