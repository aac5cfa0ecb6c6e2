use super::*;
use crate::model::ParamValue;
use crate::test_support::{action, device, eventually, harness, params, Harness};

fn runner(harness: &Harness) -> ActionRunner {
    ActionRunner::new(Arc::clone(&harness.engine))
}

fn led_harness() -> Harness {
    harness(|config| {
        config.device = vec![device("porch", "LED", 17)];
        let mut light = action("light", SourceKind::GeneralIo, "porch", "on");
        light.control = params(&[("duration", ParamValue::Float(0.1))]);
        config.action = vec![light];
    })
}

#[tokio::test]
async fn test_gpio_duration_returns_output_to_rest() {
    let harness = led_harness();

    let outcome = runner(&harness).run_standalone("light").await.unwrap();
    assert!(outcome.done, "{}", outcome.message);
    assert_eq!(harness.pins.history(), vec![(17, 1.0), (17, 0.0)]);
    assert!(!harness
        .engine
        .registry()
        .is_busy(SourceKind::GeneralIo, "porch"));
}

#[tokio::test]
async fn test_unknown_standalone_action_is_an_error() {
    let harness = led_harness();
    assert!(runner(&harness).run_standalone("nothing").await.is_err());
}

#[tokio::test]
async fn test_motion_sampler_accepts_no_actions() {
    let harness = led_harness();
    let request = ActionRequest::standalone(action(
        "sample",
        SourceKind::MotionSampler,
        "camera",
        "detect",
    ));

    let outcome = runner(&harness).run(request).await;
    assert!(!outcome.done);
}

#[tokio::test]
async fn test_failed_delivery_posts_status_then_clears() {
    let harness = harness(|config| {
        config.action = vec![action("mail", SourceKind::Notification, "", "send_mail")];
    });
    let runner = runner(&harness);

    harness.mail.fail_deliveries(true);
    let outcome = runner.run_standalone("mail").await.unwrap();
    assert!(!outcome.done);
    assert!(harness.engine.status().get("SMTP").is_some());
    assert!(harness
        .engine
        .journal()
        .recent()
        .iter()
        .any(|line| line.contains("Error: action mail")));

    harness.mail.fail_deliveries(false);
    let outcome = runner.run_standalone("mail").await.unwrap();
    assert!(outcome.done, "{}", outcome.message);
    assert!(harness.engine.status().get("SMTP").is_none());
    assert_eq!(harness.mail.messages().len(), 1);
}

#[tokio::test]
async fn test_mail_parameters_override_defaults() {
    let harness = harness(|config| {
        config.notification.recipients.clear();
        let mut mail = action("mail", SourceKind::Notification, "", "send_mail");
        mail.params = params(&[
            ("to", ParamValue::Str("a@example.com, b@example.com".to_string())),
            ("subject", ParamValue::Str("Hello".to_string())),
            ("message", ParamValue::Str("Someone is at the door".to_string())),
        ]);
        config.action = vec![
            mail,
            action("bare", SourceKind::Notification, "", "send_mail"),
        ];
    });
    let runner = runner(&harness);

    let outcome = runner.run_standalone("mail").await.unwrap();
    assert!(outcome.done, "{}", outcome.message);
    let sent = &harness.mail.messages()[0];
    assert_eq!(sent.to, vec!["a@example.com", "b@example.com"]);
    assert_eq!(sent.subject, "[watchpost] Hello");
    assert_eq!(sent.body, "Someone is at the door");

    // no configured recipients and none given
    let outcome = runner.run_standalone("bare").await.unwrap();
    assert!(!outcome.done);
    assert_eq!(harness.mail.messages().len(), 1);
}

#[tokio::test]
async fn test_stop_video_is_idempotent() {
    let harness = harness(|config| {
        config.action = vec![
            action("start", SourceKind::Camera, "", "start_video"),
            action("stop", SourceKind::Camera, "", "stop_video"),
        ];
    });
    let runner = runner(&harness);
    let engine = &harness.engine;

    let idle = runner.run_standalone("stop").await.unwrap();
    assert_eq!(idle, ActionOutcome::ok("No video recording in progress"));

    assert!(runner.run_standalone("start").await.unwrap().done);
    assert!(engine.camera().is_recording());
    assert!(engine.open_video().is_some());

    let stopped = runner.run_standalone("stop").await.unwrap();
    assert!(stopped.done);
    assert_ne!(stopped.message, idle.message);
    assert!(engine.open_video().is_none());

    assert_eq!(runner.run_standalone("stop").await.unwrap(), idle);
    assert_eq!(engine.stop_video().await.unwrap(), None);
}

#[tokio::test]
async fn test_record_video_timer_stops_recording() {
    let harness = harness(|config| {
        let mut record = action("clip", SourceKind::Camera, "", "record_video");
        record.control = params(&[("duration", ParamValue::Float(0.2))]);
        config.action = vec![
            record,
            action("endless", SourceKind::Camera, "", "record_video"),
        ];
    });
    let runner = runner(&harness);
    let engine = Arc::clone(&harness.engine);

    let outcome = runner.run_standalone("clip").await.unwrap();
    assert!(outcome.done, "{}", outcome.message);
    assert!(engine.camera().is_recording());
    // the timer helper keeps a worker registered until it has stopped the recording
    assert_eq!(engine.workers().len(), 1);

    assert!(eventually(|| !engine.camera().is_recording()).await);
    assert!(eventually(|| engine.workers().is_empty()).await);
    assert!(engine.open_video().is_none());

    let outcome = runner.run_standalone("endless").await.unwrap();
    assert!(!outcome.done);
    assert!(engine.status().get("Camera").is_some());
}

#[tokio::test]
async fn test_photo_burst_names_are_unique() {
    let harness = harness(|config| {
        let mut burst = action("burst", SourceKind::Camera, "", "take_photo");
        burst.control = params(&[("burst_count", ParamValue::Int(2))]);
        config.action = vec![burst];
    });
    let runner = runner(&harness);

    assert!(runner.run_standalone("burst").await.unwrap().done);
    assert!(runner.run_standalone("burst").await.unwrap().done);

    let photos = std::fs::read_dir(harness.dir.path().join("photos"))
        .unwrap()
        .count();
    assert_eq!(photos, 4);
    assert!(harness.engine.camera().is_live());
}

#[tokio::test]
async fn test_failed_rest_target_still_persists_stepper_position() {
    use crate::engine::Engine;
    use crate::gpio::{DeviceStateStore, MemoryPins, PinBackend};
    use crate::model::DeviceSpec;

    let dir = tempfile::TempDir::new().unwrap();
    let mut config = crate::test_support::test_config(&dir);
    config.device = vec![DeviceSpec {
        id: "shutter".to_string(),
        capability: "StepperMotor".to_string(),
        params: params(&[("pins", ParamValue::IntTuple(vec![5, 6, 13, 19]))]),
        needs_calibration: None,
    }];
    let mut nudge = action("nudge", SourceKind::GeneralIo, "shutter", "step");
    nudge.params = params(&[("steps", ParamValue::Int(8))]);
    nudge.control = params(&[("duration", ParamValue::Float(0.5))]);
    config.action = vec![nudge];

    let pins = Arc::new(MemoryPins::new());
    let states = Arc::new(DeviceStateStore::in_memory());
    let engine = Engine::builder(config)
        .pins(pins.clone())
        .state_store(states.clone())
        .build()
        .unwrap();

    let runner = ActionRunner::new(Arc::clone(&engine));
    let run = tokio::spawn(async move { runner.run_standalone("nudge").await });

    // every half step writes all four coils
    assert!(eventually(|| pins.history().len() >= 32).await);
    pins.release(19);

    let outcome = run.await.unwrap().unwrap();
    assert!(!outcome.done);
    let persisted = states.get("shutter").map(|s| s.value).unwrap_or_default();
    assert!((persisted - 8.0 * 360.0 / 4096.0).abs() < 1e-9, "{}", persisted);
}
