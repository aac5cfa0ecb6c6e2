use super::*;
use crate::camera::{CameraService, SimulatedCamera};
use crate::config::{MotionAlgorithm, WatchpostConfig};
use crate::engine::Engine;
use crate::error::MotionError;
use crate::events::{EventDispatcher, TriggerLifecycle};
use crate::model::{ParamValue, SourceKind};
use crate::test_support::{action, eventually, params, test_config, trigger};
use image::{GrayImage, Luma};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn frame_with_square(left: u32, top: u32, size: u32) -> GrayImage {
    GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        if (left..left + size).contains(&x) && (top..top + size).contains(&y) {
            Luma([230])
        } else {
            Luma([40])
        }
    })
}

fn motion_config(algorithm: MotionAlgorithm) -> crate::config::MotionConfig {
    let mut config = WatchpostConfig::default().motion;
    config.algorithm = algorithm;
    config.min_area = 50.0;
    config
}

#[test]
fn test_mean_square_diff() {
    let mut detector = MeanSquareDiff { threshold: 20.0 };
    let still = frame_with_square(4, 8, 16);

    let quiet = detector.detect(&still, &still).unwrap();
    assert!(!quiet.motion);
    assert_eq!(quiet.descriptor.score, 0.0);

    let moved = detector
        .detect(&frame_with_square(36, 8, 16), &still)
        .unwrap();
    assert!(moved.motion);
    assert!(moved.descriptor.mask.is_none());
    assert!(!detector.supports_test_mode());
}

#[test]
fn test_frame_differencing_finds_moved_object() {
    let mut detector = FrameDifferencing {
        delta_threshold: 25,
        min_area: 50.0,
    };
    let before = frame_with_square(4, 8, 16);
    let after = frame_with_square(36, 8, 16);

    let detection = detector.detect(&after, &before).unwrap();
    assert!(detection.motion);
    assert!(detection.descriptor.area >= 50.0);
    let (x, _, width, _) = detection.descriptor.bbox.unwrap();
    assert!(x + width <= WIDTH);
    assert!(detection.descriptor.mask.is_some());

    let still = detector.detect(&before, &before).unwrap();
    assert!(!still.motion);
    assert_eq!(still.descriptor.area, 0.0);
    assert!(still.descriptor.bbox.is_none());
}

#[test]
fn test_geometry_mismatch_rejected() {
    let mut detector = FrameDifferencing {
        delta_threshold: 25,
        min_area: 50.0,
    };
    let small = GrayImage::new(32, 24);
    let result = detector.detect(&small, &frame_with_square(0, 0, 4));
    assert!(matches!(result, Err(MotionError::GeometryMismatch { .. })));
}

#[test]
fn test_optical_flow_tracks_small_shift() {
    let mut detector = OpticalFlow {
        flow_threshold: 0.3,
        min_area: 1.0,
    };
    let before = frame_with_square(20, 16, 16);
    let after = frame_with_square(21, 16, 16);

    let detection = detector.detect(&after, &before).unwrap();
    assert!(detection.motion);
    assert!(detection.descriptor.score >= 0.3);

    let still = detector.detect(&before, &before).unwrap();
    assert!(!still.motion);

    let tiny = GrayImage::new(2, 2);
    assert!(detector.detect(&tiny, &tiny).is_err());
}

#[test]
fn test_background_subtraction_model() {
    let mut detector = detector_for(&motion_config(MotionAlgorithm::BackgroundSubtraction));
    let empty = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([40]));

    assert!(!detector.detect(&empty, &empty).unwrap().motion);
    let intruder = frame_with_square(20, 16, 16);
    assert!(detector.detect(&intruder, &empty).unwrap().motion);

    detector.reset();
    // after a reset the model is rebuilt from the previous frame
    assert!(!detector.detect(&intruder, &intruder).unwrap().motion);
}

#[test]
fn test_detector_for_selects_algorithm() {
    for (algorithm, name) in [
        (MotionAlgorithm::MeanSquareDiff, "mean_square_diff"),
        (MotionAlgorithm::FrameDifferencing, "frame_differencing"),
        (MotionAlgorithm::OpticalFlow, "optical_flow"),
        (MotionAlgorithm::BackgroundSubtraction, "background_subtraction"),
    ] {
        assert_eq!(detector_for(&motion_config(algorithm)).name(), name);
    }
}

struct Rig {
    _dir: TempDir,
    engine: Arc<Engine>,
    camera: Arc<SimulatedCamera>,
    cancel: CancellationToken,
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Engine with a motion trigger armed and the dispatcher running
fn rig(actions: Vec<crate::model::Action>, configure: impl FnOnce(&mut WatchpostConfig)) -> Rig {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);

    let ids: Vec<String> = actions.iter().map(|a| a.id.clone()).collect();
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut motion = trigger("motion", SourceKind::MotionSampler, "camera", MOTION_EVENT, &ids);
    motion.control = params(&[("bounce_time", ParamValue::Float(30.0))]);
    config.trigger = vec![motion];
    config.action = actions;
    configure(&mut config);

    let camera = Arc::new(SimulatedCamera::new(config.camera.clone()));
    let engine = Engine::builder(config)
        .camera(camera.clone())
        .build()
        .unwrap();

    let report = TriggerLifecycle::new(Arc::clone(&engine)).arm_all();
    assert_eq!(report.armed.len(), 1, "{:?}", report.rejected);

    let cancel = CancellationToken::new();
    tokio::spawn(EventDispatcher::new(Arc::clone(&engine)).run(cancel.clone()));
    Rig {
        _dir: dir,
        engine,
        camera,
        cancel,
    }
}

#[tokio::test]
async fn test_sampler_fires_motion_trigger() {
    let rig = rig(
        vec![action("snap", SourceKind::Camera, "", "take_photo")],
        |_| {},
    );
    let mut sampler = MotionSampler::new(Arc::clone(&rig.engine));
    sampler.start().unwrap();
    assert_eq!(sampler.status().state, SamplerState::Sampling);

    tokio::time::sleep(Duration::from_millis(100)).await;
    rig.camera.inject_motion(4);

    let store = rig.engine.store();
    assert!(eventually(|| !store.recent_events(5).unwrap().is_empty()).await);
    let event = &store.recent_events(5).unwrap()[0];
    assert_eq!(event.trigger, "motion");
    assert_eq!(event.trigger_type, "MotionDetector");
    assert!(sampler.status().detections >= 1);
    assert!(sampler.status().frames_analyzed >= 1);

    assert!(sampler.stop().await);
    assert_eq!(sampler.status().state, SamplerState::Idle);
    assert!(!rig.camera.is_live());
    assert!(!sampler.is_running());
}

#[tokio::test]
async fn test_test_mode_writes_masks_without_firing() {
    let rig = rig(
        vec![action("snap", SourceKind::Camera, "", "take_photo")],
        |config| config.motion.test_mode = true,
    );
    let mut sampler = MotionSampler::new(Arc::clone(&rig.engine));
    sampler.start().unwrap();
    rig.camera.inject_motion(10);

    assert!(eventually(|| sampler.status().test_masks >= 3).await);
    assert!(sampler.stop().await);

    let masks = std::fs::read_dir(&rig.engine.config().motion.test_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().map(|e| e == "png").unwrap_or(false))
        .count();
    assert!(masks >= 3);
    assert_eq!(sampler.status().detections, 0);
    assert!(rig.engine.store().recent_events(5).unwrap().is_empty());
}

#[tokio::test]
async fn test_sampler_idles_outside_operating_hours() {
    let rig = rig(
        vec![action("snap", SourceKind::Camera, "", "take_photo")],
        |config| {
            config.motion.schedule.enabled = true;
            config.motion.schedule.weekdays = 0;
        },
    );
    let mut sampler = MotionSampler::new(Arc::clone(&rig.engine));
    sampler.start().unwrap();
    rig.camera.inject_motion(10);

    assert!(eventually(|| sampler.status().awaiting_window).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sampler.status().frames_analyzed, 0);
    assert!(!rig.camera.is_live());

    assert!(sampler.stop().await);
    assert!(!sampler.status().awaiting_window);
}

#[tokio::test]
async fn test_motion_video_capped_at_max_duration() {
    let rig = rig(
        vec![action("clip", SourceKind::Camera, "", "start_video")],
        |config| config.motion.video_max_duration_secs = 1,
    );
    let mut sampler = MotionSampler::new(Arc::clone(&rig.engine));
    sampler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    rig.camera.inject_motion(4);

    assert!(eventually(|| rig.camera.is_recording()).await);
    assert!(eventually(|| !rig.camera.is_recording()).await);
    assert!(rig.engine.open_video().is_none());
    // the sampler keeps running after the cap
    assert!(sampler.is_running());
    assert!(sampler.stop().await);
}

#[tokio::test]
async fn test_stop_closes_open_motion_video() {
    let rig = rig(
        vec![action("clip", SourceKind::Camera, "", "start_video")],
        |config| config.motion.video_max_duration_secs = 0,
    );
    let mut sampler = MotionSampler::new(Arc::clone(&rig.engine));
    sampler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    rig.camera.inject_motion(4);

    assert!(eventually(|| rig.camera.is_recording()).await);
    assert!(sampler.stop().await);
    assert!(!rig.camera.is_recording());
    assert!(rig.engine.open_video().is_none());

    // stopping twice is harmless
    assert!(sampler.stop().await);
}
