use super::detector::{detector_for, BoundingBox, Detection, MotionDetector};
use crate::engine::Engine;
use crate::error::{MotionError, Result, WatchpostError};
use crate::events::EventId;
use crate::model::SourceKind;
use image::{GrayImage, ImageFormat};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Event the sampler fires on the camera when it sees motion
pub const MOTION_EVENT: &str = "motion_detected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SamplerState {
    Idle,
    Sampling,
    Stopping,
}

/// Measurements of the latest analysed frame pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub motion: bool,
    pub score: f64,
    pub area: f64,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplerStatus {
    pub state: SamplerState,
    /// Outside operating hours; frames are not analysed
    pub awaiting_window: bool,
    pub frames_analyzed: u64,
    pub detections: u64,
    /// Masks written in test mode
    pub test_masks: u64,
    pub last_detection: Option<DetectionSummary>,
    pub current_event: Option<EventId>,
}

impl Default for SamplerStatus {
    fn default() -> Self {
        Self {
            state: SamplerState::Idle,
            awaiting_window: false,
            frames_analyzed: 0,
            detections: 0,
            test_masks: 0,
            last_detection: None,
            current_event: None,
        }
    }
}

/// Background loop comparing consecutive camera frames and firing the motion trigger
pub struct MotionSampler {
    engine: Arc<Engine>,
    status: Arc<Mutex<SamplerStatus>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MotionSampler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            status: Arc::new(Mutex::new(SamplerStatus::default())),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn status(&self) -> SamplerStatus {
        self.status.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("Motion sampler is already running");
            return Ok(());
        }

        let config = &self.engine.config().motion;
        let detector = detector_for(config);
        let test_mode = config.test_mode && detector.supports_test_mode();
        if config.test_mode && !test_mode {
            warn!(
                "{} has no test mode, sampling normally",
                detector.name()
            );
        }

        self.cancel = CancellationToken::new();
        {
            let mut status = self.status.lock();
            *status = SamplerStatus::default();
            status.state = SamplerState::Sampling;
        }

        let sampling = SamplingLoop {
            engine: Arc::clone(&self.engine),
            status: Arc::clone(&self.status),
            detector: Arc::new(Mutex::new(detector)),
            previous: None,
            current_event: None,
            test_mode,
            test_dir: PathBuf::from(&config.test_dir),
            failing: false,
        };
        self.task = Some(tokio::spawn(sampling.run(self.cancel.clone())));
        info!(
            "Motion sampler started ({} ms frame interval{})",
            config.frame_interval_ms,
            if test_mode { ", test mode" } else { "" }
        );
        Ok(())
    }

    /// Signal the loop and wait for it, bounded by the configured stop timeout.
    ///
    /// Returns false when the loop had to be abandoned.
    pub async fn stop(&mut self) -> bool {
        let Some(task) = self.task.take() else {
            return true;
        };

        info!("Stopping motion sampler");
        self.status.lock().state = SamplerState::Stopping;
        self.cancel.cancel();

        let timeout = self.engine.config().system.stop_timeout();
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => {
                info!("Motion sampler stopped");
                true
            }
            Ok(Err(e)) => {
                error!("Motion sampler task failed: {}", e);
                self.status.lock().state = SamplerState::Idle;
                false
            }
            Err(_) => {
                warn!("Motion sampler did not stop within {:?}", timeout);
                false
            }
        }
    }
}

struct SamplingLoop {
    engine: Arc<Engine>,
    status: Arc<Mutex<SamplerStatus>>,
    detector: Arc<Mutex<Box<dyn MotionDetector>>>,
    previous: Option<GrayImage>,
    current_event: Option<EventId>,
    test_mode: bool,
    test_dir: PathBuf,
    /// Repeated failures are journaled once until a frame succeeds again
    failing: bool,
}

impl SamplingLoop {
    async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.engine.config().motion.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.engine.schedule().is_armed_now() {
                self.await_window();
                continue;
            }
            if self.status.lock().awaiting_window {
                info!("Operating window opened, sampling resumed");
                self.status.lock().awaiting_window = false;
            }

            match self.sample(&cancel).await {
                Ok(()) => self.failing = false,
                Err(e) => {
                    if !self.failing {
                        self.engine
                            .record_failure(SourceKind::MotionSampler, "motion sampling", &e);
                    } else {
                        debug!("Motion sampling still failing: {}", e);
                    }
                    self.failing = true;
                }
            }
            self.enforce_video_limit().await;
        }

        self.finish().await;
    }

    fn await_window(&mut self) {
        let mut status = self.status.lock();
        if !status.awaiting_window {
            info!("Outside operating hours, sampler idle");
            status.awaiting_window = true;
            self.previous = None;
            self.detector.lock().reset();
        }
    }

    async fn sample(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.engine.ensure_live_preview().await?;
        let Some(frame) = self.engine.camera().latest_frame().await? else {
            debug!("No frame available yet");
            return Ok(());
        };
        let current = frame.to_gray()?;

        let Some(previous) = self.previous.replace(current.clone()) else {
            return Ok(());
        };

        let detector = Arc::clone(&self.detector);
        let detection: Detection =
            tokio::task::spawn_blocking(move || detector.lock().detect(&current, &previous))
                .await
                .map_err(|e| WatchpostError::component("motion", e.to_string()))??;

        let frames = {
            let mut status = self.status.lock();
            status.frames_analyzed += 1;
            status.last_detection = Some(DetectionSummary {
                motion: detection.motion,
                score: detection.descriptor.score,
                area: detection.descriptor.area,
                bbox: detection.descriptor.bbox,
            });
            status.frames_analyzed
        };

        if self.test_mode {
            if let Some(mask) = detection.descriptor.mask {
                self.write_mask(mask, frames).await?;
            }
            return Ok(());
        }

        if detection.motion {
            self.status.lock().detections += 1;
            info!(
                "Motion detected (score {:.3}, area {:.0})",
                detection.descriptor.score, detection.descriptor.area
            );
            self.fire(cancel).await?;
        }
        Ok(())
    }

    async fn write_mask(&self, mask: GrayImage, frame: u64) -> Result<()> {
        let dir = self.test_dir.clone();
        let path = dir.join(format!("mask_{:06}.png", frame));
        let written = path.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            mask.save_with_format(&path, ImageFormat::Png)
                .map_err(|e| MotionError::FrameProcessing {
                    details: format!("cannot write {}: {}", path.display(), e),
                })?;
            Ok::<(), WatchpostError>(())
        })
        .await
        .map_err(|e| WatchpostError::component("motion", e.to_string()))??;

        self.status.lock().test_masks += 1;
        debug!("Test mask written to {}", written.display());
        Ok(())
    }

    /// Push the motion trigger and remember the event it opened
    async fn fire(&mut self, cancel: &CancellationToken) -> Result<()> {
        let camera_id = self.engine.camera_id().to_string();
        let Some(reply) = self
            .engine
            .stimulate(SourceKind::MotionSampler, &camera_id, MOTION_EVENT)?
        else {
            return Ok(());
        };

        let timeout = self.engine.config().system.stop_timeout();
        tokio::select! {
            _ = cancel.cancelled() => {}
            replied = tokio::time::timeout(timeout, reply) => match replied {
                Ok(Ok(Some(event_id))) => {
                    debug!("Motion opened event {}", event_id);
                    self.status.lock().current_event = Some(event_id.clone());
                    self.current_event = Some(event_id);
                }
                Ok(Ok(None)) => debug!("Motion firing suppressed"),
                Ok(Err(_)) => warn!("Dispatcher dropped the motion firing"),
                Err(_) => warn!("No dispatcher reply within {:?}", timeout),
            }
        }
        Ok(())
    }

    /// Whether the open recording belongs to the event this sampler opened
    fn owns_open_video(&self) -> bool {
        match (&self.current_event, self.engine.open_video()) {
            (Some(current), Some(open)) => open.event_id.as_ref() == Some(current),
            _ => false,
        }
    }

    /// Stop a motion-started recording that ran past the configured maximum
    async fn enforce_video_limit(&mut self) {
        let Some(event_id) = self.current_event.clone() else {
            return;
        };
        if !self.owns_open_video() {
            if !self.engine.contexts().contains(&event_id) {
                self.current_event = None;
                self.status.lock().current_event = None;
            }
            return;
        }

        let Some(limit) = self.engine.config().motion.video_max_duration() else {
            return;
        };
        let Some(open) = self.engine.open_video() else {
            return;
        };
        if open.elapsed() < limit {
            return;
        }

        info!(
            "Recording {} of event {} reached {:?}, stopping",
            open.path.display(),
            event_id,
            limit
        );
        if let Err(e) = self.engine.stop_video().await {
            self.engine
                .record_failure(SourceKind::Camera, "video length limit", &e);
        }
    }

    /// Close the recording of the current event and release the camera
    async fn finish(&mut self) {
        if self.owns_open_video() {
            info!("Stopping recording of the current event before the sampler exits");
            if let Err(e) = self.engine.stop_video().await {
                self.engine
                    .record_failure(SourceKind::Camera, "sampler shutdown", &e);
            }
        }
        if let Err(e) = self.engine.camera().stop_live_preview().await {
            warn!("Failed to stop live preview: {}", e);
        }

        let mut status = self.status.lock();
        status.state = SamplerState::Idle;
        status.awaiting_window = false;
        status.current_event = None;
        debug!("Sampling loop exited");
    }
}
