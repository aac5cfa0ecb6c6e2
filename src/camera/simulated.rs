use super::service::CameraService;
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::FrameData;
use image::{GrayImage, ImageFormat, Luma};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};

/// Size of the synthetic moving object, in pixels
const BLOB_SIZE: u32 = 32;

#[derive(Debug, Default)]
struct SimulatedState {
    live: bool,
    recording: Option<PathBuf>,
    /// Frames that still contain the moving object
    motion_frames: u32,
    blob_position: u32,
}

/// Camera stand-in that renders synthetic frames and writes real files.
///
/// Frames show a static gradient; [`SimulatedCamera::inject_motion`] adds a
/// bright square that moves between consecutive frames.
pub struct SimulatedCamera {
    config: CameraConfig,
    frame_counter: AtomicU64,
    state: Mutex<SimulatedState>,
}

impl SimulatedCamera {
    pub fn new(config: CameraConfig) -> Self {
        info!(
            "Initializing simulated camera ({}x{} @ {}fps)",
            config.resolution.0, config.resolution.1, config.fps
        );
        Self {
            config,
            frame_counter: AtomicU64::new(0),
            state: Mutex::new(SimulatedState::default()),
        }
    }

    /// Make the next `frames` frames contain a moving object
    pub fn inject_motion(&self, frames: u32) {
        self.state.lock().motion_frames = frames;
        debug!("Injected motion for {} frame(s)", frames);
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    fn render(&self) -> GrayImage {
        let (width, height) = self.config.resolution;
        let blob = {
            let mut state = self.state.lock();
            if state.motion_frames > 0 {
                state.motion_frames -= 1;
                state.blob_position = (state.blob_position + BLOB_SIZE) % width.max(1);
                Some(state.blob_position)
            } else {
                None
            }
        };

        let mut image = GrayImage::from_fn(width, height, |x, _| {
            Luma([(x * 128 / width.max(1)) as u8 + 32])
        });

        if let Some(left) = blob {
            let top = height / 3;
            for y in top..(top + BLOB_SIZE).min(height) {
                for x in left..(left + BLOB_SIZE).min(width) {
                    image.put_pixel(x, y, Luma([255]));
                }
            }
        }

        self.frame_counter.fetch_add(1, Ordering::Relaxed);
        image
    }

    fn output_path(dir: &str, name: &str, extension: &str) -> Result<PathBuf, CameraError> {
        let dir = Path::new(dir);
        fs::create_dir_all(dir).map_err(|e| CameraError::Capture {
            details: format!("cannot create {}: {}", dir.display(), e),
        })?;
        Ok(dir.join(format!("{}.{}", name, extension)))
    }

    fn encode_jpeg(image: &GrayImage) -> Result<Vec<u8>, CameraError> {
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .map_err(|e| CameraError::Encoding {
                details: e.to_string(),
            })?;
        Ok(buffer.into_inner())
    }

    async fn write_file(path: PathBuf, data: Vec<u8>, append: bool) -> Result<(), CameraError> {
        tokio::task::spawn_blocking(move || {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(&path)?;
            file.write_all(&data)
        })
        .await
        .map_err(|e| CameraError::Capture {
            details: format!("writer task failed: {}", e),
        })?
        .map_err(|e| CameraError::Capture {
            details: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl CameraService for SimulatedCamera {
    fn name(&self) -> &str {
        &self.config.id
    }

    async fn take_photo(&self, name: &str) -> Result<PathBuf, CameraError> {
        let path = Self::output_path(&self.config.photo_dir, name, "jpg")?;
        let data = Self::encode_jpeg(&self.render())?;
        Self::write_file(path.clone(), data, false).await?;
        debug!("Photo written to {}", path.display());
        Ok(path)
    }

    async fn take_raw_photo(&self, name: &str) -> Result<PathBuf, CameraError> {
        let path = Self::output_path(&self.config.photo_dir, name, "raw")?;
        Self::write_file(path.clone(), self.render().into_raw(), false).await?;
        debug!("Raw photo written to {}", path.display());
        Ok(path)
    }

    async fn start_video(&self, name: &str) -> Result<PathBuf, CameraError> {
        if let Some(active) = &self.state.lock().recording {
            return Err(CameraError::AlreadyRecording {
                path: active.display().to_string(),
            });
        }

        let path = Self::output_path(&self.config.video_dir, name, "mjpeg")?;
        let data = Self::encode_jpeg(&self.render())?;
        Self::write_file(path.clone(), data, false).await?;

        let mut state = self.state.lock();
        if let Some(active) = &state.recording {
            return Err(CameraError::AlreadyRecording {
                path: active.display().to_string(),
            });
        }
        state.recording = Some(path.clone());
        info!("Recording started: {}", path.display());
        Ok(path)
    }

    async fn stop_video(&self) -> Result<Option<PathBuf>, CameraError> {
        let Some(path) = self.state.lock().recording.take() else {
            return Ok(None);
        };

        // closing frame of the MJPEG stream
        let data = Self::encode_jpeg(&self.render())?;
        Self::write_file(path.clone(), data, true).await?;
        info!("Recording stopped: {}", path.display());
        Ok(Some(path))
    }

    fn is_recording(&self) -> bool {
        self.state.lock().recording.is_some()
    }

    async fn start_live_preview(&self) -> Result<bool, CameraError> {
        let mut state = self.state.lock();
        if state.live {
            return Ok(false);
        }
        state.live = true;
        info!("Live preview started on {}", self.config.id);
        Ok(true)
    }

    async fn stop_live_preview(&self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        if state.live {
            state.live = false;
            info!("Live preview stopped on {}", self.config.id);
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.state.lock().live
    }

    fn settle_time(&self) -> Duration {
        Duration::from_millis(self.config.settle_time_ms)
    }

    async fn latest_frame(&self) -> Result<Option<FrameData>, CameraError> {
        if !self.is_live() {
            return Ok(None);
        }
        let image = self.render();
        let id = self.frame_counter.load(Ordering::Relaxed);
        trace!("Rendered simulated frame {}", id);
        Ok(Some(FrameData::from_gray(id, SystemTime::now(), image)))
    }
}
