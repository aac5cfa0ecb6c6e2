use crate::error::CameraError;
use crate::frame::FrameData;
use std::path::PathBuf;
use std::time::Duration;

/// Camera collaborator used by camera actions and the motion sampler.
///
/// All operations may be slow and fail; callers serialize preview start-up
/// themselves.
#[async_trait::async_trait]
pub trait CameraService: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Capture a JPEG still and return its path
    async fn take_photo(&self, name: &str) -> Result<PathBuf, CameraError>;

    /// Capture an unprocessed still and return its path
    async fn take_raw_photo(&self, name: &str) -> Result<PathBuf, CameraError>;

    /// Begin recording and return the output path
    async fn start_video(&self, name: &str) -> Result<PathBuf, CameraError>;

    /// Stop the active recording; `None` when nothing was recording
    async fn stop_video(&self) -> Result<Option<PathBuf>, CameraError>;

    fn is_recording(&self) -> bool;

    /// Ensure the live preview runs; returns true when it had to be started
    async fn start_live_preview(&self) -> Result<bool, CameraError>;

    async fn stop_live_preview(&self) -> Result<(), CameraError>;

    fn is_live(&self) -> bool;

    /// Time auto-exposure and white balance need after a fresh preview start
    fn settle_time(&self) -> Duration;

    /// Newest analyzable frame of the live preview
    async fn latest_frame(&self) -> Result<Option<FrameData>, CameraError>;
}
