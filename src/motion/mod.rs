//! Motion detection: pluggable detectors, operating hours and the sampling loop.

mod detector;
mod sampler;
mod schedule;
#[cfg(test)]
mod tests;

pub use detector::{
    detector_for, BackgroundSubtraction, BoundingBox, Detection, FrameDifferencing,
    MeanSquareDiff, MotionDescriptor, MotionDetector, OpticalFlow,
};
pub use sampler::{DetectionSummary, MotionSampler, SamplerState, SamplerStatus, MOTION_EVENT};
pub use schedule::OperatingHours;
