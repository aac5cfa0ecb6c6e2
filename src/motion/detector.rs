//! Pluggable motion detection algorithms.
//!
//! Every detector compares the current frame against the previous one and
//! reports whether motion was found together with a diagnostic descriptor.

use crate::config::{MotionAlgorithm, MotionConfig};
use crate::error::MotionError;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
    contrast::threshold,
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    morphology::{dilate, erode},
    region_labelling::{connected_components, Connectivity},
};
use std::collections::HashMap;
use tracing::{debug, info};

const BLUR_SIGMA: f32 = 2.0;
const MORPH_KERNEL: u8 = 3;
const FLOW_BLOCK: u32 = 8;

/// Bounding box as (x, y, width, height)
pub type BoundingBox = (u32, u32, u32, u32);

/// Diagnostic sub-products of one detection
#[derive(Debug, Clone, Default)]
pub struct MotionDescriptor {
    /// Algorithm-specific score (MSE, mean flow magnitude, changed fraction)
    pub score: f64,
    /// Changed area in pixels
    pub area: f64,
    pub bbox: Option<BoundingBox>,
    /// Binary mask of changed pixels, when the algorithm produces one
    pub mask: Option<GrayImage>,
}

#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub motion: bool,
    pub descriptor: MotionDescriptor,
}

pub trait MotionDetector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, current: &GrayImage, previous: &GrayImage)
        -> Result<Detection, MotionError>;

    /// Whether the detector produces intermediate masks for tuning
    fn supports_test_mode(&self) -> bool {
        true
    }

    /// Forget any accumulated model
    fn reset(&mut self) {}
}

/// Build the detector selected by configuration
pub fn detector_for(config: &MotionConfig) -> Box<dyn MotionDetector> {
    info!("Using {} motion detection", config.algorithm.as_str());
    match config.algorithm {
        MotionAlgorithm::MeanSquareDiff => Box::new(MeanSquareDiff {
            threshold: config.mse_threshold,
        }),
        MotionAlgorithm::FrameDifferencing => Box::new(FrameDifferencing {
            delta_threshold: config.delta_threshold,
            min_area: config.min_area,
        }),
        MotionAlgorithm::OpticalFlow => Box::new(OpticalFlow {
            flow_threshold: config.flow_threshold,
            min_area: config.min_area,
        }),
        MotionAlgorithm::BackgroundSubtraction => Box::new(BackgroundSubtraction {
            delta_threshold: config.delta_threshold,
            min_area: config.min_area,
            learning_rate: config.learning_rate,
            background: None,
        }),
    }
}

fn check_geometry(current: &GrayImage, previous: &GrayImage) -> Result<(), MotionError> {
    if current.dimensions() != previous.dimensions() {
        return Err(MotionError::GeometryMismatch {
            current: current.dimensions(),
            previous: previous.dimensions(),
        });
    }
    Ok(())
}

fn abs_difference(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let (width, height) = a.dimensions();
    let mut diff_image = GrayImage::new(width, height);
    for (x, y, a_pixel) in a.enumerate_pixels() {
        let diff = (a_pixel[0] as i16 - b.get_pixel(x, y)[0] as i16).unsigned_abs() as u8;
        diff_image.put_pixel(x, y, Luma([diff]));
    }
    diff_image
}

/// Remove speckle noise from a binary mask
fn clean_mask(mask: &GrayImage) -> GrayImage {
    dilate(
        &erode(mask, Norm::LInf, MORPH_KERNEL),
        Norm::LInf,
        MORPH_KERNEL,
    )
}

/// Area and bounding box of the largest 8-connected component
fn largest_component(mask: &GrayImage) -> (f64, Option<BoundingBox>) {
    let components: ImageBuffer<Luma<u32>, Vec<u32>> =
        connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut counts: HashMap<u32, (u64, u32, u32, u32, u32)> = HashMap::new();
    for (x, y, pixel) in components.enumerate_pixels() {
        let label = pixel[0];
        if label == 0 {
            continue;
        }
        let entry = counts.entry(label).or_insert((0, x, y, x, y));
        entry.0 += 1;
        entry.1 = entry.1.min(x);
        entry.2 = entry.2.min(y);
        entry.3 = entry.3.max(x);
        entry.4 = entry.4.max(y);
    }

    counts
        .values()
        .max_by_key(|entry| entry.0)
        .map(|&(count, x0, y0, x1, y1)| (count as f64, Some((x0, y0, x1 - x0 + 1, y1 - y0 + 1))))
        .unwrap_or((0.0, None))
}

/// Mean squared pixel difference between consecutive frames
pub struct MeanSquareDiff {
    pub threshold: f64,
}

impl MotionDetector for MeanSquareDiff {
    fn name(&self) -> &'static str {
        "mean_square_diff"
    }

    fn detect(
        &mut self,
        current: &GrayImage,
        previous: &GrayImage,
    ) -> Result<Detection, MotionError> {
        check_geometry(current, previous)?;

        let pixels = current.as_raw().len().max(1) as f64;
        let sum: f64 = current
            .as_raw()
            .iter()
            .zip(previous.as_raw().iter())
            .map(|(a, b)| {
                let d = *a as f64 - *b as f64;
                d * d
            })
            .sum();
        let mse = sum / pixels;

        debug!("Mean square difference {:.2} (threshold {:.2})", mse, self.threshold);
        Ok(Detection {
            motion: mse > self.threshold,
            descriptor: MotionDescriptor {
                score: mse,
                ..Default::default()
            },
        })
    }

    fn supports_test_mode(&self) -> bool {
        false
    }
}

/// Blurred absolute difference, thresholded and cleaned, measured by its largest blob
pub struct FrameDifferencing {
    pub delta_threshold: u8,
    pub min_area: f64,
}

impl MotionDetector for FrameDifferencing {
    fn name(&self) -> &'static str {
        "frame_differencing"
    }

    fn detect(
        &mut self,
        current: &GrayImage,
        previous: &GrayImage,
    ) -> Result<Detection, MotionError> {
        check_geometry(current, previous)?;

        let current = gaussian_blur_f32(current, BLUR_SIGMA);
        let previous = gaussian_blur_f32(previous, BLUR_SIGMA);
        let diff_image = abs_difference(&current, &previous);
        let mask = clean_mask(&threshold(&diff_image, self.delta_threshold));
        let (area, bbox) = largest_component(&mask);

        let total = (mask.width() * mask.height()).max(1) as f64;
        debug!(
            "Frame differencing: largest component {:.0} px (minimum {:.0})",
            area, self.min_area
        );
        Ok(Detection {
            motion: area > 0.0 && area >= self.min_area,
            descriptor: MotionDescriptor {
                score: area / total,
                area,
                bbox,
                mask: Some(mask),
            },
        })
    }
}

/// Block-wise Lucas-Kanade flow; blocks moving faster than the threshold form the mask
pub struct OpticalFlow {
    pub flow_threshold: f64,
    pub min_area: f64,
}

impl OpticalFlow {
    /// Least-squares flow (u, v) of one block, `None` when the block has no texture
    fn block_flow(previous: &GrayImage, current: &GrayImage, bx: u32, by: u32) -> Option<(f64, f64)> {
        let (width, height) = previous.dimensions();
        let (mut sxx, mut syy, mut sxy, mut sxt, mut syt) = (0.0, 0.0, 0.0, 0.0, 0.0);

        for y in by.max(1)..(by + FLOW_BLOCK).min(height - 1) {
            for x in bx.max(1)..(bx + FLOW_BLOCK).min(width - 1) {
                let p = |x: u32, y: u32| previous.get_pixel(x, y)[0] as f64;
                let c = |x: u32, y: u32| current.get_pixel(x, y)[0] as f64;
                let ix = ((p(x + 1, y) - p(x - 1, y)) + (c(x + 1, y) - c(x - 1, y))) / 4.0;
                let iy = ((p(x, y + 1) - p(x, y - 1)) + (c(x, y + 1) - c(x, y - 1))) / 4.0;
                let it = c(x, y) - p(x, y);
                sxx += ix * ix;
                syy += iy * iy;
                sxy += ix * iy;
                sxt += ix * it;
                syt += iy * it;
            }
        }

        let det = sxx * syy - sxy * sxy;
        if det.abs() < 1e-6 {
            return None;
        }
        let u = (-syy * sxt + sxy * syt) / det;
        let v = (sxy * sxt - sxx * syt) / det;
        Some((u, v))
    }
}

impl MotionDetector for OpticalFlow {
    fn name(&self) -> &'static str {
        "optical_flow"
    }

    fn detect(
        &mut self,
        current: &GrayImage,
        previous: &GrayImage,
    ) -> Result<Detection, MotionError> {
        check_geometry(current, previous)?;
        let (width, height) = current.dimensions();
        if width < 3 || height < 3 {
            return Err(MotionError::FrameProcessing {
                details: format!("frame {}x{} too small for optical flow", width, height),
            });
        }

        let current = gaussian_blur_f32(current, 1.0);
        let previous = gaussian_blur_f32(previous, 1.0);

        let mut mask = GrayImage::new(width, height);
        let mut moving_magnitude = 0.0;
        let mut moving_blocks = 0u32;

        for by in (0..height).step_by(FLOW_BLOCK as usize) {
            for bx in (0..width).step_by(FLOW_BLOCK as usize) {
                let Some((u, v)) = Self::block_flow(&previous, &current, bx, by) else {
                    continue;
                };
                let magnitude = (u * u + v * v).sqrt();
                if magnitude >= self.flow_threshold {
                    moving_magnitude += magnitude;
                    moving_blocks += 1;
                    for y in by..(by + FLOW_BLOCK).min(height) {
                        for x in bx..(bx + FLOW_BLOCK).min(width) {
                            mask.put_pixel(x, y, Luma([255]));
                        }
                    }
                }
            }
        }

        let (area, bbox) = largest_component(&mask);
        let score = if moving_blocks > 0 {
            moving_magnitude / moving_blocks as f64
        } else {
            0.0
        };

        debug!(
            "Optical flow: {} moving block(s), mean magnitude {:.2}, area {:.0}",
            moving_blocks, score, area
        );
        Ok(Detection {
            motion: area > 0.0 && area >= self.min_area,
            descriptor: MotionDescriptor {
                score,
                area,
                bbox,
                mask: Some(mask),
            },
        })
    }
}

/// Running-average background model compared against each new frame
pub struct BackgroundSubtraction {
    pub delta_threshold: u8,
    pub min_area: f64,
    pub learning_rate: f32,
    background: Option<GrayImage>,
}

impl BackgroundSubtraction {
    fn update_background_model(&mut self, current_frame: &GrayImage) {
        let learning_rate = self.learning_rate;
        if let Some(ref mut background) = self.background {
            for (bg_pixel, curr_pixel) in background.pixels_mut().zip(current_frame.pixels()) {
                let bg_val = bg_pixel[0] as f32;
                let curr_val = curr_pixel[0] as f32;
                bg_pixel[0] = (bg_val * (1.0 - learning_rate) + curr_val * learning_rate) as u8;
            }
        }
    }
}

impl MotionDetector for BackgroundSubtraction {
    fn name(&self) -> &'static str {
        "background_subtraction"
    }

    fn detect(
        &mut self,
        current: &GrayImage,
        previous: &GrayImage,
    ) -> Result<Detection, MotionError> {
        check_geometry(current, previous)?;
        let blurred = gaussian_blur_f32(current, BLUR_SIGMA);

        let stale = self
            .background
            .as_ref()
            .map(|background| background.dimensions() != blurred.dimensions())
            .unwrap_or(true);
        if stale {
            info!("Initializing background model");
            self.background = Some(gaussian_blur_f32(previous, BLUR_SIGMA));
        }
        let Some(background) = self.background.as_ref() else {
            return Ok(Detection::default());
        };

        let diff_image = abs_difference(background, &blurred);
        let mask = clean_mask(&threshold(&diff_image, self.delta_threshold));
        let (area, bbox) = largest_component(&mask);
        self.update_background_model(&blurred);

        let total = (mask.width() * mask.height()).max(1) as f64;
        debug!("Background subtraction: largest component {:.0} px", area);
        Ok(Detection {
            motion: area > 0.0 && area >= self.min_area,
            descriptor: MotionDescriptor {
                score: area / total,
                area,
                bbox,
                mask: Some(mask),
            },
        })
    }

    fn reset(&mut self) {
        self.background = None;
    }
}
