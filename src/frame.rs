use crate::error::MotionError;
use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Pixel layout of a frame handed out by a camera service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    Mjpeg,
    /// packed YUV 4:2:2
    Yuyv,
    Rgb24,
    /// 8-bit luminance
    Gray8,
}

impl FrameFormat {
    /// Zero for compressed formats
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0, // Variable size, compressed
            FrameFormat::Yuyv => 2,
            FrameFormat::Rgb24 => 3,
            FrameFormat::Gray8 => 1,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// One frame as produced by the live preview
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Monotonic per camera
    pub id: u64,
    pub timestamp: SystemTime,
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Wrap an already decoded luminance image
    pub fn from_gray(id: u64, timestamp: SystemTime, image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(id, timestamp, image.into_raw(), width, height, FrameFormat::Gray8)
    }

    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Compressed frames always pass
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }

    /// Decode into an 8-bit luminance image for analysis
    pub fn to_gray(&self) -> Result<GrayImage, MotionError> {
        if !self.validate_size() {
            return Err(MotionError::FrameProcessing {
                details: format!(
                    "frame {} has {} bytes, expected {:?}",
                    self.id,
                    self.data.len(),
                    self.expected_size()
                ),
            });
        }

        match self.format {
            FrameFormat::Mjpeg => {
                let decoded = image::load_from_memory(&self.data).map_err(|e| {
                    MotionError::FrameProcessing {
                        details: format!("MJPEG decode failed: {}", e),
                    }
                })?;
                Ok(decoded.to_luma8())
            }
            FrameFormat::Gray8 => GrayImage::from_raw(self.width, self.height, self.data.to_vec())
                .ok_or_else(|| MotionError::FrameProcessing {
                    details: "Failed to create grayscale image from raw data".to_string(),
                }),
            FrameFormat::Yuyv => Ok(self.yuyv_to_gray()),
            FrameFormat::Rgb24 => self.rgb24_to_gray(),
        }
    }

    fn yuyv_to_gray(&self) -> GrayImage {
        let width = self.width;
        let height = self.height;
        let mut gray_image = GrayImage::new(width, height);

        // YUYV format: Y0 U Y1 V (4 bytes for 2 pixels)
        for y in 0..height {
            for x in 0..(width / 2) {
                let base_idx = ((y * width / 2 + x) * 4) as usize;
                if base_idx + 3 < self.data.len() {
                    gray_image.put_pixel(x * 2, y, Luma([self.data[base_idx]]));
                    if x * 2 + 1 < width {
                        gray_image.put_pixel(x * 2 + 1, y, Luma([self.data[base_idx + 2]]));
                    }
                }
            }
        }

        gray_image
    }

    fn rgb24_to_gray(&self) -> Result<GrayImage, MotionError> {
        let rgb_image = RgbImage::from_raw(self.width, self.height, self.data.to_vec())
            .ok_or_else(|| MotionError::FrameProcessing {
                details: "Failed to create RGB image from raw data".to_string(),
            })?;

        let mut gray_image = GrayImage::new(self.width, self.height);
        for (x, y, rgb) in rgb_image.enumerate_pixels() {
            let gray_value =
                (0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32) as u8;
            gray_image.put_pixel(x, y, Luma([gray_value]));
        }

        Ok(gray_image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_validation() {
        let frame = FrameData::new(1, SystemTime::now(), vec![0; 12], 2, 2, FrameFormat::Rgb24);
        assert!(frame.validate_size());

        let short = FrameData::new(2, SystemTime::now(), vec![0; 5], 2, 2, FrameFormat::Rgb24);
        assert!(!short.validate_size());
        assert!(short.to_gray().is_err());
    }

    #[test]
    fn test_rgb_to_gray() {
        let frame = FrameData::new(
            1,
            SystemTime::now(),
            vec![255, 255, 255, 0, 0, 0],
            2,
            1,
            FrameFormat::Rgb24,
        );
        let gray = frame.to_gray().unwrap();
        assert!(gray.get_pixel(0, 0)[0] >= 254);
        assert_eq!(gray.get_pixel(1, 0)[0], 0);
    }

    #[test]
    fn test_yuyv_to_gray_takes_luma() {
        let frame = FrameData::new(
            1,
            SystemTime::now(),
            vec![10, 128, 20, 128],
            2,
            1,
            FrameFormat::Yuyv,
        );
        let gray = frame.to_gray().unwrap();
        assert_eq!(gray.get_pixel(0, 0)[0], 10);
        assert_eq!(gray.get_pixel(1, 0)[0], 20);
    }

    #[test]
    fn test_gray_roundtrip_through_frame() {
        let mut image = GrayImage::new(4, 3);
        image.put_pixel(1, 1, Luma([200]));
        let frame = FrameData::from_gray(7, SystemTime::now(), image.clone());
        assert_eq!(frame.to_gray().unwrap(), image);
    }
}
