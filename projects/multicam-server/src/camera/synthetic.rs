use image::{Rgb, RgbImage};

use super::traits::CaptureDevice;
use crate::{config::CameraConfig, core::errors::CaptureError};

const BAR_WIDTH: u32 = 24;

/// Test-pattern device used when no hardware is attached.
///
/// Produces a grey frame with a bar sweeping left to right, one step per read.
#[derive(Debug, Default)]
pub struct SyntheticDevice {
    size: Option<(u32, u32)>,
    frame_count: u64,
}

impl SyntheticDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureDevice for SyntheticDevice {
    fn open(&mut self, config: &CameraConfig, _buffer_frames: usize) -> Result<(), CaptureError> {
        self.size = Some((config.width, config.height));
        self.frame_count = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        let (width, height) = self.size.ok_or(CaptureError::NotOpen)?;
        self.frame_count += 1;

        let mut frame = RgbImage::from_pixel(width, height, Rgb([48, 48, 48]));
        let bar_x = ((self.frame_count * 8) % u64::from(width.max(1))) as u32;
        for x in bar_x..(bar_x + BAR_WIDTH).min(width) {
            for y in 0..height {
                frame.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }
        Ok(frame)
    }

    fn release(&mut self) {
        self.size = None;
    }
}
