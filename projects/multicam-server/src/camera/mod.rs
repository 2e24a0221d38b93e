pub mod ffmpeg_backend;
pub mod jpeg;
pub mod placeholder;
pub mod service;
pub mod store;
pub mod stream;
pub mod synthetic;
pub mod traits;
pub mod worker;

use ffmpeg_backend::FfmpegDevice;
use synthetic::SyntheticDevice;
use traits::{CaptureDevice, DeviceProvider};

use crate::config::{CameraConfig, CaptureBackend};

impl DeviceProvider for CaptureBackend {
    fn device_for(&self, config: &CameraConfig) -> Box<dyn CaptureDevice> {
        match self {
            Self::Ffmpeg {
                input_format,
                read_timeout,
            } => Box::new(FfmpegDevice::new(
                config.device.clone(),
                input_format.clone(),
                *read_timeout,
            )),
            Self::Synthetic => Box::new(SyntheticDevice::new()),
        }
    }
}
