use std::time::Duration;

use image::RgbImage;
use tokio::sync::oneshot;

use crate::{config::CameraConfig, core::errors::CaptureError};

/// A capture device driven from a single worker thread.
pub trait CaptureDevice: Send {
    /// Opens (or reopens) the device with the configured resolution, fps and buffer depth.
    fn open(&mut self, config: &CameraConfig, buffer_frames: usize) -> Result<(), CaptureError>;
    fn read(&mut self) -> Result<RgbImage, CaptureError>;
    fn release(&mut self);
}

/// Builds the device a worker will own for a configured camera.
pub trait DeviceProvider: Send + Sync {
    fn device_for(&self, config: &CameraConfig) -> Box<dyn CaptureDevice>;
}

/// Control surface of a running capture worker.
pub trait Worker: Send {
    fn request_stop(&self);
    /// Asks the worker to run its initialize sequence now; resolves to whether it succeeded.
    fn request_reconnect(&self) -> oneshot::Receiver<bool>;
    /// Waits up to `timeout` for the worker to exit. Returns false if it is still running.
    fn join(&mut self, timeout: Duration) -> bool;
}
