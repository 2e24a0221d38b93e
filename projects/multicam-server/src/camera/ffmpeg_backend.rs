use std::{
    io::Read,
    process::{Child, Command, Stdio},
    sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
    thread::{self, JoinHandle},
    time::Duration,
};

use image::{ImageFormat, RgbImage};
use tracing::{debug, warn};

use super::{
    jpeg::{self, JpegFrameAccumulator},
    traits::CaptureDevice,
};
use crate::{config::CameraConfig, core::errors::CaptureError};

/// V4L2 capture through an `ffmpeg` child process emitting MJPEG on stdout.
///
/// A helper thread splits the pipe into JPEG frames and hands them over a
/// bounded channel. Frames that arrive while the channel is full are dropped,
/// so the buffer depth caps capture latency.
#[derive(Debug)]
pub struct FfmpegDevice {
    device: String,
    input_format: String,
    read_timeout: Duration,
    session: Option<FfmpegSession>,
}

#[derive(Debug)]
struct FfmpegSession {
    child: Child,
    frames: Receiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
}

impl FfmpegDevice {
    pub fn new(device: String, input_format: String, read_timeout: Duration) -> Self {
        Self {
            device,
            input_format,
            read_timeout,
            session: None,
        }
    }

    fn spawn(&self, config: &CameraConfig) -> std::io::Result<Child> {
        Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "v4l2",
                "-input_format",
                &self.input_format,
                "-video_size",
                &format!("{}x{}", config.width, config.height),
                "-framerate",
                &config.fps.to_string(),
                "-i",
                &self.device,
                "-f",
                "mjpeg",
                "-q:v",
                "2",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
    }
}

impl CaptureDevice for FfmpegDevice {
    fn open(&mut self, config: &CameraConfig, buffer_frames: usize) -> Result<(), CaptureError> {
        self.release();

        let open_error = |reason: String| CaptureError::Open {
            device: self.device.clone(),
            reason,
        };
        let mut child = self
            .spawn(config)
            .map_err(|err| open_error(format!("failed to spawn ffmpeg: {err}")))?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(open_error("missing ffmpeg stdout pipe".to_string()));
        };

        let (tx, frames) = mpsc::sync_channel(buffer_frames.max(1));
        let reader = thread::Builder::new()
            .name(format!("ffmpeg-pipe-{}", config.id))
            .spawn(move || pump_frames(stdout, tx));
        let reader = match reader {
            Ok(handle) => handle,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(open_error(format!("failed to start pipe reader: {err}")));
            }
        };

        debug!("ffmpeg capture started for {}", self.device);
        self.session = Some(FfmpegSession {
            child,
            frames,
            reader: Some(reader),
        });
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        let session = self.session.as_mut().ok_or(CaptureError::NotOpen)?;
        let jpeg = match session.frames.recv_timeout(self.read_timeout) {
            Ok(jpeg) => jpeg,
            Err(RecvTimeoutError::Timeout) => return Err(CaptureError::Timeout(self.read_timeout)),
            Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Closed),
        };
        if !jpeg::is_jpeg(&jpeg) {
            return Err(CaptureError::Read("pipe frame without SOI marker".to_string()));
        }
        let image = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)?;
        Ok(image.to_rgb8())
    }

    fn release(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Err(err) = session.child.kill() {
            warn!("failed to kill ffmpeg capture for {}: {err}", self.device);
        }
        if let Err(err) = session.child.wait() {
            warn!("failed to wait ffmpeg capture for {}: {err}", self.device);
        }
        // The pipe reader exits once the child's stdout reaches EOF.
        drop(session.frames);
        if let Some(reader) = session.reader.take() {
            let _ = reader.join();
        }
        debug!("ffmpeg capture released for {}", self.device);
    }
}

impl Drop for FfmpegDevice {
    fn drop(&mut self) {
        self.release();
    }
}

fn pump_frames(mut stdout: impl Read, tx: SyncSender<Vec<u8>>) {
    let mut buffer = vec![0_u8; 64 * 1024];
    let mut frame_acc = JpegFrameAccumulator::new();
    loop {
        match stdout.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let Some(frame) = frame_acc.push_chunk(&buffer[..n]) else {
                    continue;
                };
                match tx.try_send(frame) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, sync::mpsc, time::Duration};

    use super::{FfmpegDevice, pump_frames};
    use crate::{camera::traits::CaptureDevice, core::errors::CaptureError};

    #[test]
    fn read_before_open_reports_not_open() {
        let mut device = FfmpegDevice::new(
            "/dev/video99".to_string(),
            "mjpeg".to_string(),
            Duration::from_millis(10),
        );
        assert!(matches!(device.read(), Err(CaptureError::NotOpen)));
    }

    #[test]
    fn pipe_pump_drops_frames_when_buffer_is_full() {
        let mut pipe = Vec::new();
        for payload in [b"one", b"two", b"thr"] {
            pipe.extend_from_slice(&[0xFF, 0xD8]);
            pipe.extend_from_slice(payload);
            pipe.extend_from_slice(&[0xFF, 0xD9]);
        }

        // Small reads so each frame is completed by its own chunk.
        struct Trickle(Cursor<Vec<u8>>);
        impl std::io::Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let len = buf.len().min(7);
                self.0.read(&mut buf[..len])
            }
        }

        let (tx, rx) = mpsc::sync_channel(1);
        pump_frames(Trickle(Cursor::new(pipe)), tx);

        let frames: Vec<Vec<u8>> = rx.try_iter().collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][2..5], b"one");
    }
}
