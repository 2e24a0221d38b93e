use std::{collections::BTreeSet, env, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, bail};
use serde::Serialize;

const DEFAULT_CAMERAS: &str = "0:1280x720@30:Kamera Utama;1:1280x720@30:Kamera Sekunder";

/// One physical capture device and its target parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraConfig {
    pub id: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "name")]
    pub display_name: String,
    pub device: String,
}

impl CameraConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

/// Parses `id:WIDTHxHEIGHT@FPS:name`.
impl FromStr for CameraConfig {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.trim().splitn(3, ':');
        let id = parts
            .next()
            .filter(|value| !value.is_empty())
            .context("camera entry is empty")?
            .trim()
            .parse::<u32>()
            .with_context(|| format!("invalid camera id in {raw:?}"))?;
        let mode = parts
            .next()
            .with_context(|| format!("camera {id}: missing WIDTHxHEIGHT@FPS"))?;
        let display_name = parts
            .next()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Camera {id}"));

        let (size, fps) = mode
            .split_once('@')
            .with_context(|| format!("camera {id}: expected WIDTHxHEIGHT@FPS, got {mode:?}"))?;
        let (width, height) = size
            .split_once('x')
            .with_context(|| format!("camera {id}: expected WIDTHxHEIGHT, got {size:?}"))?;

        let width: u32 = width.trim().parse().context("invalid width")?;
        let height: u32 = height.trim().parse().context("invalid height")?;
        let fps: u32 = fps.trim().parse().context("invalid fps")?;
        if width == 0 || height == 0 || fps == 0 {
            bail!("camera {id}: width, height and fps must be greater than zero");
        }

        Ok(Self {
            id,
            fps,
            width,
            height,
            display_name,
            device: format!("/dev/video{id}"),
        })
    }
}

/// What to do when a device cannot be opened the first time its worker starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialOpenPolicy {
    /// Park the worker in `stopped` until an explicit reconnect.
    FailFast,
    /// Run the regular reconnect sequence.
    Retry,
}

impl FromStr for InitialOpenPolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "fail_fast" | "failfast" => Ok(Self::FailFast),
            "retry" => Ok(Self::Retry),
            other => bail!("unknown initial open policy: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturePolicy {
    pub initial_open: InitialOpenPolicy,
    pub warmup_reads: u32,
    pub warmup_delay: Duration,
    pub error_threshold: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    pub buffer_frames: usize,
    pub jpeg_quality: u8,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            initial_open: InitialOpenPolicy::FailFast,
            warmup_reads: 5,
            warmup_delay: Duration::from_millis(100),
            error_threshold: 5,
            max_reconnect_attempts: 10,
            reconnect_backoff: Duration::from_secs(2),
            buffer_frames: 2,
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub frame_timeout: Duration,
    pub placeholder_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_secs(5),
            placeholder_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureBackend {
    Ffmpeg {
        input_format: String,
        read_timeout: Duration,
    },
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub bind_addr: SocketAddr,
    pub log_dir: String,
    pub cameras: Vec<CameraConfig>,
    pub backend: CaptureBackend,
    pub capture: CapturePolicy,
    pub stream: StreamSettings,
    pub startup_stagger: Duration,
    pub shutdown_timeout: Duration,
    pub reconnect_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let app_name =
            env::var("APP_NAME").unwrap_or_else(|_| "Multi Camera Streaming Server".to_owned());
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_owned())
            .parse()?;
        let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_owned());

        let cameras_raw = env::var("CAMERAS")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CAMERAS.to_owned());
        let mut cameras = parse_cameras(&cameras_raw)?;
        for camera in &mut cameras {
            if let Ok(device) = env::var(format!("CAMERA_{}_DEVICE", camera.id)) {
                if !device.trim().is_empty() {
                    camera.device = device.trim().to_owned();
                }
            }
        }

        let backend = match env::var("CAPTURE_BACKEND")
            .unwrap_or_else(|_| "ffmpeg".to_owned())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "ffmpeg" => CaptureBackend::Ffmpeg {
                input_format: env::var("CAMERA_INPUT_FORMAT")
                    .unwrap_or_else(|_| "mjpeg".to_owned()),
                read_timeout: env_millis("CAPTURE_READ_TIMEOUT_MS", 2_000),
            },
            "synthetic" => CaptureBackend::Synthetic,
            other => bail!("unknown CAPTURE_BACKEND: {other}"),
        };

        let defaults = CapturePolicy::default();
        let initial_open = match env::var("INITIAL_OPEN_POLICY") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.initial_open,
        };
        let capture = CapturePolicy {
            initial_open,
            warmup_reads: env_parse("WARMUP_READS", defaults.warmup_reads).max(1),
            warmup_delay: defaults.warmup_delay,
            error_threshold: env_parse("CAPTURE_ERROR_THRESHOLD", defaults.error_threshold).max(1),
            max_reconnect_attempts: env_parse(
                "RECONNECT_MAX_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            reconnect_backoff: env_millis("RECONNECT_BACKOFF_MS", 2_000),
            buffer_frames: env_parse("CAPTURE_BUFFER_FRAMES", defaults.buffer_frames).max(1),
            jpeg_quality: env_parse("JPEG_QUALITY", defaults.jpeg_quality).clamp(1, 100),
        };

        let stream = StreamSettings {
            frame_timeout: env_millis("STREAM_FRAME_TIMEOUT_MS", 5_000),
            ..StreamSettings::default()
        };

        Ok(Self {
            app_name,
            bind_addr,
            log_dir,
            cameras,
            backend,
            capture,
            stream,
            startup_stagger: env_millis("STARTUP_STAGGER_MS", 1_000),
            shutdown_timeout: env_millis("SHUTDOWN_TIMEOUT_MS", 3_000),
            reconnect_timeout: env_millis("RECONNECT_TIMEOUT_MS", 30_000),
        })
    }
}

pub fn parse_cameras(raw: &str) -> anyhow::Result<Vec<CameraConfig>> {
    let cameras = raw
        .split(';')
        .filter(|entry| !entry.trim().is_empty())
        .map(CameraConfig::from_str)
        .collect::<anyhow::Result<Vec<_>>>()?;
    if cameras.is_empty() {
        bail!("no cameras configured");
    }

    let mut seen = BTreeSet::new();
    for camera in &cameras {
        if !seen.insert(camera.id) {
            bail!("camera id {} configured more than once", camera.id);
        }
    }
    Ok(cameras)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_parse(key, default_ms))
}
