use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::Serialize;
use tracing::{error, info, warn};

use super::{
    store::{Frame, FrameStore},
    stream::StreamGenerator,
    traits::{DeviceProvider, Worker},
    worker::CaptureWorker,
};
use crate::{
    config::{AppConfig, CameraConfig, CapturePolicy, StreamSettings},
    core::state::WorkerPhase,
};

#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub camera_id: u32,
    pub connected: bool,
    pub error_count: u64,
    pub reconnect_attempts: u32,
    pub state: WorkerPhase,
    pub config: CameraConfig,
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub startup_stagger: Duration,
    pub shutdown_timeout: Duration,
    pub reconnect_timeout: Duration,
}

impl From<&AppConfig> for LifecycleSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            startup_stagger: config.startup_stagger,
            shutdown_timeout: config.shutdown_timeout,
            reconnect_timeout: config.reconnect_timeout,
        }
    }
}

/// Owns the capture workers of every configured camera.
pub struct CameraService {
    cameras: Vec<CameraConfig>,
    policy: CapturePolicy,
    stream_settings: StreamSettings,
    lifecycle: LifecycleSettings,
    provider: Arc<dyn DeviceProvider>,
    store: FrameStore,
    workers: Mutex<BTreeMap<u32, Box<dyn Worker>>>,
}

impl CameraService {
    pub fn new(
        cameras: Vec<CameraConfig>,
        policy: CapturePolicy,
        stream_settings: StreamSettings,
        lifecycle: LifecycleSettings,
        provider: Arc<dyn DeviceProvider>,
    ) -> Self {
        Self {
            cameras,
            policy,
            stream_settings,
            lifecycle,
            provider,
            store: FrameStore::new(),
            workers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn camera(&self, camera_id: u32) -> Option<&CameraConfig> {
        self.cameras.iter().find(|camera| camera.id == camera_id)
    }

    /// Starts one worker per camera, pausing between devices so they do not
    /// contend for the capture bus at the same time.
    pub async fn start(&self) {
        info!("starting {} camera worker(s)", self.cameras.len());
        for (index, camera) in self.cameras.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.lifecycle.startup_stagger).await;
            }
            self.start_camera(camera);
        }
    }

    fn start_camera(&self, camera: &CameraConfig) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if workers.contains_key(&camera.id) {
            warn!("camera {} already has a capture worker", camera.id);
            return;
        }

        let slot = self.store.register(camera.id);
        let device = self.provider.device_for(camera);
        match CaptureWorker::spawn(camera.clone(), self.policy.clone(), device, slot) {
            Ok(handle) => {
                workers.insert(camera.id, Box::new(handle));
            }
            Err(err) => error!("failed to start capture thread for camera {}: {err}", camera.id),
        }
    }

    /// Stops every worker and waits for each one up to the shutdown timeout.
    pub async fn shutdown(&self) {
        let workers: Vec<(u32, Box<dyn Worker>)> = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *workers).into_iter().collect()
        };
        for (_, worker) in &workers {
            worker.request_stop();
        }

        let timeout = self.lifecycle.shutdown_timeout;
        let joined = tokio::task::spawn_blocking(move || {
            for (camera_id, mut worker) in workers {
                if worker.join(timeout) {
                    info!("camera {camera_id} worker joined");
                } else {
                    warn!("camera {camera_id} worker did not stop within {timeout:?}; leaving it detached");
                }
            }
        })
        .await;
        if let Err(err) = joined {
            error!("failed to join capture workers: {err}");
        }
    }

    /// Runs the initialize sequence for one camera right away.
    ///
    /// Returns `None` for an unknown camera, otherwise whether the device came back.
    pub async fn reconnect(&self, camera_id: u32) -> Option<bool> {
        self.camera(camera_id)?;
        let reply = {
            let workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.get(&camera_id).map(|worker| worker.request_reconnect())
        };
        let Some(reply) = reply else {
            warn!("reconnect requested for camera {camera_id} without a running worker");
            return Some(false);
        };

        match tokio::time::timeout(self.lifecycle.reconnect_timeout, reply).await {
            Ok(Ok(success)) => {
                info!("camera {camera_id} reconnect finished: success={success}");
                Some(success)
            }
            Ok(Err(_)) => Some(false),
            Err(_) => {
                warn!("camera {camera_id} reconnect did not finish within {:?}", self.lifecycle.reconnect_timeout);
                Some(false)
            }
        }
    }

    pub fn status(&self, camera_id: u32) -> Option<CameraStatus> {
        let config = self.camera(camera_id)?;
        let state = self.store.get_status(camera_id).unwrap_or_default();
        Some(CameraStatus {
            camera_id,
            connected: state.connected,
            error_count: state.error_count,
            reconnect_attempts: state.reconnect_attempts,
            state: state.state,
            config: config.clone(),
        })
    }

    pub fn status_all(&self) -> Vec<CameraStatus> {
        self.cameras
            .iter()
            .filter_map(|camera| self.status(camera.id))
            .collect()
    }

    pub fn latest_frame(&self, camera_id: u32) -> Option<Frame> {
        self.store.get(camera_id)
    }

    /// New per-client frame stream, or `None` for an unknown camera.
    pub fn stream(&self, camera_id: u32) -> Option<StreamGenerator> {
        let config = self.camera(camera_id)?;
        let slot = self.store.register(camera_id);
        Some(StreamGenerator::new(config, slot, self.stream_settings.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use image::RgbImage;
    use tokio::time::{Instant, sleep};

    use super::{CameraService, LifecycleSettings};
    use crate::{
        camera::{
            synthetic::SyntheticDevice,
            traits::{CaptureDevice, DeviceProvider},
        },
        config::{CameraConfig, CapturePolicy, StreamSettings, parse_cameras},
        core::{errors::CaptureError, state::WorkerPhase},
    };

    /// Synthetic cameras, except ids listed in `broken` which fail to open until `healed`.
    struct TestProvider {
        broken: Vec<u32>,
        healed: Arc<AtomicBool>,
    }

    struct GatedDevice {
        inner: SyntheticDevice,
        healed: Arc<AtomicBool>,
    }

    impl CaptureDevice for GatedDevice {
        fn open(&mut self, config: &CameraConfig, buffer_frames: usize) -> Result<(), CaptureError> {
            if !self.healed.load(Ordering::SeqCst) {
                return Err(CaptureError::Open {
                    device: config.device.clone(),
                    reason: "unplugged".to_string(),
                });
            }
            self.inner.open(config, buffer_frames)
        }

        fn read(&mut self) -> Result<RgbImage, CaptureError> {
            self.inner.read()
        }

        fn release(&mut self) {
            self.inner.release();
        }
    }

    impl DeviceProvider for TestProvider {
        fn device_for(&self, config: &CameraConfig) -> Box<dyn CaptureDevice> {
            if self.broken.contains(&config.id) {
                Box::new(GatedDevice {
                    inner: SyntheticDevice::new(),
                    healed: self.healed.clone(),
                })
            } else {
                Box::new(SyntheticDevice::new())
            }
        }
    }

    fn service(broken: Vec<u32>, healed: Arc<AtomicBool>) -> CameraService {
        let cameras = parse_cameras("0:64x48@50:Front;1:64x48@50:Rear").expect("cameras parse");
        let policy = CapturePolicy {
            warmup_delay: Duration::from_millis(1),
            reconnect_backoff: Duration::from_millis(5),
            ..CapturePolicy::default()
        };
        let lifecycle = LifecycleSettings {
            startup_stagger: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(3),
            reconnect_timeout: Duration::from_secs(5),
        };
        CameraService::new(
            cameras,
            policy,
            StreamSettings::default(),
            lifecycle,
            Arc::new(TestProvider { broken, healed }),
        )
    }

    async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn start_staggers_devices_and_reports_status() {
        let service = service(Vec::new(), Arc::new(AtomicBool::new(true)));

        let started = Instant::now();
        service.start().await;
        assert!(started.elapsed() >= Duration::from_millis(200));

        wait_for("both cameras", || service.status_all().iter().all(|s| s.connected)).await;
        let status = service.status(1).expect("camera 1 is configured");
        assert_eq!(status.config.display_name, "Rear");
        assert_eq!(status.state, WorkerPhase::Capturing);
        assert!(service.status(7).is_none());

        service.shutdown().await;
        assert!(service.status_all().iter().all(|s| !s.connected));
    }

    #[tokio::test]
    async fn broken_camera_does_not_affect_healthy_one() {
        let healed = Arc::new(AtomicBool::new(false));
        let service = service(vec![1], healed.clone());
        service.start().await;

        wait_for("camera 1 to park", || {
            service.status(1).is_some_and(|s| s.state == WorkerPhase::Stopped)
        })
        .await;
        wait_for("camera 0 frames", || service.latest_frame(0).is_some()).await;
        assert!(service.status(0).expect("camera 0").connected);
        assert!(service.latest_frame(1).is_none());

        assert_eq!(service.reconnect(1).await, Some(false));
        healed.store(true, Ordering::SeqCst);
        assert_eq!(service.reconnect(1).await, Some(true));
        assert!(service.status(1).expect("camera 1").connected);
        assert_eq!(service.reconnect(9).await, None);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn reconnect_after_shutdown_reports_failure() {
        let service = service(Vec::new(), Arc::new(AtomicBool::new(true)));
        service.start().await;
        service.shutdown().await;
        assert_eq!(service.reconnect(0).await, Some(false));
    }

    #[tokio::test]
    async fn stream_is_only_available_for_configured_cameras() {
        let service = service(Vec::new(), Arc::new(AtomicBool::new(true)));
        service.start().await;
        wait_for("camera 0 frames", || service.latest_frame(0).is_some()).await;

        let mut generator = service.stream(0).expect("camera 0 is configured");
        let chunk = generator.next_chunk().await.expect("frame chunk");
        assert!(chunk.starts_with(b"--frame\r\n"));
        assert!(service.stream(5).is_none());

        service.shutdown().await;
    }
}
