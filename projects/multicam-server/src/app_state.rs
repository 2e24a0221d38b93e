use tokio::sync::watch;

use crate::{camera::service::CameraService, config::AppConfig};

pub struct AppState {
    pub config: AppConfig,
    pub cameras: CameraService,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: AppConfig, cameras: CameraService) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            cameras,
            shutdown,
        }
    }

    /// Receiver that flips to `true` once the server starts shutting down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ends every open stream and stops the capture workers.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.cameras.shutdown().await;
    }
}
