mod app_state;
mod camera;
mod config;
mod core;
mod web;

use std::sync::Arc;

use app_state::AppState;
use camera::service::{CameraService, LifecycleSettings};
use config::AppConfig;
use tracing::{error, info};
use tracing_appender::rolling;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env()?;

    tokio::fs::create_dir_all(&config.log_dir).await?;
    let file_appender = rolling::daily(&config.log_dir, "multicam.log");
    let (non_blocking, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::INFO)
        .init();

    info!(
        "{} configured with {} camera(s), backend {:?}",
        config.app_name,
        config.cameras.len(),
        config.backend
    );

    let cameras = CameraService::new(
        config.cameras.clone(),
        config.capture.clone(),
        config.stream.clone(),
        LifecycleSettings::from(&config),
        Arc::new(config.backend.clone()),
    );
    let state = Arc::new(AppState::new(config.clone(), cameras));
    state.cameras.start().await;

    let app = web::routes::build_router(state.clone());

    info!("{} listening on {}", config.app_name, config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown requested; stopping streams and capture workers");
    state.shutdown().await;
}
