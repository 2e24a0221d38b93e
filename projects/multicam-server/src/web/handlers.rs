use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA},
    },
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::info;

use crate::{
    app_state::AppState,
    camera::{
        service::CameraStatus,
        stream::{self, BOUNDARY},
    },
    config::CameraConfig,
    core::{errors::AppError, state::WorkerPhase},
};

const X_CAMERA_STATUS: HeaderName = HeaderName::from_static("x-camera-status");
const X_FRAME_SEQ: HeaderName = HeaderName::from_static("x-frame-seq");
const X_FRAME_AGE_MS: HeaderName = HeaderName::from_static("x-frame-age-ms");

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CameraSummary {
    camera_id: u32,
    connected: bool,
    error_count: u64,
    state: WorkerPhase,
    config: CameraConfig,
}

impl From<CameraStatus> for CameraSummary {
    fn from(status: CameraStatus) -> Self {
        Self {
            camera_id: status.camera_id,
            connected: status.connected,
            error_count: status.error_count,
            state: status.state,
            config: status.config,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    message: String,
    status: &'static str,
    cameras: Vec<CameraSummary>,
}

#[derive(Debug, Serialize)]
pub struct ReconnectResponse {
    camera_id: u32,
    reconnect_success: bool,
}

pub async fn root(State(state): State<Arc<AppState>>) -> Json<RootResponse> {
    let cameras = state
        .cameras
        .status_all()
        .into_iter()
        .map(CameraSummary::from)
        .collect();
    Json(RootResponse {
        message: state.config.app_name.clone(),
        status: "running",
        cameras,
    })
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn camera_stream(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<u32>,
) -> Result<Response, AppError> {
    let generator = state
        .cameras
        .stream(camera_id)
        .ok_or_else(|| AppError::camera_not_found(camera_id))?;
    let shutdown = state.shutdown_signal();
    if *shutdown.borrow() {
        return Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "server is shutting down",
        ));
    }
    let connected = state
        .cameras
        .status(camera_id)
        .is_some_and(|status| status.connected);

    let (body, _task) = stream::spawn_stream(generator, shutdown);
    info!("camera {camera_id} stream opened (connected={connected})");

    let content_type = format!("multipart/x-mixed-replace; boundary={BOUNDARY}");
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .map_err(|err| AppError::internal(format!("invalid content type: {err}")))?,
    );
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers.insert(
        X_CAMERA_STATUS,
        HeaderValue::from_static(if connected { "connected" } else { "disconnected" }),
    );

    Ok((StatusCode::OK, headers, Body::from_stream(body)).into_response())
}

pub async fn camera_snapshot(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<u32>,
) -> Result<Response, AppError> {
    state
        .cameras
        .camera(camera_id)
        .ok_or_else(|| AppError::camera_not_found(camera_id))?;
    let frame = state.cameras.latest_frame(camera_id).ok_or_else(|| {
        AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("camera {camera_id} has no frame yet"),
        )
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(X_FRAME_SEQ, HeaderValue::from(frame.seq));
    headers.insert(
        X_FRAME_AGE_MS,
        HeaderValue::from(frame.captured_at.elapsed().as_millis() as u64),
    );
    Ok((StatusCode::OK, headers, Body::from(frame.jpeg)).into_response())
}

pub async fn camera_status(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<u32>,
) -> Result<Json<CameraStatus>, AppError> {
    state
        .cameras
        .status(camera_id)
        .map(Json)
        .ok_or_else(|| AppError::camera_not_found(camera_id))
}

pub async fn camera_reconnect(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<u32>,
) -> Result<Json<ReconnectResponse>, AppError> {
    info!("manual reconnect requested for camera {camera_id}");
    let reconnect_success = state
        .cameras
        .reconnect(camera_id)
        .await
        .ok_or_else(|| AppError::camera_not_found(camera_id))?;
    Ok(Json(ReconnectResponse {
        camera_id,
        reconnect_success,
    }))
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc, time::Duration};

    use axum::{
        body::to_bytes,
        extract::{Path, State},
        http::{
            StatusCode,
            header::{CACHE_CONTROL, CONTENT_TYPE},
        },
        response::IntoResponse,
    };
    use serde_json::Value;
    use tokio::time::{Instant, sleep};

    use crate::{
        app_state::AppState,
        camera::service::{CameraService, LifecycleSettings},
        config::{
            AppConfig, CaptureBackend, CapturePolicy, StreamSettings, parse_cameras,
        },
    };

    use super::{camera_reconnect, camera_snapshot, camera_status, camera_stream, health, root};

    fn test_state() -> Arc<AppState> {
        let config = AppConfig {
            app_name: "Multi Camera Streaming Server".to_string(),
            bind_addr: "127.0.0.1:8080"
                .parse::<SocketAddr>()
                .expect("socket addr should parse"),
            log_dir: "logs".to_string(),
            cameras: parse_cameras("0:64x48@30:Kamera Utama;1:64x48@30:Kamera Sekunder")
                .expect("cameras should parse"),
            backend: CaptureBackend::Synthetic,
            capture: CapturePolicy {
                warmup_delay: Duration::from_millis(1),
                ..CapturePolicy::default()
            },
            stream: StreamSettings::default(),
            startup_stagger: Duration::from_millis(1),
            shutdown_timeout: Duration::from_secs(3),
            reconnect_timeout: Duration::from_secs(5),
        };
        let cameras = CameraService::new(
            config.cameras.clone(),
            config.capture.clone(),
            config.stream.clone(),
            LifecycleSettings::from(&config),
            Arc::new(config.backend.clone()),
        );
        Arc::new(AppState::new(config, cameras))
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be json")
    }

    async fn wait_connected(state: &AppState, camera_id: u32) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !state
            .cameras
            .status(camera_id)
            .is_some_and(|status| status.connected)
        {
            assert!(Instant::now() < deadline, "camera {camera_id} never connected");
            sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn root_lists_every_configured_camera() {
        let state = test_state();
        let body = json_body(root(State(state)).await.into_response()).await;

        assert_eq!(body["status"], "running");
        assert_eq!(body["message"], "Multi Camera Streaming Server");
        let cameras = body["cameras"].as_array().expect("cameras array");
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[1]["camera_id"], 1);
        assert_eq!(cameras[1]["connected"], false);
        assert_eq!(cameras[1]["state"], "initializing");
        assert_eq!(cameras[1]["config"]["name"], "Kamera Sekunder");
    }

    #[tokio::test]
    async fn unknown_camera_is_not_found_everywhere() {
        let state = test_state();

        let err = camera_stream(State(state.clone()), Path(9))
            .await
            .expect_err("stream should fail");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = camera_snapshot(State(state.clone()), Path(9))
            .await
            .expect_err("snapshot should fail");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = camera_status(State(state.clone()), Path(9))
            .await
            .expect_err("status should fail");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = camera_reconnect(State(state), Path(9))
            .await
            .expect_err("reconnect should fail");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_sets_multipart_and_no_cache_headers() {
        let state = test_state();
        let response = camera_stream(State(state), Path(0))
            .await
            .expect("stream should open");

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "multipart/x-mixed-replace; boundary=frame");
        assert_eq!(headers[CACHE_CONTROL], "no-cache, no-store, must-revalidate");
        assert_eq!(headers["pragma"], "no-cache");
        assert_eq!(headers["expires"], "0");
        assert_eq!(headers["x-camera-status"], "disconnected");
    }

    #[tokio::test]
    async fn snapshot_needs_a_captured_frame() {
        let state = test_state();
        let err = camera_snapshot(State(state.clone()), Path(0))
            .await
            .expect_err("no frame before start");
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        state.cameras.start().await;
        wait_connected(&state, 0).await;
        let deadline = Instant::now() + Duration::from_secs(10);
        while state.cameras.latest_frame(0).is_none() {
            assert!(Instant::now() < deadline, "camera 0 never published a frame");
            sleep(Duration::from_millis(5)).await;
        }

        let response = camera_snapshot(State(state.clone()), Path(0))
            .await
            .expect("snapshot should exist");
        assert_eq!(response.headers()[CONTENT_TYPE], "image/jpeg");
        assert!(response.headers().contains_key("x-frame-seq"));
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        assert!(bytes.starts_with(&[0xFF, 0xD8]));

        state.shutdown().await;
    }

    #[tokio::test]
    async fn status_and_reconnect_follow_the_worker() {
        let state = test_state();
        state.cameras.start().await;
        wait_connected(&state, 0).await;

        let body = json_body(
            camera_status(State(state.clone()), Path(0))
                .await
                .expect("status should exist")
                .into_response(),
        )
        .await;
        assert_eq!(body["camera_id"], 0);
        assert_eq!(body["connected"], true);
        assert_eq!(body["error_count"], 0);
        assert_eq!(body["reconnect_attempts"], 0);
        assert_eq!(body["state"], "capturing");
        assert_eq!(body["config"]["fps"], 30);

        let body = json_body(
            camera_reconnect(State(state.clone()), Path(1))
                .await
                .expect("reconnect should run")
                .into_response(),
        )
        .await;
        assert_eq!(body["camera_id"], 1);
        assert_eq!(body["reconnect_success"], true);

        let response = camera_stream(State(state.clone()), Path(1))
            .await
            .expect("stream should open");
        assert_eq!(response.headers()["x-camera-status"], "connected");
        drop(response);

        state.shutdown().await;
        let err = camera_stream(State(state), Path(0))
            .await
            .expect_err("no new streams after shutdown");
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
