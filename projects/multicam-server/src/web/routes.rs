use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app_state::AppState;

use super::handlers;

pub fn build_router(state: Arc<AppState>) -> Router {
    let camera_routes = Router::new()
        .route("/camera/{id}", get(handlers::camera_stream))
        .route("/camera/{id}/snapshot", get(handlers::camera_snapshot))
        .route("/camera/{id}/status", get(handlers::camera_status))
        .route("/camera/{id}/reconnect", post(handlers::camera_reconnect));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .merge(camera_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
