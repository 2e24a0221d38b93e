use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures raised by a capture device. They never leave the owning worker.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open device {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("frame read failed: {0}")]
    Read(String),

    #[error("no frame within {0:?}")]
    Timeout(std::time::Duration),

    #[error("frame decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("device is not open")]
    NotOpen,

    #[error("device stream closed")]
    Closed,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn camera_not_found(camera_id: u32) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("camera {camera_id} not found"),
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}
