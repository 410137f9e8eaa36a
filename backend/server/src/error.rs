use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failures of the backing store. Cloneable so the in-memory store can replay injected outages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Boredom record not found")]
    NotFound,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write timed out, outcome unknown")]
    WriteTimeout,

    #[error("Level {0} outside 0..=100")]
    OutOfRange(i64),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Authentication failed")]
    AuthFailure,

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedPayload | AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::AuthFailure => StatusCode::UNAUTHORIZED,
            AppError::Store(StoreError::OutOfRange(_)) => StatusCode::BAD_REQUEST,
            AppError::Store(_) | AppError::Config(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
