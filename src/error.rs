use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

/// Error kinds surfaced at module boundaries. Background workers never let
/// these propagate past a single unit of work — see `scheduled_jobs.rs` and
/// `session_lifecycle.rs` for the per-unit isolation.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("auth failure: {0}")]
    Auth(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("corrupt session blob")]
    CorruptSession,

    #[error("merge-back userId mismatch")]
    MergeMismatch,

    #[error("producer unhealthy: {0}")]
    Producer(String),
}

#[derive(Serialize)]
struct ErrorEnvelope {
    status: u16,
    message: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::CorruptSession => StatusCode::UNAUTHORIZED,
            AppError::MergeMismatch => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Producer(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorEnvelope {
            status: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
