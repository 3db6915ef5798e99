use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Exam session opens at {opens_at}")]
    TooEarly { opens_at: DateTime<Utc> },

    #[error("Exam session ended at {ended_at}")]
    SessionEnded { ended_at: DateTime<Utc> },

    #[error("Exam has already been submitted")]
    AlreadySubmitted,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Scoring service error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Stable machine-readable code sent to clients next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::BadRequest(_) | Error::Json(_) => "bad_request",
            Error::Validation(_) => "validation",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::TooEarly { .. } => "too_early",
            Error::SessionEnded { .. } => "session_ended",
            Error::AlreadySubmitted => "already_submitted",
            Error::InvalidState(_) => "invalid_state",
            Error::Database(_) => "database",
            Error::Reqwest(_) | Error::Upstream(_) => "upstream",
            Error::Anyhow(_) | Error::Internal(_) | Error::Io(_) | Error::Image(_) => "internal",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let code = self.code();
        let boundary = match &self {
            Error::TooEarly { opens_at } => Some(("opens_at", *opens_at)),
            Error::SessionEnded { ended_at } => Some(("ended_at", *ended_at)),
            _ => None,
        };
        let (status, message) = match self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Error::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::TooEarly { opens_at } => (
                StatusCode::FORBIDDEN,
                format!("The exam session is not open yet. It opens at {}", opens_at.to_rfc3339()),
            ),
            Error::SessionEnded { ended_at } => (
                StatusCode::FORBIDDEN,
                format!("The exam session ended at {}", ended_at.to_rfc3339()),
            ),
            Error::AlreadySubmitted => (
                StatusCode::CONFLICT,
                "Exam has already been submitted".to_string(),
            ),
            Error::InvalidState(msg) => (StatusCode::CONFLICT, msg),
            Error::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Database(err) => {
                tracing::error!(error = ?err, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            Error::Reqwest(err) => (
                StatusCode::BAD_GATEWAY,
                format!("External service error: {}", err),
            ),
            Error::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            other => {
                tracing::error!(error = %other, "unexpected error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let mut body = json!({ "error": code, "message": message });
        if let Some((field, at)) = boundary {
            body[field] = json!(at);
        }
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
