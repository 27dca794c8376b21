//! Error kinds the HTTP surface distinguishes, and their status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Path missing, or present but not a directory.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Unknown scan or snapshot identifier.
    #[error("{0} not found")]
    NotFound(String),

    /// A scan operation aimed at a comparison snapshot, or the reverse.
    #[error("{0}")]
    ConflictingSnapshotType(String),

    /// A stored snapshot's root or target no longer exists on disk.
    #[error("stale root: {0}")]
    StaleRoot(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPath(_) | Self::ConflictingSnapshotType(_) | Self::StaleRoot(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            tracing::error!(%err, "internal error while handling request");
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
