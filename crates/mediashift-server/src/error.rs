//! Service error type that converts to HTTP responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::download::DownloadError;

/// Every failure surfaced at the HTTP boundary, shaped into
/// `{success: false, error, details?}` with a 400/500 split.
#[derive(Debug)]
pub enum AppError {
    BadRequest {
        error: String,
        details: Option<String>,
    },
    Internal {
        error: String,
        details: Option<String>,
    },
}

impl AppError {
    pub fn bad_request(error: impl Into<String>) -> Self {
        AppError::BadRequest {
            error: error.into(),
            details: None,
        }
    }

    pub fn bad_request_with(error: impl Into<String>, details: impl Into<String>) -> Self {
        AppError::BadRequest {
            error: error.into(),
            details: Some(details.into()),
        }
    }

    pub fn internal(error: impl Into<String>) -> Self {
        AppError::Internal {
            error: error.into(),
            details: None,
        }
    }

    pub fn internal_with(error: impl Into<String>, details: impl Into<String>) -> Self {
        AppError::Internal {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            AppError::BadRequest { error, details } => (StatusCode::BAD_REQUEST, error, details),
            AppError::Internal { error, details } => {
                tracing::error!(error = %error, details = ?details, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, error, details)
            }
        };

        let mut body = json!({ "success": false, "error": error });
        if let Some(details) = details {
            body["details"] = json!(details);
        }

        (status, axum::Json(body)).into_response()
    }
}

impl From<DownloadError> for AppError {
    fn from(e: DownloadError) -> Self {
        AppError::bad_request_with("Failed to download file", e.to_string())
    }
}
