//! Error taxonomy shared by the core and the HTTP boundary.
//!
//! The core only ever returns [`ServiceError`]; the boundary converts it (and
//! request validation failures) into an [`ApiError`], which renders the JSON
//! envelope `{ statusCode, message, error }`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failures surfaced by the service layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The provider reported the video id as unknown or unavailable.
    #[error("{0}")]
    NotFound(String),

    /// The provider failed for any other reason (network, bad payload, ...).
    #[error("Upstream provider error: {0}")]
    Upstream(String),

    /// The media subprocess failed while combining audio and video.
    #[error("Muxing failed: {0}")]
    Mux(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Mux(_) | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ServiceError::Internal(message.into())
    }
}

/// A request that failed validation at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::new(err.status(), err.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::bad_request(err.0)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope<'a> {
    status_code: u16,
    message: &'a str,
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }

        let label = error_label(self.status);
        let envelope = ErrorEnvelope {
            status_code: self.status.as_u16(),
            message: &self.message,
            error: &label,
        };
        let body = Json(&envelope).into_response();
        (self.status, body).into_response()
    }
}

/// Names the error class for a status: the reason phrase with an `Error`
/// suffix, e.g. `Not Found Error`, unless the phrase already ends in one.
fn error_label(status: StatusCode) -> String {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    if reason.ends_with("Error") {
        reason.to_owned()
    } else {
        format!("{reason} Error")
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
