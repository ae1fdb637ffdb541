//! HTTP error payloads and mapping from domain errors.
//!
//! Keep the domain free of transport concerns by translating domain errors
//! into Actix responses here. The wire shape is `{error, message}` plus a
//! `traceId` when the request-tracing middleware is active; structured
//! details stay server-side in the logs.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::domain::{Error, ErrorCode};
use crate::middleware::trace::current_trace_id;

/// Adapter wrapper giving domain errors an HTTP rendering.
#[derive(Debug, Clone)]
pub struct ApiError(Error);

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        self.0.code()
    }

    pub fn message(&self) -> &str {
        self.0.message()
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0.code() {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let trace_id = current_trace_id();
        if matches!(self.0.code(), ErrorCode::InternalError) {
            error!(
                message = self.0.message(),
                details = ?self.0.details(),
                trace_id = trace_id.as_deref(),
                "internal error"
            );
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.0.code().as_str(),
            message: self.0.message(),
            trace_id,
        })
    }
}

/// Convenience alias for HTTP handlers.
pub type ApiResult<T> = Result<T, ApiError>;
