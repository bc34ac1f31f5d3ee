use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::domain::error::SsrmError;

/// API-layer error type
#[derive(Debug)]
pub enum ApiError {
    /// 400 - body is not a well-formed grid request
    BadRequest(String),

    /// Failure raised while validating or running the request
    Ssrm(SsrmError),
}

/// JSON error response body
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Ssrm(err) => match err {
                SsrmError::InvalidColumn(_)
                | SsrmError::InvalidRequest(_)
                | SsrmError::IncompatibleAggregate { .. } => StatusCode::BAD_REQUEST,
                SsrmError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                SsrmError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                SsrmError::Cancelled => StatusCode::REQUEST_TIMEOUT,
                SsrmError::Query { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Ssrm(err) => match err {
                SsrmError::InvalidColumn(_) => "invalid_column",
                SsrmError::InvalidRequest(_) => "invalid_request",
                SsrmError::IncompatibleAggregate { .. } => "incompatible_aggregate",
                SsrmError::Unavailable(_) => "unavailable",
                SsrmError::Timeout => "timeout",
                SsrmError::Cancelled => "cancelled",
                SsrmError::Query { .. } => "query_failed",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::BadRequest(message) => message.clone(),
            ApiError::Ssrm(err) => err.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), %message, "grid request failed");
        } else {
            tracing::info!(status = status.as_u16(), %message, "grid request rejected");
        }

        let body = ErrorBody {
            error: self.kind().into(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<SsrmError> for ApiError {
    fn from(err: SsrmError) -> Self {
        ApiError::Ssrm(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
