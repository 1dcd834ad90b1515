//! API error type and the JSON error body shared by every endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use pvsignal_core::PvError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g. "bad_request", "pipeline_busy").
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400: missing or invalid parameter.
    BadRequest(String),
    /// 409: a pipeline run is already in progress.
    Busy(String),
    /// 422: the upload could not be read as AE data.
    UnprocessableEntity(String),
    /// 500: invariant violation or unexpected failure.
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Busy(msg) => (StatusCode::CONFLICT, "pipeline_busy", msg),
            ApiError::UnprocessableEntity(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "data_format", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.parts().0
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = code, "{}", message);
        }
        let body = ErrorBody {
            error: code.to_string(),
            message: message.to_string(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}

impl From<PvError> for ApiError {
    fn from(err: PvError) -> Self {
        match err {
            PvError::DataFormat(_) => ApiError::UnprocessableEntity(err.to_string()),
            PvError::PipelineBusy => ApiError::Busy(err.to_string()),
            PvError::Config(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pv_error_mapping() {
        let cases = [
            (PvError::DataFormat("no drug column".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (PvError::PipelineBusy, StatusCode::CONFLICT),
            (PvError::Scoring("empty cluster".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (PvError::Embedding("blank".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_data_format_message_is_verbatim() {
        let api: ApiError = PvError::DataFormat("missing required column drug_name".into()).into();
        match api {
            ApiError::UnprocessableEntity(msg) => {
                assert!(msg.contains("missing required column drug_name"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
