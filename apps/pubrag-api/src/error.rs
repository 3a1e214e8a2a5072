//! Error → HTTP response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use pubrag_core::error::{Error, LlmErrorKind};

#[derive(Debug)]
pub enum ApiError {
    /// Body could not be parsed into the expected shape.
    BadRequest(String),
    Core(Error),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Core(e)
    }
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            Self::Core(e) => match e {
                Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                Error::DimensionMismatch { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "DIMENSION_MISMATCH"),
                Error::Embedding(_) => (StatusCode::BAD_GATEWAY, "EMBEDDING_ERROR"),
                Error::Llm { kind: LlmErrorKind::NotConfigured, .. } => (StatusCode::SERVICE_UNAVAILABLE, "LLM_NOT_CONFIGURED"),
                Error::Llm { kind: LlmErrorKind::Timeout, .. } => (StatusCode::GATEWAY_TIMEOUT, "LLM_TIMEOUT"),
                Error::Llm { .. } => (StatusCode::BAD_GATEWAY, "LLM_ERROR"),
                Error::Index(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INDEX_ERROR"),
                Error::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
                Error::InvalidConfig(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
                Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Core(e) => e.to_string(),
        };
        if status.is_server_error() {
            error!(code, %message, "request failed");
        } else {
            warn!(code, %message, "request rejected");
        }
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
