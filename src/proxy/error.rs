use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::fingerprint::FingerprintError;

/// Failures local to one chat-completion request. All of them end the request
/// with a 500 and `{"error": <message>}`; none of them affect the server.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    Decode(#[from] FingerprintError),

    #[error("{0}")]
    Validation(String),

    #[error("backend call failed during {stage}: {message}")]
    BackendCall { stage: &'static str, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn backend(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::BackendCall {
            stage,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Decode(_) => "decode",
            ProxyError::Validation(_) => "validation",
            ProxyError::BackendCall { .. } => "backend_call",
            ProxyError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        error!("Error processing request ({}): {}", self.kind(), self);
        let body = json!({ "error": self.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
