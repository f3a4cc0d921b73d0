use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::gemini::ModelError;

#[derive(Debug, Error)]
pub enum MenuError {
    #[error("Empty input")]
    InvalidInput,
    #[error("{0}")]
    Configuration(String),
    #[error("Unexpected function call: {0}")]
    UnexpectedToolCall(String),
    #[error(transparent)]
    Upstream(#[from] ModelError),
    #[error("Failed to encode tool result: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MenuError {
    pub fn status(&self) -> StatusCode {
        match self {
            MenuError::InvalidInput => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MenuError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "menu request failed");
        }
        detail_response(status, self.to_string())
    }
}

/// Error body shape shared by every failing endpoint.
pub fn detail_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}
