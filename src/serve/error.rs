use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ServeError {
    /// The caller's request was malformed; answered with a 400 and a
    /// machine-readable code.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ServeError {
    pub fn bad_request(reason: impl ToString) -> Self {
        ServeError::BadRequest(reason.to_string())
    }
}

impl From<StoreError> for ServeError {
    fn from(err: StoreError) -> Self {
        ServeError::Internal(err.to_string())
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let (status, code, reason) = match self {
            ServeError::BadRequest(reason) => (StatusCode::BAD_REQUEST, "bad-request", reason),
            ServeError::Internal(reason) => {
                error!("internal server error: {reason}");
                (StatusCode::INTERNAL_SERVER_ERROR, "error", reason)
            }
        };

        (
            status,
            Json(json!({
                "error": code,
                "reason": reason,
            })),
        )
            .into_response()
    }
}
