//! HTTP error mapping.

use crate::Error;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Body of every 500 response; details stay in the logs.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// Errors a handler can return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request was malformed; the message is shown to the client.
    BadRequest(String),
    /// Anything else; the message is only logged.
    Internal(String),
}

impl ApiError {
    /// Status code of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(message) => Self::BadRequest(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::BadRequest(message) => message,
            Self::Internal(cause) => {
                tracing::error!(%cause, "Request failed");
                INTERNAL_ERROR_MESSAGE.to_string()
            },
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
