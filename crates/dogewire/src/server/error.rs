use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use dogewire_core::{CoreError, RpcError};

// ==============================================================================
// Error Type
// ==============================================================================

#[derive(Debug)]
pub(crate) enum AppError {
    BadRequest(String),
    NotFound(String),
    /// The upstream Electrum server failed or could not be reached.
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::warn!(%status, error = %message, "request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        if err.is_user_actionable() {
            return Self::BadRequest(err.to_string());
        }
        match err {
            CoreError::UnknownChannel(_) => Self::NotFound(err.to_string()),
            CoreError::NotConnected
            | CoreError::ConnectionLost
            | CoreError::Connect { .. }
            | CoreError::MalformedTransaction(_) => Self::BadGateway(err.to_string()),
            // Server rejections keep their message verbatim.
            CoreError::Rpc(RpcError::ServerError { message, .. }) => Self::BadGateway(message),
            CoreError::Rpc(_) => Self::BadGateway(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}
