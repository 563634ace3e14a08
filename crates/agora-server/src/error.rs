use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use agora_hub::HubError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<HubError> for ServerError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::AuthenticationMissing => ServerError::Unauthorized(err.to_string()),
            HubError::UnknownIdentity(handle) => {
                ServerError::NotFound(format!("Unknown user: {handle}"))
            }
            ref e if e.is_not_found() => ServerError::NotFound("Unknown user".to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
