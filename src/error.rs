use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Unknown hook")]
    UnknownHook,

    #[error("Invalid ID or Token")]
    InvalidPushTarget,

    #[error("Unauthorized push notification")]
    UnauthorizedPush,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Status source unreachable: {url} ({detail})")]
    SourceUnreachable { url: String, detail: String },

    #[error("Destination no longer exists")]
    DestinationGone,

    #[error("Delivered message no longer exists")]
    MessageGone,

    #[error("Delivery API error (HTTP {status}): {message}")]
    DeliveryAPIError { status: u16, message: String },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            // 404 is reserved for the GET handshake probe; a push to a
            // missing hook answers 400 like the platform it mirrors.
            RelayError::UnknownHook => (StatusCode::NOT_FOUND, self.to_string()),
            RelayError::InvalidPushTarget => (StatusCode::BAD_REQUEST, self.to_string()),
            RelayError::UnauthorizedPush => (StatusCode::UNAUTHORIZED, self.to_string()),
            RelayError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
