use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Failure taxonomy shared by the WebSocket gateway and the REST API.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("missing, invalid or expired token")]
    Unauthenticated,

    #[error("not allowed")]
    Forbidden,

    #[error("unknown or expired invite code")]
    InvalidCode,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("already a member of this group")]
    AlreadyMember,

    #[error("{0} already taken")]
    Conflict(&'static str),

    #[error("upload exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("storage did not answer in time")]
    Unavailable,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code, used in `error` events and JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::InvalidCode => "invalid_code",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::AlreadyMember => "already_member",
            Self::Conflict(_) => "conflict",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Unavailable => "unavailable",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::InvalidCode => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AlreadyMember | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// WebSocket close code used when the error ends a connection.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Unauthenticated => 4001,
            Self::Forbidden => 4003,
            Self::NotFound(_) => 4004,
            Self::Unavailable => 1013,
            _ => 1011,
        }
    }

    /// Message safe to show a client. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            error!("Internal error: {:#}", e);
        }
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.public_message(),
        });
        (self.status(), Json(body)).into_response()
    }
}
