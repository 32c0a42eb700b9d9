//! Error taxonomy shared by the HTTP and gRPC surfaces.
//!
//! Lower layers attach context with `anyhow` and are folded into
//! [`Error::Server`] at module boundaries; the domain kinds carry a short,
//! client-safe description.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("client fingerprint mismatch")]
    FingerprintMismatch,
    #[error("authorization state expired")]
    StateExpired,
    #[error("id token at_hash does not match the access token")]
    InvalidAtHashToken,
    #[error("server error: {0:#}")]
    Server(anyhow::Error),
    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),
    #[error("operation canceled")]
    Canceled,
}

impl Error {
    /// Wrap an infrastructure failure with a short context prefix.
    pub fn server<E>(context: &'static str, err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Server(err.into().context(context))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// HTTP status for this kind.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnauthorizedClient(_) | Self::InvalidAtHashToken => StatusCode::UNAUTHORIZED,
            Self::AccessDenied(_) | Self::FingerprintMismatch => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gone(_) | Self::StateExpired => StatusCode::GONE,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TemporarilyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            // 499: client closed request
            Self::Canceled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// OAuth-style error code used in JSON bodies and gRPC messages.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::AccessDenied(_) => "access_denied",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Gone(_) => "gone",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::FingerprintMismatch => "fingerprint_mismatch",
            Self::StateExpired => "state_expired",
            Self::InvalidAtHashToken => "invalid_at_hash",
            Self::Server(_) => "server_error",
            Self::TemporarilyUnavailable(_) => "temporarily_unavailable",
            Self::Canceled => "canceled",
        }
    }

    /// Description that is safe to hand back to a caller.
    #[must_use]
    pub fn public_description(&self) -> String {
        match self {
            Self::Server(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Server(err)
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        let message = err.public_description();
        match err {
            Error::InvalidRequest(_) => Self::invalid_argument(message),
            Error::UnauthorizedClient(_) | Error::InvalidAtHashToken => {
                Self::unauthenticated(message)
            }
            Error::AccessDenied(_) | Error::FingerprintMismatch => {
                Self::permission_denied(message)
            }
            Error::NotFound(_) => Self::not_found(message),
            Error::Conflict(_) => Self::already_exists(message),
            Error::Gone(_) | Error::StateExpired | Error::PreconditionFailed(_) => {
                Self::failed_precondition(message)
            }
            Error::Server(ref source) => {
                error!("gRPC request failed: {source:#}");
                Self::internal(message)
            }
            Error::TemporarilyUnavailable(_) => Self::unavailable(message),
            Error::Canceled => Self::cancelled(message),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Self::Server(source) = &self {
            error!("Request failed: {source:#}");
        }

        let body = Json(json!({
            "error": self.code(),
            "error_description": self.public_description(),
        }));

        (self.status(), body).into_response()
    }
}
