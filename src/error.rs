//! Error taxonomy for backend calls.
//!
//! [`HttpError`] is produced by the [`Gateway`](crate::gateway::Gateway)
//! and classifies every failed call into an [`HttpErrorKind`].
//! [`ApiError`] is what the auth, query and mutation layers return: either
//! a gateway failure or a client-side validation failure that was caught
//! before any request was sent.
//!
//! All error types are `Clone` so that a single fetch outcome can be
//! handed to every caller that was waiting on it.

use std::fmt;

use rag_client_core::models::ErrorResponse;
use rag_client_core::validate::{FeedbackValidationError, ValidationError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpErrorKind {
    /// HTTP 401. The gateway clears the session before returning this.
    Unauthorized,
    /// HTTP 403.
    Forbidden,
    /// HTTP 5xx.
    ServerError,
    /// Any other non-2xx status (400, 404, 422, ...).
    ClientError,
    /// The request was sent but no response arrived.
    NetworkError,
    /// The request could not be constructed or sent.
    RequestError,
    /// The configured timeout elapsed.
    Timeout,
    /// A 2xx response whose body did not match the expected shape.
    Decode,
}

impl HttpErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpErrorKind::Unauthorized => "unauthorized",
            HttpErrorKind::Forbidden => "forbidden",
            HttpErrorKind::ServerError => "server_error",
            HttpErrorKind::ClientError => "client_error",
            HttpErrorKind::NetworkError => "network_error",
            HttpErrorKind::RequestError => "request_error",
            HttpErrorKind::Timeout => "timeout",
            HttpErrorKind::Decode => "decode",
        }
    }

    /// Map a non-success status code to its kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => HttpErrorKind::Unauthorized,
            403 => HttpErrorKind::Forbidden,
            500..=599 => HttpErrorKind::ServerError,
            _ => HttpErrorKind::ClientError,
        }
    }
}

impl fmt::Display for HttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HttpError {
    pub kind: HttpErrorKind,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    pub message: String,
}

impl HttpError {
    pub fn new(kind: HttpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Build an error from a non-success response.
    ///
    /// The message is taken from the backend's error body when it has one
    /// (`{"error", "message"}` or FastAPI's `{"detail"}`), otherwise from
    /// the raw body or the status line.
    pub fn from_response(status: u16, body: &str) -> Self {
        Self {
            kind: HttpErrorKind::from_status(status),
            status: Some(status),
            message: extract_message(status, body),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == HttpErrorKind::Unauthorized
    }
}

fn extract_message(status: u16, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
        return parsed.message;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        match value.get("detail") {
            Some(serde_json::Value::String(s)) => return s.clone(),
            Some(other) => return other.to_string(),
            None => {}
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        trimmed.chars().take(300).collect()
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            HttpErrorKind::Timeout
        } else if err.is_builder() {
            HttpErrorKind::RequestError
        } else if err.is_decode() {
            HttpErrorKind::Decode
        } else {
            HttpErrorKind::NetworkError
        };
        Self {
            kind,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Every failure the client surfaces to its callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("invalid search query: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid feedback: {0}")]
    FeedbackValidation(#[from] FeedbackValidationError),

    /// Local session storage could not be read or written.
    #[error("session storage error: {0}")]
    Storage(String),
}

impl ApiError {
    /// The gateway error kind, if this failure came from the network.
    pub fn http_kind(&self) -> Option<HttpErrorKind> {
        match self {
            ApiError::Http(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.http_kind() == Some(HttpErrorKind::Unauthorized)
    }

    /// Whether the failure was caught locally before any request was sent.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ApiError::Validation(_) | ApiError::FeedbackValidation(_)
        )
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
