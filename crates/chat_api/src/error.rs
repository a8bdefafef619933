use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Typed classification of a transport failure, attached at the client
/// boundary so downstream recovery logic can branch on values instead of
/// matching substrings of display text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    Overloaded,
    Auth,
    Network,
    InvalidRequest,
    Cancelled,
    Other,
}

impl ErrorKind {
    /// Whether another attempt of the same request could succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Overloaded | Self::Network)
    }
}

/// Map an HTTP status to its failure kind.
#[must_use]
pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        401 | 403 => ErrorKind::Auth,
        429 => ErrorKind::RateLimited,
        500 | 502 | 503 | 504 => ErrorKind::Overloaded,
        400..=499 => ErrorKind::InvalidRequest,
        _ => ErrorKind::Other,
    }
}

#[derive(Debug, Error)]
pub enum ChatApiError {
    #[error("API key is required")]
    MissingApiKey,

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid request payload: {0}")]
    InvalidRequestPayload(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },

    #[error("malformed SSE event: {0}")]
    MalformedSse(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("retry exhausted after max attempts (status: {status:?}, last_error: {last_error:?})")]
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },

    #[error("stream failed: {message}")]
    StreamFailed { message: String },

    #[error("request was cancelled")]
    Cancelled,
}

impl ChatApiError {
    /// The typed failure classification for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingApiKey => ErrorKind::Auth,
            Self::InvalidBaseUrl(_) | Self::InvalidRequestPayload(_) | Self::Serde(_) => {
                ErrorKind::InvalidRequest
            }
            Self::Request(error) => {
                if error.is_timeout() || error.is_connect() {
                    ErrorKind::Network
                } else {
                    ErrorKind::Other
                }
            }
            Self::Status { status, .. } => classify_status(*status),
            Self::MalformedSse(_) | Self::StreamFailed { .. } => ErrorKind::Other,
            Self::RetryExhausted { status, .. } => {
                status.map_or(ErrorKind::Network, classify_status)
            }
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(rename = "error")]
    pub value: Option<ErrorPayloadFields>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayloadFields {
    pub message: Option<String>,
}

/// Extract a human-readable message from an error response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) {
        if let Some(message) = payload
            .value
            .and_then(|fields| fields.message)
            .filter(|message| !message.trim().is_empty())
        {
            return message;
        }
    }

    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}
