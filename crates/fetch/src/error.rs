//! Error taxonomy for API calls
//!
//! Flat enum, one variant per way a request can go wrong. `Clone` because a
//! single failed network call is handed to every coalesced caller.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Synthetic status for a client-side timeout
pub const TIMEOUT_STATUS: u16 = 408;

/// Synthetic status when no HTTP status was obtained
pub const NO_STATUS: u16 = 0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    #[error("Request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden {
        message: String,
        details: Option<Value>,
    },

    #[error("Not found: {message}")]
    NotFound {
        message: String,
        details: Option<Value>,
    },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        details: Option<Value>,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Failed to encode request body: {0}")]
    Encode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Discriminant of [`ApiError`], for matching and event payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Network,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    Api,
    Decode,
    Encode,
    InvalidUrl,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Api => "api",
            ErrorKind::Decode => "decode",
            ErrorKind::Encode => "encode",
            ErrorKind::InvalidUrl => "invalid_url",
        }
    }
}

impl ApiError {
    /// Classify a non-2xx response
    pub fn from_status(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Self {
        let details = serde_json::from_slice::<Value>(body).ok();
        let message = server_message(status, details.as_ref(), body);

        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized { message },
            StatusCode::FORBIDDEN => ApiError::Forbidden { message, details },
            StatusCode::NOT_FOUND => ApiError::NotFound { message, details },
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
                message,
                retry_after: retry_after(headers),
            },
            _ => ApiError::Api {
                status: status.as_u16(),
                message,
                details,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Network(_) => ErrorKind::Network,
            ApiError::Unauthorized { .. } => ErrorKind::Unauthorized,
            ApiError::Forbidden { .. } => ErrorKind::Forbidden,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::Api { .. } => ErrorKind::Api,
            ApiError::Decode(_) => ErrorKind::Decode,
            ApiError::Encode(_) => ErrorKind::Encode,
            ApiError::InvalidUrl(_) => ErrorKind::InvalidUrl,
        }
    }

    /// HTTP status, or a synthetic one when the server never answered
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Timeout { .. } => TIMEOUT_STATUS,
            ApiError::Unauthorized { .. } => 401,
            ApiError::Forbidden { .. } => 403,
            ApiError::NotFound { .. } => 404,
            ApiError::RateLimited { .. } => 429,
            ApiError::Api { status, .. } => *status,
            ApiError::Network(_)
            | ApiError::Decode(_)
            | ApiError::Encode(_)
            | ApiError::InvalidUrl(_) => NO_STATUS,
        }
    }

    /// Structured error body returned by the server, if any
    pub fn details(&self) -> Option<&Value> {
        match self {
            ApiError::Forbidden { details, .. }
            | ApiError::NotFound { details, .. }
            | ApiError::Api { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

/// `message` field of a JSON error body, else the raw text, else the reason phrase
fn server_message(status: StatusCode, details: Option<&Value>, body: &[u8]) -> String {
    if let Some(message) = details
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
    {
        return message.to_string();
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if details.is_none() && !text.is_empty() {
        return text.to_string();
    }

    status
        .canonical_reason()
        .unwrap_or("Unknown status")
        .to_string()
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
