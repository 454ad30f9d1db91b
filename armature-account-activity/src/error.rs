//! Error types for account activity operations
//!
//! Every outbound provider call ends in either a successful [`ApiResponse`]
//! or a single normalized [`ApiError`]; see [`ApiError::check`].

use crate::{ApiResponse, RateLimit, TransportError};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Sentinel for "the provider did not supply a structured error code"
pub const NO_CODE: i64 = -1;

/// Sentinel for "no HTTP response was received"
pub const NO_STATUS: i32 = -1;

/// Errors that can occur during account activity operations
#[derive(Error, Debug)]
pub enum ActivityError {
    /// A required caller input is missing or empty
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The app-only bearer token exchange failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The provider rejected the request, or it never reached the provider
    #[error("Provider API error: {0}")]
    Api(#[from] ApiError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A successful response body did not have the expected shape
    #[error("Payload error: {0}")]
    Payload(String),
}

impl ActivityError {
    /// The normalized provider error, if this is one
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(error) => Some(error),
            _ => None,
        }
    }

    /// HTTP status of the failed call (`-1` for a transport failure)
    pub fn status_code(&self) -> Option<i32> {
        self.api_error().map(|e| e.status_code)
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(err: serde_json::Error) -> Self {
        ActivityError::Payload(err.to_string())
    }
}

/// A normalized provider failure.
///
/// `status_code` is [`NO_STATUS`] when the request failed before any response
/// was received, and `code` is [`NO_CODE`] when the response carried no
/// structured `errors` array.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (code: {code}, status: {status_code})")]
pub struct ApiError {
    /// Human readable reason
    pub message: String,

    /// Provider error code
    pub code: i64,

    /// HTTP status code
    pub status_code: i32,

    /// Rate-limit counters reported alongside the failure
    pub rate_limit: Option<RateLimit>,

    /// Raw provider body, when it carried structured errors
    pub raw: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrors {
    errors: Vec<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default = "no_code")]
    code: i64,
    #[serde(default)]
    message: String,
}

fn no_code() -> i64 {
    NO_CODE
}

impl ApiError {
    /// Normalize a request that never produced a response
    pub fn transport(err: &TransportError) -> Self {
        Self {
            message: err.to_string(),
            code: NO_CODE,
            status_code: NO_STATUS,
            rate_limit: None,
            raw: None,
        }
    }

    /// Normalize a completed, non-2xx response
    pub fn from_response(response: &ApiResponse) -> Self {
        let status = response.status();
        let rate_limit = response.rate_limit();
        let body = response.json_value();

        let structured = body
            .as_ref()
            .and_then(|b| ProviderErrors::deserialize(b).ok())
            .and_then(|e| e.errors.into_iter().next());

        match structured {
            Some(first) => Self {
                message: first.message,
                code: first.code,
                status_code: i32::from(status.as_u16()),
                rate_limit,
                raw: body,
            },
            None => {
                let message = match status.canonical_reason() {
                    Some(reason) => reason.to_string(),
                    None if !response.body().is_empty() => response.text(),
                    None => format!("HTTP {}", status.as_u16()),
                };
                Self {
                    message,
                    code: NO_CODE,
                    status_code: i32::from(status.as_u16()),
                    rate_limit,
                    raw: None,
                }
            }
        }
    }

    /// Pass 2xx responses through and normalize everything else
    pub fn check(
        outcome: std::result::Result<ApiResponse, TransportError>,
    ) -> std::result::Result<ApiResponse, ApiError> {
        match outcome {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => {
                let error = Self::from_response(&response);
                warn!(
                    status = error.status_code,
                    code = error.code,
                    "Provider rejected request: {}",
                    error.message
                );
                Err(error)
            }
            Err(err) => {
                warn!("Provider request failed before a response: {}", err);
                Err(Self::transport(&err))
            }
        }
    }

    /// True when no HTTP response was received
    pub fn is_transport_failure(&self) -> bool {
        self.status_code == NO_STATUS
    }

    /// True when the provider answered 429
    pub fn is_rate_limited(&self) -> bool {
        self.status_code == 429
    }
}
