//! Metadata fetchers and the HTTP boundary
//!
//! - [`AuthenticatedFetch`] - the only I/O primitive; implemented by [`http::HttpFetch`]
//!   for real calls and by in-memory fakes in tests
//! - [`client::MetadataClient`] - routes calls through the scheduler and classifies responses
//! - [`or_filter::OrFilterBatcher`] - many entity lookups per request
//! - [`attributes::AttributeCaster`] - basic attribute list plus subtype casts

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

pub mod attributes;
pub mod client;
pub mod http;
pub mod odata;
pub mod or_filter;

/// Fetcher errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Connection, DNS or timeout failure
    #[error("network error: {0}")]
    NetworkError(String),

    /// Service protection limit hit (HTTP 429)
    #[error("rate limit exceeded")]
    RateLimitExceeded {
        /// Server-provided `Retry-After` hint
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx
    #[error("server error {status}: {message}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// HTTP 4xx other than 404 and 429
    #[error("client error {status}: {message}")]
    ClientError {
        /// HTTP status code
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// Response body did not match the expected shape
    #[error("parse error: {0}")]
    ParseError(String),

    /// The run was cancelled before this request started
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the scheduler should retry the request.
    ///
    /// Network failures, 5xx and throttling are transient. Client errors, parse
    /// errors and cancellation are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::NetworkError(_)
                | FetchError::RateLimitExceeded { .. }
                | FetchError::ServerError { .. }
        )
    }

    /// Minimum delay the server asked for before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimitExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify a non-success, non-404 response
    pub fn from_response(response: &ApiResponse) -> Self {
        let status = response.status;
        if status == 429 {
            return FetchError::RateLimitExceeded {
                retry_after: response.retry_after,
            };
        }

        let message = response.error_message();
        if status >= 500 {
            FetchError::ServerError { status, message }
        } else {
            FetchError::ClientError { status, message }
        }
    }
}

/// Result type for fetcher operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Response surfaced by [`AuthenticatedFetch`]
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed JSON body (`Value::Null` for empty bodies)
    pub body: Value,
    /// Parsed `Retry-After` header
    pub retry_after: Option<Duration>,
}

impl ApiResponse {
    /// Successful response with a JSON body
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            retry_after: None,
        }
    }

    /// Response with an arbitrary status and body
    pub fn with_status(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            retry_after: None,
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error message from an OData error body or a plain-text body, falling
    /// back to the status code
    pub fn error_message(&self) -> String {
        self.body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| self.body.as_str().filter(|text| !text.trim().is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

/// Authenticated access to the metadata Web API.
///
/// Implementations own tokens, TLS and re-authentication. They return every HTTP
/// response as an [`ApiResponse`], whatever its status, and reserve `Err` for
/// transport failures.
#[async_trait]
pub trait AuthenticatedFetch: Send + Sync {
    /// Issue a request for `path`, relative to the API root (e.g.
    /// `EntityDefinitions?$select=LogicalName`)
    async fn fetch(&self, path: &str, method: Method) -> FetchResult<ApiResponse>;
}
