//! reqwest-backed [`AuthenticatedFetch`]
//!
//! Takes an already-acquired bearer token; token refresh belongs to the caller.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::fetcher::{ApiResponse, AuthenticatedFetch, FetchError, FetchResult};

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - metadata responses for wide entities are large
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Process-wide HTTP client, shared so connection pooling spans every fetcher.
static GLOBAL_HTTP_CLIENT: Lazy<Result<Arc<Client>, String>> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .build()
        .map(Arc::new)
        .map_err(|e| format!("failed to build HTTP client: {e}"))
});

/// Get the global HTTP client
pub fn global_http_client() -> FetchResult<Arc<Client>> {
    GLOBAL_HTTP_CLIENT
        .as_ref()
        .map(Arc::clone)
        .map_err(|e| FetchError::NetworkError(e.clone()))
}

/// Web API access with a static bearer token
pub struct HttpFetch {
    client: Arc<Client>,
    base_url: String,
    token: String,
}

impl HttpFetch {
    /// Create a fetcher for an API root such as
    /// `https://org.crm.dynamics.com/api/data/v9.2`
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> FetchResult<Self> {
        Ok(Self::with_client(global_http_client()?, base_url, token))
    }

    /// Create a fetcher on an existing client
    pub fn with_client(
        client: Arc<Client>,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            token: token.into(),
        }
    }

    /// API root all paths are resolved against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl AuthenticatedFetch for HttpFetch {
    async fn fetch(&self, path: &str, method: Method) -> FetchResult<ApiResponse> {
        let url = self.url_for(path);
        debug!(method = %method, url = %url, "Sending metadata request");

        let response = self
            .client
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/json")
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .send()
            .await
            .map_err(|e| FetchError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| FetchError::NetworkError(format!("failed to read body: {e}")))?;

        let body = parse_body(status, &text)?;
        Ok(ApiResponse {
            status,
            body,
            retry_after,
        })
    }
}

/// Parse a `Retry-After` header given in seconds
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            warn!("Failed to parse Retry-After header '{}': {}", raw, e);
            None
        }
    }
}

/// Decode a response body. Error responses that are not JSON keep their text
/// so the message survives into [`FetchError`].
fn parse_body(status: u16, text: &str) -> FetchResult<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(_) if !(200..300).contains(&status) => Ok(Value::String(text.to_string())),
        Err(e) => Err(FetchError::ParseError(format!(
            "Failed to deserialize response: {e}"
        ))),
    }
}
