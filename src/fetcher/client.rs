//! Scheduled, classified access to the metadata endpoints

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::fetcher::odata;
use crate::fetcher::{AuthenticatedFetch, FetchError, FetchResult};
use crate::metrics::RequestMetrics;
use crate::scheduler::{Priority, RequestScheduler, TaskOptions};
use crate::EntityMetadata;

/// OData collection envelope
#[derive(Debug, Deserialize)]
struct Collection<T> {
    value: Vec<T>,
}

/// Routes every call through the shared [`RequestScheduler`] and turns HTTP
/// responses into typed results.
///
/// A 404 is never an error here: single lookups yield `None` and collections
/// yield an empty list.
#[derive(Clone)]
pub struct MetadataClient {
    fetch: Arc<dyn AuthenticatedFetch>,
    scheduler: RequestScheduler,
}

impl MetadataClient {
    /// Create a client over an authenticated fetcher and a scheduler
    pub fn new(fetch: Arc<dyn AuthenticatedFetch>, scheduler: RequestScheduler) -> Self {
        Self { fetch, scheduler }
    }

    /// The scheduler every request goes through
    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    /// GET `path`, returning the raw body or `None` on 404
    pub async fn get_value(
        &self,
        path: &str,
        endpoint: &'static str,
        options: TaskOptions,
    ) -> FetchResult<Option<Value>> {
        self.scheduler
            .execute(move || self.send(path, endpoint), options)
            .await
    }

    /// GET `path` and deserialize the body, `None` on 404
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        endpoint: &'static str,
        options: TaskOptions,
    ) -> FetchResult<Option<T>> {
        match self.get_value(path, endpoint, options).await? {
            Some(body) => decode(body).map(Some),
            None => Ok(None),
        }
    }

    /// GET a `{ "value": [...] }` collection; a 404 yields an empty list
    pub async fn get_collection<T: DeserializeOwned>(
        &self,
        path: &str,
        endpoint: &'static str,
        options: TaskOptions,
    ) -> FetchResult<Vec<T>> {
        match self.get_value(path, endpoint, options).await? {
            Some(body) => decode::<Collection<T>>(body).map(|c| c.value),
            None => Ok(Vec::new()),
        }
    }

    /// Look up one entity by logical name, optionally with its relationships
    pub async fn get_entity(
        &self,
        key: &str,
        with_relationships: bool,
    ) -> FetchResult<Option<EntityMetadata>> {
        let path = odata::entity_path(key, with_relationships);
        self.get_optional(&path, "entity", TaskOptions::new(Priority::HIGH))
            .await
    }

    async fn send(&self, path: &str, endpoint: &'static str) -> FetchResult<Option<Value>> {
        let metrics = RequestMetrics::start(endpoint);
        let response = match self.fetch.fetch(path, Method::GET).await {
            Ok(response) => response,
            Err(e) => {
                metrics.record_network_error();
                return Err(e);
            }
        };
        metrics.record_complete(response.status);

        if response.status == 404 {
            return Ok(None);
        }
        if response.is_success() {
            return Ok(Some(response.body));
        }
        Err(FetchError::from_response(&response))
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> FetchResult<T> {
    serde_json::from_value(body)
        .map_err(|e| FetchError::ParseError(format!("Failed to deserialize response: {e}")))
}
