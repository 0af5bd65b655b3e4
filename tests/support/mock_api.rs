//! In-memory metadata Web API used by the integration tests

use async_trait::async_trait;
use dataverse_metadata_fetcher::fetcher::{ApiResponse, AuthenticatedFetch, FetchResult};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Kind of request the mock received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `EntityDefinitions?$filter=LogicalName eq ...`
    OrFilter(Vec<String>),
    /// `EntityDefinitions?$select=LogicalName...` without a name filter
    List {
        /// Whether `IsCustomEntity eq true` was requested
        custom_only: bool,
    },
    /// `EntityDefinitions(LogicalName='x')?...`
    Entity(String),
    /// `EntityDefinitions(LogicalName='x')/Attributes?...`
    Attributes(String),
    /// `EntityDefinitions(LogicalName='x')/Attributes/Microsoft.Dynamics.CRM.T?...`
    Cast(String, String),
}

/// Decode a request path into a [`Route`]
pub fn route(path: &str) -> Route {
    let decoded = urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string());

    if let Some(rest) = decoded.strip_prefix("EntityDefinitions(LogicalName='") {
        let end = rest.find("')").unwrap_or(rest.len());
        let key = rest[..end].replace("''", "'");
        let tail = &rest[end..];
        if let Some(cast) = tail.split("/Attributes/Microsoft.Dynamics.CRM.").nth(1) {
            let cast = cast.split('?').next().unwrap_or_default().to_string();
            return Route::Cast(key, cast);
        }
        if tail.starts_with("')/Attributes") {
            return Route::Attributes(key);
        }
        return Route::Entity(key);
    }

    match decoded.split("$filter=").nth(1) {
        Some(filter) if filter.contains("LogicalName eq") => Route::OrFilter(
            filter
                .split(" or ")
                .filter_map(|clause| {
                    let start = clause.find('\'')? + 1;
                    let end = clause.rfind('\'')?;
                    Some(clause[start..end].replace("''", "'"))
                })
                .collect(),
        ),
        Some(filter) => Route::List {
            custom_only: filter.contains("IsCustomEntity eq true"),
        },
        None => Route::List { custom_only: false },
    }
}

/// Scriptable fake of the metadata Web API
#[derive(Default)]
pub struct MockApi {
    entities: Vec<Value>,
    attributes: HashMap<String, Vec<Value>>,
    casts: HashMap<(String, String), Vec<Value>>,
    failing_entities: HashMap<String, u16>,
    failing_attributes: HashMap<String, u16>,
    failing_casts: HashSet<String>,
    transient_failures: Mutex<HashMap<String, usize>>,
    latency: Duration,
    requests: Mutex<Vec<Route>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockApi {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity with the given logical name
    pub fn with_entity(mut self, name: &str) -> Self {
        self.entities.push(json!({
            "LogicalName": name,
            "SchemaName": schema_name(name),
            "EntitySetName": format!("{name}s"),
            "PrimaryIdAttribute": format!("{name}id"),
            "PrimaryNameAttribute": "name",
            "IsCustomEntity": name.contains('_'),
            "DisplayName": { "UserLocalizedLabel": { "Label": schema_name(name), "LanguageCode": 1033 } }
        }));
        self
    }

    /// Add `count` entities named `entity_0`, `entity_1`, ...
    pub fn with_entities(mut self, count: usize) -> Self {
        for i in 0..count {
            self = self.with_entity(&format!("entity_{i}"));
        }
        self
    }

    /// Basic attribute list of an entity
    pub fn with_attributes(mut self, entity: &str, attributes: Vec<Value>) -> Self {
        self.attributes.insert(entity.to_string(), attributes);
        self
    }

    /// Records returned by a cast endpoint of an entity
    pub fn with_cast(mut self, entity: &str, metadata_type: &str, records: Vec<Value>) -> Self {
        self.casts
            .insert((entity.to_string(), metadata_type.to_string()), records);
        self
    }

    /// Every request mentioning `entity` (lookups and chunks) fails with `status`
    pub fn failing_entity(mut self, entity: &str, status: u16) -> Self {
        self.failing_entities.insert(entity.to_string(), status);
        self
    }

    /// The attribute request of `entity` fails with `status`
    pub fn failing_attributes(mut self, entity: &str, status: u16) -> Self {
        self.failing_attributes.insert(entity.to_string(), status);
        self
    }

    /// Every cast request of this metadata type fails with 500
    pub fn failing_cast(mut self, metadata_type: &str) -> Self {
        self.failing_casts.insert(metadata_type.to_string());
        self
    }

    /// The first `times` lookups of `entity` answer 429
    pub fn throttled(self, entity: &str, times: usize) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(entity.to_string(), times);
        self
    }

    /// Delay every response
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<Route> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests received
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests matching `predicate`
    pub fn count(&self, predicate: impl Fn(&Route) -> bool) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| predicate(r)).count()
    }

    /// Highest number of concurrent requests observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn entity(&self, name: &str) -> Option<&Value> {
        // Name lookups ignore case, like the real service
        self.entities.iter().find(|e| {
            e["LogicalName"]
                .as_str()
                .is_some_and(|known| known.eq_ignore_ascii_case(name))
        })
    }

    fn take_transient(&self, name: &str) -> bool {
        let mut remaining = self.transient_failures.lock().unwrap();
        match remaining.get_mut(name) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }

    fn respond(&self, route: &Route) -> ApiResponse {
        match route {
            Route::OrFilter(keys) => {
                if let Some(status) = keys.iter().find_map(|k| self.failing_entities.get(k)) {
                    return error(*status);
                }
                let value: Vec<Value> = keys
                    .iter()
                    .filter_map(|k| self.entity(k).cloned())
                    .collect();
                ApiResponse::ok(json!({ "value": value }))
            }
            Route::List { custom_only } => {
                let value: Vec<Value> = self
                    .entities
                    .iter()
                    .filter(|e| !*custom_only || e["IsCustomEntity"] == true)
                    .map(|e| json!({ "LogicalName": e["LogicalName"], "IsCustomEntity": e["IsCustomEntity"] }))
                    .collect();
                ApiResponse::ok(json!({ "value": value }))
            }
            Route::Entity(name) => {
                if let Some(status) = self.failing_entities.get(name) {
                    return error(*status);
                }
                if self.take_transient(name) {
                    return ApiResponse {
                        status: 429,
                        body: Value::Null,
                        retry_after: Some(Duration::from_millis(1)),
                    };
                }
                match self.entity(name) {
                    Some(entity) => {
                        let mut entity = entity.clone();
                        entity["OneToManyRelationships"] = json!([]);
                        entity["ManyToOneRelationships"] = json!([]);
                        entity["ManyToManyRelationships"] = json!([]);
                        ApiResponse::ok(entity)
                    }
                    None => error(404),
                }
            }
            Route::Attributes(name) => {
                if let Some(status) = self.failing_attributes.get(name) {
                    return error(*status);
                }
                let value = self.attributes.get(name).cloned().unwrap_or_default();
                ApiResponse::ok(json!({ "value": value }))
            }
            Route::Cast(name, metadata_type) => {
                if self.failing_casts.contains(metadata_type) {
                    return error(500);
                }
                let value = self
                    .casts
                    .get(&(name.clone(), metadata_type.clone()))
                    .cloned()
                    .unwrap_or_default();
                ApiResponse::ok(json!({ "value": value }))
            }
        }
    }
}

fn schema_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn error(status: u16) -> ApiResponse {
    ApiResponse::with_status(
        status,
        json!({ "error": { "code": "0x80040217", "message": format!("mock error {status}") } }),
    )
}

#[async_trait]
impl AuthenticatedFetch for MockApi {
    async fn fetch(&self, path: &str, method: Method) -> FetchResult<ApiResponse> {
        assert_eq!(method, Method::GET);
        let route = route(path);
        self.requests.lock().unwrap().push(route.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let response = self.respond(&route);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(response)
    }
}
