//! Fetch strategy selection and batch orchestration
//!
//! # Overview
//!
//! A run turns a list of entity logical names into [`EnrichedEntity`] records:
//!
//! 1. **Strategy**: [`FetchStrategy::select`] picks one of three paths once per run
//! 2. **Basic records**: OR-filter chunks, or per-entity lookups in delayed batches
//! 3. **Enrichment**: [`AttributeCaster`] in batches, with gated progress
//! 4. **Report**: records plus [`FetchStats`], warnings and failures
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dataverse_metadata_fetcher::fetcher::http::HttpFetch;
//! use dataverse_metadata_fetcher::orchestrator::{FetchConfig, FetchOptions, FetchOrchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetch = HttpFetch::new("https://org.crm.dynamics.com/api/data/v9.2", "token")?;
//! let orchestrator = FetchOrchestrator::new(Arc::new(fetch), FetchConfig::default());
//! let options = FetchOptions::default().with_relationships(true);
//! let report = orchestrator
//!     .fetch_entities(&["account".to_string()], &options, None)
//!     .await?;
//! assert_eq!(report.strategy, dataverse_metadata_fetcher::FetchStrategy::IndividualWithRelationships);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Per-entity failures never abort a run; they are counted and listed in the
//! report. The run fails with [`OrchestratorError::NoEntitiesFetched`] only when
//! nothing at all was fetched, and with [`OrchestratorError::Cancelled`] when
//! the cancellation token fires.

pub mod config;
pub mod progress;

pub use config::FetchConfig;
pub use progress::ProgressGate;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

use crate::cancel::CancellationToken;
use crate::fetcher::attributes::AttributeCaster;
use crate::fetcher::client::MetadataClient;
use crate::fetcher::odata::{self, ENTITY_SELECT_FIELDS};
use crate::fetcher::or_filter::OrFilterBatcher;
use crate::fetcher::{AuthenticatedFetch, FetchError};
use crate::metrics::RunMetrics;
use crate::scheduler::{Priority, RequestScheduler, TaskOptions};
use crate::{EnrichedEntity, EntityMetadata, ProgressFn};

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Not a single entity could be fetched
    #[error("no entities fetched ({requested} requested, {not_found} not found, {failed} failed)")]
    NoEntitiesFetched {
        /// Distinct names requested
        requested: usize,
        /// Names the API does not know
        not_found: usize,
        /// Names whose lookup failed
        failed: usize,
    },

    /// The run was cancelled
    #[error("metadata fetch cancelled")]
    Cancelled,

    /// A request outside the per-entity paths failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
}

/// How basic entity records are fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Per-entity lookups in large batches with no delay; a local cache absorbs throttling
    CachedBulk,
    /// OR-filter chunks; cannot expand relationships
    OrBatched,
    /// Per-entity lookups with relationship expansion in small, delayed batches
    IndividualWithRelationships,
}

impl FetchStrategy {
    /// Pick the strategy for a run
    pub fn select(cache_enabled: bool, relationships_required: bool) -> Self {
        match (cache_enabled, relationships_required) {
            (true, _) => FetchStrategy::CachedBulk,
            (false, false) => FetchStrategy::OrBatched,
            (false, true) => FetchStrategy::IndividualWithRelationships,
        }
    }

    /// Name used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            FetchStrategy::CachedBulk => "cached_bulk",
            FetchStrategy::OrBatched => "or_batched",
            FetchStrategy::IndividualWithRelationships => "individual_with_relationships",
        }
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a run should fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Enrich entities with their attributes
    pub attributes: bool,
    /// Expand relationship collections
    pub relationships: bool,
    /// Cached-bulk override; `None` reads `DATAVERSE_METADATA_CACHE`
    pub cache: Option<bool>,
}

impl FetchOptions {
    /// Request attribute enrichment
    pub fn with_attributes(mut self, attributes: bool) -> Self {
        self.attributes = attributes;
        self
    }

    /// Request relationship expansion
    pub fn with_relationships(mut self, relationships: bool) -> Self {
        self.relationships = relationships;
        self
    }

    /// Force the cache flag instead of reading the environment
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Effective cache flag
    pub fn cache_enabled(&self) -> bool {
        self.cache.unwrap_or_else(config::cache_enabled_from_env)
    }

    /// Strategy these options select
    pub fn strategy(&self) -> FetchStrategy {
        FetchStrategy::select(self.cache_enabled(), self.relationships)
    }
}

/// Run counters, always produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStats {
    /// Distinct names requested
    pub requested: usize,
    /// Entities whose basic record was fetched
    pub fetched: usize,
    /// Names the API does not know
    pub not_found: usize,
    /// Names whose lookup failed
    pub failed: usize,
    /// Fetched entities whose attribute enrichment failed
    pub attribute_failures: usize,
    /// Wall-clock duration of the run
    pub elapsed_ms: u64,
}

/// A named problem reported alongside the records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIssue {
    /// Entity logical name
    pub entity: String,
    /// Underlying error message
    pub message: String,
}

impl EntityIssue {
    fn new(entity: impl Into<String>, error: &FetchError) -> Self {
        Self {
            entity: entity.into(),
            message: error.to_string(),
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchReport {
    /// Strategy used
    pub strategy: FetchStrategy,
    /// When the run started
    pub fetched_at: DateTime<Utc>,
    /// Fetched entities in request order
    pub entities: Vec<EnrichedEntity>,
    /// Counters
    pub stats: FetchStats,
    /// Names the API does not know
    pub not_found: Vec<String>,
    /// Entities that could not be fetched
    pub failures: Vec<EntityIssue>,
    /// Entities kept with basic fields only
    pub warnings: Vec<EntityIssue>,
}

impl FetchReport {
    fn empty(strategy: FetchStrategy) -> Self {
        Self {
            strategy,
            fetched_at: Utc::now(),
            entities: Vec::new(),
            stats: FetchStats::default(),
            not_found: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Look up a fetched entity by logical name
    pub fn entity(&self, logical_name: &str) -> Option<&EnrichedEntity> {
        self.entities
            .iter()
            .find(|e| e.logical_name() == logical_name)
    }

    /// Whether every requested entity was fetched and enriched
    pub fn is_complete(&self) -> bool {
        self.not_found.is_empty() && self.failures.is_empty() && self.warnings.is_empty()
    }
}

/// Basic records plus what went wrong getting them
#[derive(Debug, Default)]
struct BasicPhase {
    records: Vec<EntityMetadata>,
    not_found: Vec<String>,
    failures: Vec<EntityIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EntityName {
    logical_name: String,
}

/// Runs a metadata fetch end to end
#[derive(Clone)]
pub struct FetchOrchestrator {
    client: MetadataClient,
    or_filter: OrFilterBatcher,
    caster: AttributeCaster,
    config: FetchConfig,
    cancel: CancellationToken,
}

impl FetchOrchestrator {
    /// Create an orchestrator with its own scheduler and cancellation token
    pub fn new(fetch: Arc<dyn AuthenticatedFetch>, config: FetchConfig) -> Self {
        Self::with_cancellation(fetch, config, CancellationToken::new())
    }

    /// Create an orchestrator that stops when `cancel` fires
    pub fn with_cancellation(
        fetch: Arc<dyn AuthenticatedFetch>,
        config: FetchConfig,
        cancel: CancellationToken,
    ) -> Self {
        let scheduler = RequestScheduler::with_cancellation(config.scheduler.clone(), cancel.clone());
        let client = MetadataClient::new(fetch, scheduler);
        let or_filter = OrFilterBatcher::new(client.clone()).with_chunk_size(config.chunk_size);
        let caster =
            AttributeCaster::new(client.clone()).with_cast_max_retries(config.cast_max_retries);

        Self {
            client,
            or_filter,
            caster,
            config,
            cancel,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Token that cancels runs of this orchestrator
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Scheduler every request goes through
    pub fn scheduler(&self) -> &RequestScheduler {
        self.client.scheduler()
    }

    /// Logical names of every entity, sorted; optionally custom entities only
    pub async fn list_entity_names(&self, custom_only: bool) -> Result<Vec<String>, OrchestratorError> {
        let rows: Vec<EntityName> = self
            .client
            .get_collection(
                &odata::entity_list_path(custom_only),
                "entities",
                TaskOptions::new(Priority::HIGH),
            )
            .await
            .map_err(|e| match e {
                FetchError::Cancelled => OrchestratorError::Cancelled,
                other => OrchestratorError::Fetch(other),
            })?;

        let mut names: Vec<String> = rows.into_iter().map(|row| row.logical_name).collect();
        names.sort();
        names.dedup();
        info!(count = names.len(), custom_only = custom_only, "Listed entities");
        Ok(names)
    }

    /// Fetch `names` according to `options`.
    ///
    /// Names match without regard to case, and fetched entities carry the
    /// logical name the API returns. Duplicate names are fetched once. Empty
    /// input yields an empty report.
    pub async fn fetch_entities(
        &self,
        names: &[String],
        options: &FetchOptions,
        on_progress: Option<&ProgressFn>,
    ) -> Result<FetchReport, OrchestratorError> {
        let strategy = options.strategy();
        let names = distinct(names);
        let span = tracing::info_span!(
            "fetch_entities",
            strategy = %strategy,
            count = names.len(),
            attributes = options.attributes
        );

        self.run(strategy, names, options, on_progress)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        strategy: FetchStrategy,
        names: Vec<String>,
        options: &FetchOptions,
        on_progress: Option<&ProgressFn>,
    ) -> Result<FetchReport, OrchestratorError> {
        let started = Instant::now();
        let mut report = FetchReport::empty(strategy);
        report.stats.requested = names.len();
        if names.is_empty() {
            debug!("No entities requested");
            return Ok(report);
        }

        let run_metrics = RunMetrics::start(strategy.as_str(), names.len());

        let basic = match strategy {
            FetchStrategy::OrBatched => self.fetch_or_batched(&names, on_progress).await?,
            FetchStrategy::CachedBulk => {
                self.fetch_individually(
                    &names,
                    options.relationships,
                    self.config.bulk_batch_size,
                    self.config.bulk_batch_delay,
                    on_progress,
                )
                .await?
            }
            FetchStrategy::IndividualWithRelationships => {
                self.fetch_individually(
                    &names,
                    true,
                    self.config.individual_batch_size,
                    self.config.individual_batch_delay,
                    on_progress,
                )
                .await?
            }
        };

        report.stats.fetched = basic.records.len();
        report.stats.not_found = basic.not_found.len();
        report.stats.failed = basic.failures.len();
        report.not_found = basic.not_found;
        report.failures = basic.failures;

        run_metrics.record_outcome(report.stats.fetched, report.stats.failed);

        if basic.records.is_empty() {
            warn!(
                requested = report.stats.requested,
                not_found = report.stats.not_found,
                failed = report.stats.failed,
                "No entities fetched"
            );
            return Err(OrchestratorError::NoEntitiesFetched {
                requested: report.stats.requested,
                not_found: report.stats.not_found,
                failed: report.stats.failed,
            });
        }

        if options.attributes {
            let (entities, warnings) = self.enrich(basic.records, on_progress).await?;
            report.stats.attribute_failures = warnings.len();
            report.entities = entities;
            report.warnings = warnings;
        } else {
            report.entities = basic.records.into_iter().map(EnrichedEntity::basic).collect();
        }

        report.stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            fetched = report.stats.fetched,
            not_found = report.stats.not_found,
            failed = report.stats.failed,
            attribute_failures = report.stats.attribute_failures,
            elapsed_ms = report.stats.elapsed_ms,
            "Metadata fetch complete"
        );
        Ok(report)
    }

    async fn fetch_or_batched(
        &self,
        names: &[String],
        on_progress: Option<&ProgressFn>,
    ) -> Result<BasicPhase, OrchestratorError> {
        let outcome = self
            .or_filter
            .fetch_by_or_filter(names, ENTITY_SELECT_FIELDS, on_progress)
            .await;
        self.ensure_not_cancelled()?;

        let mut phase = BasicPhase::default();
        // Lowercased, as the API matches filter names without regard to case
        let mut resolved: HashSet<String> = HashSet::new();

        for failure in &outcome.failed_chunks {
            for key in &failure.keys {
                warn!(entity = %key, error = %failure.error, "Entity lookup failed");
                phase.failures.push(EntityIssue::new(key.as_str(), &failure.error));
                resolved.insert(key.to_lowercase());
            }
        }
        for record in &outcome.records {
            resolved.insert(record.logical_name.to_lowercase());
        }
        phase.not_found = names
            .iter()
            .filter(|name| !resolved.contains(&name.to_lowercase()))
            .cloned()
            .collect();
        for name in &phase.not_found {
            debug!(entity = %name, "Entity not found");
        }

        phase.records = outcome.records;
        Ok(phase)
    }

    async fn fetch_individually(
        &self,
        names: &[String],
        with_relationships: bool,
        batch_size: usize,
        delay: Duration,
        on_progress: Option<&ProgressFn>,
    ) -> Result<BasicPhase, OrchestratorError> {
        let mut phase = BasicPhase::default();
        let batches: Vec<&[String]> = names.chunks(batch_size.max(1)).collect();
        let batch_count = batches.len();
        let mut processed = 0;

        for (index, batch) in batches.into_iter().enumerate() {
            self.ensure_not_cancelled()?;
            if index > 0 {
                self.pause(delay).await?;
            }

            let results = join_all(
                batch
                    .iter()
                    .map(|name| self.client.get_entity(name, with_relationships)),
            )
            .await;

            for (name, result) in batch.iter().zip(results) {
                match result {
                    Ok(Some(record)) => phase.records.push(record),
                    Ok(None) => {
                        debug!(entity = %name, "Entity not found");
                        phase.not_found.push(name.clone());
                    }
                    Err(FetchError::Cancelled) => return Err(OrchestratorError::Cancelled),
                    Err(error) => {
                        warn!(entity = %name, error = %error, "Entity lookup failed");
                        phase.failures.push(EntityIssue::new(name.as_str(), &error));
                    }
                }
            }

            processed += batch.len();
            debug!(
                batch = index + 1,
                batches = batch_count,
                fetched = phase.records.len(),
                "Entity batch complete"
            );
            if let Some(report) = on_progress {
                report(processed, names.len(), batch.last().map(String::as_str));
            }
        }

        Ok(phase)
    }

    async fn enrich(
        &self,
        records: Vec<EntityMetadata>,
        on_progress: Option<&ProgressFn>,
    ) -> Result<(Vec<EnrichedEntity>, Vec<EntityIssue>), OrchestratorError> {
        let total = records.len();
        let batch_size = self.config.attribute_batch_size.max(1);
        let mut gate = ProgressGate::with_step(total, self.config.progress_step_percent);
        let mut entities = Vec::with_capacity(total);
        let mut warnings = Vec::new();
        let mut remaining = records.into_iter().peekable();
        let mut first = true;

        while remaining.peek().is_some() {
            self.ensure_not_cancelled()?;
            if !first {
                self.pause(self.config.attribute_batch_delay).await?;
            }
            first = false;

            let batch: Vec<EntityMetadata> = remaining.by_ref().take(batch_size).collect();
            let results = join_all(
                batch
                    .iter()
                    .map(|entity| self.caster.fetch_attributes(&entity.logical_name)),
            )
            .await;

            for (entity, result) in batch.into_iter().zip(results) {
                let name = entity.logical_name.clone();
                match result {
                    Ok(attributes) => entities.push(EnrichedEntity::enriched(entity, attributes)),
                    Err(FetchError::Cancelled) => return Err(OrchestratorError::Cancelled),
                    Err(error) => {
                        warn!(
                            entity = %name,
                            error = %error,
                            "Attribute fetch failed, keeping basic entity"
                        );
                        warnings.push(EntityIssue::new(name.as_str(), &error));
                        entities.push(EnrichedEntity::attributes_failed(entity));
                    }
                }
                if gate.advance(Some(name.as_str()), on_progress) {
                    debug!("{}", gate.format_progress("entities enriched"));
                }
            }
        }

        Ok((entities, warnings))
    }

    /// Inter-batch delay that ends early on cancellation
    async fn pause(&self, delay: Duration) -> Result<(), OrchestratorError> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.cancel.cancelled() => Err(OrchestratorError::Cancelled),
        }
    }

    fn ensure_not_cancelled(&self) -> Result<(), OrchestratorError> {
        if self.cancel.is_cancelled() {
            info!("Cancellation requested, stopping at batch boundary");
            return Err(OrchestratorError::Cancelled);
        }
        Ok(())
    }
}

/// Drop repeated names (compared without regard to case), keeping first
/// occurrences in order
fn distinct(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .iter()
        .filter(|name| seen.insert(name.to_lowercase()))
        .cloned()
        .collect()
}
