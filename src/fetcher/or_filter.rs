//! OR-filter batching of entity lookups
//!
//! Collapses many `LogicalName` lookups into one request per chunk of keys.
//! Only valid when no relationship expansion is needed, since `$expand` on a
//! filtered collection is not supported for relationship navigation.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::fetcher::client::MetadataClient;
use crate::fetcher::odata::{self, Chunk, DEFAULT_CHUNK_SIZE};
use crate::fetcher::FetchError;
use crate::scheduler::{Priority, TaskOptions};
use crate::{EntityMetadata, ProgressFn};

/// A chunk whose request failed after retries
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFailure {
    /// Keys of the failed chunk
    pub keys: Vec<String>,
    /// Last error returned by the scheduler
    pub error: FetchError,
}

/// Result of an OR-filter fetch
#[derive(Debug, Default)]
pub struct OrFilterOutcome {
    /// Records found, in input key order. Keys with no record are absent.
    pub records: Vec<EntityMetadata>,
    /// Chunks that could not be fetched
    pub failed_chunks: Vec<ChunkFailure>,
}

impl OrFilterOutcome {
    /// Keys whose chunk failed
    pub fn failed_keys(&self) -> impl Iterator<Item = &str> {
        self.failed_chunks
            .iter()
            .flat_map(|failure| failure.keys.iter().map(String::as_str))
    }

    /// Whether every chunk succeeded
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

/// Fetches basic entity records with one `$filter` request per chunk
#[derive(Clone)]
pub struct OrFilterBatcher {
    client: MetadataClient,
    chunk_size: usize,
}

impl OrFilterBatcher {
    /// Create a batcher with the default chunk size
    pub fn new(client: MetadataClient) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the number of keys per request (at least 1)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Keys per request
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fetch the records for `keys`.
    ///
    /// Every chunk is submitted at once at normal priority; the scheduler bounds
    /// how many run. As each chunk resolves its records are added and
    /// `on_progress(records_so_far, total_keys, last_key_of_chunk)` is called.
    /// A failing chunk is recorded in [`OrFilterOutcome::failed_chunks`] and the
    /// others continue.
    pub async fn fetch_by_or_filter(
        &self,
        keys: &[String],
        select_fields: &[&str],
        on_progress: Option<&ProgressFn>,
    ) -> OrFilterOutcome {
        let chunks = odata::chunk_keys(keys, self.chunk_size);
        let total: usize = chunks.iter().map(|c| c.keys.len()).sum();

        // Records are decoded by logical name, so it is always selected
        let mut fields: Vec<&str> = Vec::with_capacity(select_fields.len() + 1);
        if !select_fields.contains(&"LogicalName") {
            fields.push("LogicalName");
        }
        fields.extend_from_slice(select_fields);

        debug!(
            keys = total,
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            "Submitting OR-filter chunks"
        );

        let fields = &fields;
        let mut pending: FuturesUnordered<_> = chunks
            .into_iter()
            .map(|chunk| async move {
                let result = self.fetch_chunk(&chunk, fields).await;
                (chunk, result)
            })
            .collect();

        let mut outcome = OrFilterOutcome::default();
        while let Some((chunk, result)) = pending.next().await {
            match result {
                Ok(records) => {
                    debug!(
                        chunk = chunk.index,
                        requested = chunk.keys.len(),
                        found = records.len(),
                        "OR-filter chunk resolved"
                    );
                    outcome.records.extend(records);
                }
                Err(error) => {
                    warn!(
                        chunk = chunk.index,
                        keys = chunk.keys.len(),
                        first_key = chunk.keys.first().map(String::as_str).unwrap_or(""),
                        error = %error,
                        "OR-filter chunk failed"
                    );
                    outcome.failed_chunks.push(ChunkFailure {
                        keys: chunk.keys.clone(),
                        error,
                    });
                }
            }

            if let Some(report) = on_progress {
                report(outcome.records.len(), total, chunk.last_key());
            }
        }

        outcome.records = order_by_keys(std::mem::take(&mut outcome.records), keys);
        outcome
    }

    async fn fetch_chunk(
        &self,
        chunk: &Chunk,
        fields: &[&str],
    ) -> Result<Vec<EntityMetadata>, FetchError> {
        let path = odata::entity_query_path(chunk, fields);
        self.client
            .get_collection(&path, "entities", TaskOptions::new(Priority::NORMAL))
            .await
    }
}

/// Restore input order. Names match keys without regard to case, since the
/// API filter does; records for keys never requested and repeats are dropped.
fn order_by_keys(records: Vec<EntityMetadata>, keys: &[String]) -> Vec<EntityMetadata> {
    let mut position: HashMap<String, usize> = HashMap::with_capacity(keys.len());
    for (index, key) in keys.iter().enumerate() {
        position.entry(key.to_lowercase()).or_insert(index);
    }

    let mut slots: Vec<Option<EntityMetadata>> = vec![None; keys.len()];
    for record in records {
        match position.get(&record.logical_name.to_lowercase()) {
            Some(&index) if slots[index].is_none() => slots[index] = Some(record),
            Some(_) => debug!(entity = %record.logical_name, "Duplicate record dropped"),
            None => warn!(
                entity = %record.logical_name,
                "Dropping record for an entity that was not requested"
            ),
        }
    }
    slots.into_iter().flatten().collect()
}
