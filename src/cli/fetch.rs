//! Fetch command implementation

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use super::{Cli, CliError};
use crate::cancel::CancellationToken;
use crate::fetcher::odata::DEFAULT_CHUNK_SIZE;
use crate::orchestrator::{FetchConfig, FetchOptions, FetchReport};

/// Longer OR-filters risk exceeding the request URL limit
const MAX_CHUNK_SIZE: usize = 100;

/// Parse and validate the OR-filter chunk size
fn parse_chunk_size(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 || value > MAX_CHUNK_SIZE {
        return Err(format!("chunk size must be between 1 and {MAX_CHUNK_SIZE}"));
    }
    Ok(value)
}

/// Fetch command arguments
#[derive(Args, Debug, Clone, Default)]
pub struct FetchArgs {
    /// Entity logical names; all entities when omitted
    pub names: Vec<String>,

    /// Enrich entities with their attributes (option sets, lookup targets)
    #[arg(long)]
    pub attributes: bool,

    /// Expand 1:N, N:1 and N:N relationships (one request per entity)
    #[arg(long)]
    pub relationships: bool,

    /// Use the cached-bulk strategy (defaults to DATAVERSE_METADATA_CACHE)
    #[arg(long)]
    pub cache: bool,

    /// Only custom entities when no names are given
    #[arg(long)]
    pub custom_only: bool,

    /// Entity names per OR-filter request
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = parse_chunk_size)]
    pub chunk_size: usize,

    /// Pretty-print the JSON report
    #[arg(long)]
    pub pretty: bool,
}

impl FetchArgs {
    /// Options for the orchestrator run
    pub fn options(&self) -> FetchOptions {
        let options = FetchOptions::default()
            .with_attributes(self.attributes)
            .with_relationships(self.relationships);
        // An explicit flag wins; otherwise the environment decides
        if self.cache {
            options.with_cache(true)
        } else {
            options
        }
    }

    /// Execute the fetch command
    pub async fn execute(&self, cli: &Cli, cancel: CancellationToken) -> Result<(), CliError> {
        let config = FetchConfig::default().with_chunk_size(self.chunk_size);
        let orchestrator = cli.orchestrator(config, cancel)?;

        let names = if self.names.is_empty() {
            let names = orchestrator.list_entity_names(self.custom_only).await?;
            info!(count = names.len(), "No names given, fetching every listed entity");
            names
        } else {
            self.names.clone()
        };

        let options = self.options();
        let progress = create_progress_bar();
        progress.set_message(format!("Fetching ({})", options.strategy()));

        let bar = progress.clone();
        let on_progress = move |done: usize, total: usize, current: Option<&str>| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
            if let Some(name) = current {
                bar.set_message(name.to_string());
            }
        };

        let result = orchestrator
            .fetch_entities(&names, &options, Some(&on_progress))
            .await;
        progress.finish_and_clear();
        let report = result?;

        log_summary(&report);
        let json = if self.pretty {
            serde_json::to_string_pretty(&report)?
        } else {
            serde_json::to_string(&report)?
        };
        println!("{json}");
        Ok(())
    }
}

fn log_summary(report: &FetchReport) {
    info!(
        strategy = %report.strategy,
        requested = report.stats.requested,
        fetched = report.stats.fetched,
        not_found = report.stats.not_found,
        failed = report.stats.failed,
        attribute_failures = report.stats.attribute_failures,
        "Fetch finished"
    );
    for failure in &report.failures {
        warn!(entity = %failure.entity, "Failed: {}", failure.message);
    }
    for warning in &report.warnings {
        warn!(entity = %warning.entity, "Attributes unavailable: {}", warning.message);
    }
}

/// Create progress bar with style
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}
