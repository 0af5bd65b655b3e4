//! CLI command implementations

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::fetcher::http::HttpFetch;
use crate::orchestrator::{FetchConfig, FetchOrchestrator};
use crate::scheduler::config::{DEFAULT_CONCURRENCY, MAX_RETRIES};
use crate::scheduler::SchedulerConfig;

pub mod error;
pub mod fetch;
pub mod list;

pub use error::CliError;
pub use fetch::FetchArgs;
pub use list::ListArgs;

/// Dataverse service protection allows 52 concurrent requests per user
const MAX_CONCURRENCY: usize = 52;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Dataverse metadata fetcher CLI
#[derive(Parser, Debug)]
#[command(name = "dataverse-metadata")]
#[command(about = "Fetch entity and attribute metadata from a Dataverse Web API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Web API root (e.g. https://org.crm.dynamics.com/api/data/v9.2)
    #[arg(long, global = true, env = "DATAVERSE_URL")]
    pub url: Option<String>,

    /// Bearer token for the Web API
    #[arg(long, global = true, env = "DATAVERSE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Maximum simultaneous requests (max: 52)
    #[arg(long, global = true, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Retries for throttled, server and network failures (range: 0-10)
    #[arg(long, global = true, default_value_t = MAX_RETRIES, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub max_retries: u32,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch entity metadata and print the report as JSON
    Fetch(FetchArgs),

    /// List entity logical names
    List(ListArgs),
}

impl Cli {
    /// Scheduler settings from the global flags
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_concurrency(self.concurrency)
            .with_max_retries(self.max_retries)
    }

    /// Build an orchestrator for `config` against the configured Web API
    pub fn orchestrator(
        &self,
        config: FetchConfig,
        cancel: CancellationToken,
    ) -> Result<FetchOrchestrator, CliError> {
        let url = self
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                CliError::ConfigurationError("--url or DATAVERSE_URL is required".to_string())
            })?;
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(CliError::InvalidArgument(format!(
                "URL must start with http:// or https://: {url}"
            )));
        }
        let token = self.token.as_deref().ok_or_else(|| {
            CliError::ConfigurationError("--token or DATAVERSE_TOKEN is required".to_string())
        })?;

        let fetch = HttpFetch::new(url, token)?;
        Ok(FetchOrchestrator::with_cancellation(
            Arc::new(fetch),
            config.with_scheduler(self.scheduler_config()),
            cancel,
        ))
    }
}
