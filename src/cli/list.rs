//! List command implementation

use clap::Args;
use serde_json::json;

use super::{Cli, CliError};
use crate::cancel::CancellationToken;
use crate::orchestrator::FetchConfig;

/// Output format for the list command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One name per line
    #[default]
    Human,
    /// JSON object with a `names` array
    Json,
}

/// List command arguments
#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Only custom entities
    #[arg(long)]
    pub custom_only: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,
}

impl ListArgs {
    /// Execute the list command
    pub async fn execute(&self, cli: &Cli, cancel: CancellationToken) -> Result<(), CliError> {
        let orchestrator = cli.orchestrator(FetchConfig::default(), cancel)?;
        let names = orchestrator.list_entity_names(self.custom_only).await?;

        match self.format {
            OutputFormat::Human => {
                for name in &names {
                    println!("{name}");
                }
            }
            OutputFormat::Json => {
                let output = json!({ "count": names.len(), "names": names });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Ok(())
    }
}
