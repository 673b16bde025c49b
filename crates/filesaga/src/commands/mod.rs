mod list;
mod prune;
mod recover;
mod run;
mod show;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Subcommand};
use filesaga_core::{EngineConfig, TransactionId};

use crate::error::{CliError, Result};

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Execute a batch file as one transaction
    Run(RunArgs),
    /// Finish transactions interrupted by a crash
    Recover(RecoverArgs),
    /// List journal entries
    List(ListArgs),
    /// Print one journal entry as JSON
    Show(ShowArgs),
    /// Remove finished journal entries
    Prune(PruneArgs),
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// JSON file holding a list of `{source, destination, type}` records
    pub batch: PathBuf,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub(crate) struct RecoverArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub(crate) struct ListArgs {
    /// Include committed and rolled back entries
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub(crate) struct ShowArgs {
    /// Transaction id
    pub id: String,
}

#[derive(Args)]
pub(crate) struct PruneArgs {
    /// Transaction id of a finished entry
    #[arg(required_unless_present = "expired", conflicts_with = "expired")]
    pub id: Option<String>,

    /// Remove every finished entry older than the retention period
    #[arg(long)]
    pub expired: bool,
}

impl Commands {
    pub(crate) async fn execute(self, config: EngineConfig) -> Result<ExitCode> {
        match self {
            Self::Run(args) => run::run(args, config).await,
            Self::Recover(args) => recover::run(args, config).await,
            Self::List(args) => list::run(args, &config).await,
            Self::Show(args) => show::run(args, &config).await,
            Self::Prune(args) => prune::run(args, &config).await,
        }
    }
}

fn parse_id(value: &str) -> Result<TransactionId> {
    value
        .parse()
        .map_err(|source| CliError::InvalidTransactionId {
            value: value.to_owned(),
            source,
        })
}
