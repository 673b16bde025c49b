use std::process::ExitCode;

use filesaga_core::EngineConfig;
use filesaga_journal::{FileSystemJournalStore, JournalStore};

use super::{ShowArgs, parse_id};
use crate::error::{CliError, Result};

pub(crate) async fn run(args: ShowArgs, config: &EngineConfig) -> Result<ExitCode> {
    let id = parse_id(&args.id)?;
    let journal = FileSystemJournalStore::open(config.journal_dir())?;

    let transaction = journal.load(id).await?.ok_or(CliError::NotFound(id))?;

    println!("{}", serde_json::to_string_pretty(&transaction)?);
    Ok(ExitCode::SUCCESS)
}
