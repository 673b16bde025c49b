use std::process::ExitCode;

use chrono::{DateTime, TimeDelta, Utc};
use filesaga_core::EngineConfig;
use filesaga_journal::{FileSystemJournalStore, JournalStore};

use super::{PruneArgs, parse_id};
use crate::error::{CliError, Result};

pub(crate) async fn run(args: PruneArgs, config: &EngineConfig) -> Result<ExitCode> {
    let journal = FileSystemJournalStore::open(config.journal_dir())?;

    if let Some(value) = args.id {
        let id = parse_id(&value)?;
        if !journal.prune(id).await? {
            return Err(CliError::NotFound(id));
        }
        println!("Pruned {id}");
        return Ok(ExitCode::SUCCESS);
    }

    let cutoff = TimeDelta::from_std(config.retention())
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let pruned = journal.prune_expired(cutoff).await?;
    println!("Pruned {pruned} expired entry(ies).");
    Ok(ExitCode::SUCCESS)
}
