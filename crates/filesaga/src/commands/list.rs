use std::process::ExitCode;

use filesaga_core::EngineConfig;
use filesaga_journal::{FileSystemJournalStore, JournalStore};

use super::ListArgs;
use crate::error::Result;
use crate::output::{OutputFormatter, PlainTextFormatter};

pub(crate) async fn run(args: ListArgs, config: &EngineConfig) -> Result<ExitCode> {
    let journal = FileSystemJournalStore::open(config.journal_dir())?;

    let mut entries = if args.all {
        journal.list().await?
    } else {
        journal.list_incomplete().await?
    };
    entries.sort_by_key(|txn| txn.created_at);

    print!("{}", PlainTextFormatter.format_entries(&entries, args.all));
    Ok(ExitCode::SUCCESS)
}
