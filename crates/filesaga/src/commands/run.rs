use std::process::ExitCode;

use filesaga_core::EngineConfig;
use filesaga_saga::Engine;
use tracing::info;

use super::RunArgs;
use crate::error::{CliError, Result};
use crate::output::{OutputFormatter, PlainTextFormatter};

pub(crate) async fn run(args: RunArgs, config: EngineConfig) -> Result<ExitCode> {
    let content = std::fs::read_to_string(&args.batch).map_err(|source| CliError::ReadBatch {
        path: args.batch.clone(),
        source,
    })?;
    let batch: serde_json::Value =
        serde_json::from_str(&content).map_err(|source| CliError::ParseBatch {
            path: args.batch.clone(),
            source,
        })?;

    let (engine, recovery) = Engine::open(config).await?;
    let formatter = PlainTextFormatter;
    if !recovery.is_clean() {
        eprint!("{}", formatter.format_recovery(&recovery));
    }

    let outcome = engine.coordinator().execute_json(batch).await;
    info!(
        batch = %args.batch.display(),
        success = outcome.is_success(),
        "batch finished"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", formatter.format_outcome(&outcome));
    }

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
