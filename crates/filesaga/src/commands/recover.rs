use std::process::ExitCode;

use filesaga_core::EngineConfig;
use filesaga_saga::Engine;

use super::RecoverArgs;
use crate::error::Result;
use crate::output::{OutputFormatter, PlainTextFormatter};

pub(crate) async fn run(args: RecoverArgs, config: EngineConfig) -> Result<ExitCode> {
    let (_engine, report) = Engine::open(config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", PlainTextFormatter.format_recovery(&report));
    }

    Ok(if report.needs_attention() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
