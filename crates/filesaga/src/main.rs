mod commands;
mod error;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use filesaga_core::{EngineConfig, default_config_path};
use tracing_subscriber::EnvFilter;

use crate::commands::Commands;
use crate::error::CliError;

const LOG_ENV: &str = "FILESAGA_LOG";

#[derive(Parser)]
#[command(name = "filesaga")]
#[command(version)]
#[command(about = "Move, copy and delete files as one all-or-nothing batch", long_about = None)]
struct Cli {
    /// Config file (default: <config_dir>/filesaga/filesaga.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Journal directory, overriding the config file
    #[arg(long, global = true)]
    journal_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref(), cli.journal_dir) {
        Ok(config) => config,
        Err(e) => {
            print_error(&e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command.execute(config).await {
        Ok(code) => code,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(
    path: Option<&Path>,
    journal_dir: Option<PathBuf>,
) -> Result<EngineConfig, CliError> {
    let config = match (path, journal_dir.as_ref()) {
        (Some(path), _) => EngineConfig::load(path)?,
        (None, None) => match default_config_path() {
            Some(path) => EngineConfig::load(&path)?,
            None => EngineConfig::with_default_journal_dir()?,
        },
        // Without an explicit file, a journal directory on the command line
        // must work even where the platform has no data directory.
        (None, Some(dir)) => match default_config_path() {
            Some(path) if path.exists() => EngineConfig::load(&path)?,
            _ => EngineConfig::with_journal_dir(dir),
        },
    };

    Ok(match journal_dir {
        Some(dir) => config.set_journal_dir(dir),
        None => config,
    })
}

fn print_error(error: &CliError) {
    eprintln!("error: {error}");

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("caused by: {cause}");
        source = std::error::Error::source(cause);
    }
}
