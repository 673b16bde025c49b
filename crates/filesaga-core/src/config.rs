use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::batch::DEFAULT_MAX_BATCH_SIZE;
use crate::error::ConfigError;

pub const CONFIG_FILENAME: &str = "filesaga.toml";
pub const APP_DIR_NAME: &str = "filesaga";
pub const JOURNAL_SUBDIR: &str = "journal";

const DEFAULT_MAX_CONCURRENT_IO: usize = 4;
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// On-disk form of [`EngineConfig`]. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    journal_dir: Option<PathBuf>,
    max_batch_size: Option<usize>,
    max_concurrent_io: Option<usize>,
    step_timeout_secs: Option<u64>,
    retention_days: Option<u64>,
    allow_overwrite: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    journal_dir: PathBuf,
    max_batch_size: usize,
    max_concurrent_io: usize,
    step_timeout: Duration,
    retention: Duration,
    allow_overwrite: bool,
}

impl EngineConfig {
    /// Defaults with the journal under the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoDataDir`] if the platform has no data
    /// directory.
    pub fn with_default_journal_dir() -> Result<Self, ConfigError> {
        Ok(Self::with_journal_dir(default_journal_dir()?))
    }

    #[must_use]
    pub fn with_journal_dir(journal_dir: impl Into<PathBuf>) -> Self {
        Self {
            journal_dir: journal_dir.into(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_concurrent_io: DEFAULT_MAX_CONCURRENT_IO,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            retention: DEFAULT_RETENTION,
            allow_overwrite: false,
        }
    }

    /// Loads the config file at `path`, falling back to defaults for a
    /// missing file or missing keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// holds an invalid value.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = match std::fs::read_to_string(path) {
            Ok(content) => {
                toml::from_str::<ConfigFile>(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigFile::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Self::from_file(file)
    }

    /// Parses config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid config TOML.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file = toml::from_str::<ConfigFile>(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let journal_dir = match file.journal_dir {
            Some(dir) => dir,
            None => default_journal_dir()?,
        };
        let mut config = Self::with_journal_dir(journal_dir);

        if let Some(size) = file.max_batch_size {
            config.max_batch_size = positive("max_batch_size", size)?;
        }
        if let Some(concurrency) = file.max_concurrent_io {
            config.max_concurrent_io = positive("max_concurrent_io", concurrency)?;
        }
        if let Some(secs) = file.step_timeout_secs {
            let secs = positive("step_timeout_secs", secs)?;
            config.step_timeout = Duration::from_secs(secs);
        }
        if let Some(days) = file.retention_days {
            config.retention = Duration::from_secs(days * 24 * 60 * 60);
        }
        if let Some(allow) = file.allow_overwrite {
            config.allow_overwrite = allow;
        }

        Ok(config)
    }

    #[must_use]
    pub fn journal_dir(&self) -> &Path {
        &self.journal_dir
    }

    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    #[must_use]
    pub fn max_concurrent_io(&self) -> usize {
        self.max_concurrent_io
    }

    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    #[must_use]
    pub fn allow_overwrite(&self) -> bool {
        self.allow_overwrite
    }

    #[must_use]
    pub fn set_journal_dir(mut self, journal_dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = journal_dir.into();
        self
    }

    #[must_use]
    pub fn set_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    #[must_use]
    pub fn set_max_concurrent_io(mut self, max_concurrent_io: usize) -> Self {
        self.max_concurrent_io = max_concurrent_io;
        self
    }

    #[must_use]
    pub fn set_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    #[must_use]
    pub fn set_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn set_allow_overwrite(mut self, allow_overwrite: bool) -> Self {
        self.allow_overwrite = allow_overwrite;
        self
    }
}

/// `<data_dir>/filesaga/journal`.
///
/// # Errors
///
/// Returns [`ConfigError::NoDataDir`] if the platform has no data directory.
pub fn default_journal_dir() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(JOURNAL_SUBDIR))
        .ok_or(ConfigError::NoDataDir)
}

/// `<config_dir>/filesaga/filesaga.toml`, if the platform has one.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILENAME))
}

fn positive<T>(field: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialEq + Default + std::fmt::Display,
{
    if value == T::default() {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("must be greater than zero, got {value}"),
        });
    }
    Ok(value)
}
