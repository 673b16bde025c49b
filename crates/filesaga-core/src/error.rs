use std::path::PathBuf;

use thiserror::Error;

/// A batch rejected before any journal write or filesystem mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("batch is empty")]
    EmptyBatch,

    #[error("batch has {count} operations, the limit is {limit}")]
    TooManyOperations { count: usize, limit: usize },

    #[error("batch must be a list of operations")]
    NotAList,

    #[error("operation {index} is malformed: {reason}")]
    MalformedOperation { index: usize, reason: String },

    #[error("operation {index}: {field} path is empty")]
    EmptyPath { index: usize, field: &'static str },

    #[error("operation {index}: {kind} requires a destination")]
    MissingDestination { index: usize, kind: &'static str },

    #[error("operation {index}: source and destination are the same path '{path}'")]
    SameSourceAndDestination { index: usize, path: PathBuf },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}'")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("no data directory available; set journal_dir explicitly")]
    NoDataDir,
}
