use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{FileOperation, OperationKind};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// An operation as produced by the organization-decision component.
///
/// `type` is optional and defaults to `move`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub source: PathBuf,
    #[serde(default)]
    pub destination: Option<PathBuf>,
    #[serde(rename = "type", default)]
    pub kind: OperationKind,
}

impl OperationRequest {
    #[must_use]
    pub fn move_file(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: Some(destination.into()),
            kind: OperationKind::Move,
        }
    }

    #[must_use]
    pub fn copy_file(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: Some(destination.into()),
            kind: OperationKind::Copy,
        }
    }

    #[must_use]
    pub fn delete_file(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: None,
            kind: OperationKind::Delete,
        }
    }
}

/// Validates a typed batch into the closed set of [`FileOperation`]s.
///
/// # Errors
///
/// Returns the first [`ValidationError`] found; nothing is touched.
pub fn validate_batch(
    requests: Vec<OperationRequest>,
    limit: usize,
) -> Result<Vec<FileOperation>, ValidationError> {
    check_size(requests.len(), limit)?;

    requests
        .into_iter()
        .enumerate()
        .map(|(index, request)| validate_operation(index, request))
        .collect()
}

/// Validates loosely-typed JSON input.
///
/// # Errors
///
/// Returns [`ValidationError::NotAList`] for anything but a JSON array, and
/// [`ValidationError::MalformedOperation`] for records that do not match
/// [`OperationRequest`].
pub fn validate_batch_value(
    value: serde_json::Value,
    limit: usize,
) -> Result<Vec<FileOperation>, ValidationError> {
    let serde_json::Value::Array(items) = value else {
        return Err(ValidationError::NotAList);
    };
    check_size(items.len(), limit)?;

    let requests = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<OperationRequest>(item).map_err(|e| {
                ValidationError::MalformedOperation {
                    index,
                    reason: e.to_string(),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    validate_batch(requests, limit)
}

fn check_size(count: usize, limit: usize) -> Result<(), ValidationError> {
    if count == 0 {
        return Err(ValidationError::EmptyBatch);
    }
    if count > limit {
        return Err(ValidationError::TooManyOperations { count, limit });
    }
    Ok(())
}

fn validate_operation(
    index: usize,
    request: OperationRequest,
) -> Result<FileOperation, ValidationError> {
    ensure_non_empty(index, "source", &request.source)?;

    match request.kind {
        OperationKind::Delete => {
            if request.destination.is_some() {
                return Err(ValidationError::MalformedOperation {
                    index,
                    reason: "delete does not take a destination".to_string(),
                });
            }
            Ok(FileOperation::Delete {
                source: request.source,
            })
        }
        OperationKind::Move | OperationKind::Copy => {
            let kind = if request.kind == OperationKind::Move {
                "move"
            } else {
                "copy"
            };
            let destination = request
                .destination
                .ok_or(ValidationError::MissingDestination { index, kind })?;
            ensure_non_empty(index, "destination", &destination)?;

            if destination == request.source {
                return Err(ValidationError::SameSourceAndDestination {
                    index,
                    path: destination,
                });
            }

            let source = request.source;
            Ok(if request.kind == OperationKind::Move {
                FileOperation::Move {
                    source,
                    destination,
                }
            } else {
                FileOperation::Copy {
                    source,
                    destination,
                }
            })
        }
    }
}

fn ensure_non_empty(index: usize, field: &'static str, path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::EmptyPath { index, field });
    }
    Ok(())
}
