//! Crash-safe file primitives for the journal.
//!
//! A reader either sees the previous content of an entry or the new one,
//! never a partial write: data goes to a temporary sibling, is synced,
//! renamed over the target, and the directory is synced so the rename
//! itself survives power loss.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Writes `data` to `path` atomically and durably.
///
/// The temporary file is removed if any step fails.
///
/// # Errors
///
/// Returns the underlying I/O error of the failing step.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot determine parent directory of {}", path.display()),
        )
    })?;
    let temp_path = temp_path_for(path, parent);

    let written = write_synced(&temp_path, data);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    sync_directory(parent)
}

/// Removes `path` and syncs its directory. A missing file is not an error.
///
/// # Errors
///
/// Returns the underlying I/O error if removal or the directory sync fails.
pub fn remove_durably(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }
    if let Some(parent) = path.parent() {
        sync_directory(parent)?;
    }
    Ok(true)
}

/// Makes metadata changes (create, rename, unlink) in `dir` durable.
///
/// # Errors
///
/// Returns an error if the directory cannot be opened or synced.
#[cfg(unix)]
pub fn sync_directory(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// NTFS renames are atomic and directory handles cannot be synced.
#[cfg(not(unix))]
pub fn sync_directory(dir: &Path) -> io::Result<()> {
    let _ = dir;
    Ok(())
}

/// Temporary files are hidden and never end in `.json`, so journal listing
/// skips them.
pub(crate) fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn temp_path_for(path: &Path, parent: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "entry".to_string(), |n| n.to_string_lossy().into_owned());
    parent.join(format!(".{name}.tmp.{}", std::process::id()))
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()
}
