//! Blocking filesystem primitives. Everything here runs on the blocking pool.

use std::fs::{self, File, Metadata};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use filesaga_journal::io::sync_directory;

use crate::compensation::RevertEffect;
use crate::error::StepError;

const CHUNK_SIZE: usize = 64 * 1024;

/// Set when a step's deadline passes; long-running work stops at the next
/// chunk boundary and cleans up after itself.
#[derive(Debug, Clone, Default)]
pub(crate) struct Abort(Arc<AtomicBool>);

impl Abort {
    pub(crate) fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, path: &Path) -> Result<(), StepError> {
        if self.is_set() {
            return Err(StepError::io(
                "finish before the deadline",
                path,
                io::Error::from(io::ErrorKind::Interrupted),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Renamed {
    Done,
    CrossDevice,
}

pub(crate) fn exists(path: &Path) -> Result<bool, StepError> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StepError::io("inspect", path, err)),
    }
}

fn source_metadata(path: &Path) -> Result<Metadata, StepError> {
    fs::symlink_metadata(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            StepError::SourceMissing {
                path: path.to_path_buf(),
            }
        } else {
            StepError::io("inspect", path, err)
        }
    })
}

fn ensure_free(destination: &Path, overwrite: bool) -> Result<(), StepError> {
    if !overwrite && exists(destination)? {
        return Err(StepError::DestinationConflict {
            path: destination.to_path_buf(),
        });
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), StepError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|err| StepError::io("create directory", parent, err)),
        _ => Ok(()),
    }
}

/// Runs after a change already landed, so a failure leaves the step in doubt.
fn sync_parent(path: &Path) -> Result<(), StepError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            sync_directory(parent).map_err(|source| StepError::Unsynced {
                path: path.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn rename_or_cross_device(source: &Path, destination: &Path) -> Result<Renamed, StepError> {
    match fs::rename(source, destination) {
        Ok(()) => {
            sync_parent(destination)?;
            sync_parent(source)?;
            Ok(Renamed::Done)
        }
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => Ok(Renamed::CrossDevice),
        Err(err) => Err(StepError::io("rename", source, err)),
    }
}

/// Checks preconditions and renames. Reports a cross-device pair instead of
/// failing so the caller can fall back to copy and delete.
pub(crate) fn prepare_move(
    source: &Path,
    destination: &Path,
    overwrite: bool,
    force_copy: bool,
) -> Result<Renamed, StepError> {
    source_metadata(source)?;
    ensure_free(destination, overwrite)?;
    ensure_parent(destination)?;
    if force_copy {
        return Ok(Renamed::CrossDevice);
    }
    rename_or_cross_device(source, destination)
}

pub(crate) fn copy(
    source: &Path,
    destination: &Path,
    overwrite: bool,
    abort: &Abort,
) -> Result<(), StepError> {
    ensure_free(destination, overwrite)?;
    ensure_parent(destination)?;
    copy_contents(source, destination, abort)
}

/// Copies a regular file through a hidden sibling so `destination` only
/// ever appears complete.
fn copy_contents(source: &Path, destination: &Path, abort: &Abort) -> Result<(), StepError> {
    let metadata = source_metadata(source)?;
    if !metadata.is_file() {
        return Err(StepError::NotARegularFile {
            path: source.to_path_buf(),
        });
    }

    let partial = partial_path(destination);
    let result = write_partial(source, &partial, &metadata, abort)
        .and_then(|()| {
            fs::rename(&partial, destination)
                .map_err(|err| StepError::io("rename", &partial, err))
        })
        .and_then(|()| sync_parent(destination));
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_partial(
    source: &Path,
    partial: &Path,
    metadata: &Metadata,
    abort: &Abort,
) -> Result<(), StepError> {
    let mut reader =
        BufReader::new(File::open(source).map_err(|err| StepError::io("open", source, err))?);
    let mut writer =
        File::create(partial).map_err(|err| StepError::io("create", partial, err))?;
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        abort.check(partial)?;
        let read = reader
            .read(&mut buf)
            .map_err(|err| StepError::io("read", source, err))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buf[..read])
            .map_err(|err| StepError::io("write", partial, err))?;
    }

    writer
        .sync_all()
        .map_err(|err| StepError::io("sync", partial, err))?;
    fs::set_permissions(partial, metadata.permissions())
        .map_err(|err| StepError::io("set permissions on", partial, err))?;
    abort.check(partial)
}

fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.filesaga-partial"))
}

pub(crate) fn delete(path: &Path) -> Result<(), StepError> {
    let metadata = source_metadata(path)?;
    if metadata.is_dir() {
        return Err(StepError::NotARegularFile {
            path: path.to_path_buf(),
        });
    }
    remove(path)
}

fn remove(path: &Path) -> Result<(), StepError> {
    fs::remove_file(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            StepError::SourceMissing {
                path: path.to_path_buf(),
            }
        } else {
            StepError::io("remove", path, err)
        }
    })?;
    sync_parent(path)
}

/// Second half of a cross-device move, once the copy is durable.
pub(crate) fn remove_moved_source(source: &Path) -> Result<(), StepError> {
    remove(source).map_err(|err| match err {
        StepError::Io { source: io, .. } => StepError::CrossDevice {
            action: "removing the source",
            path: source.to_path_buf(),
            source: io,
        },
        other => other,
    })
}

/// Drops a copy the step itself just created.
pub(crate) fn discard(path: &Path) -> Result<(), StepError> {
    remove(path)
}

/// Byte-for-byte comparison of two regular files.
pub(crate) fn same_contents(a: &Path, b: &Path) -> Result<bool, StepError> {
    let meta_a = fs::metadata(a).map_err(|err| StepError::io("inspect", a, err))?;
    let meta_b = fs::metadata(b).map_err(|err| StepError::io("inspect", b, err))?;
    if !meta_a.is_file() || !meta_b.is_file() || meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut reader_a = BufReader::new(File::open(a).map_err(|err| StepError::io("open", a, err))?);
    let mut reader_b = BufReader::new(File::open(b).map_err(|err| StepError::io("open", b, err))?);
    let mut buf_a = vec![0u8; CHUNK_SIZE];
    let mut buf_b = vec![0u8; CHUNK_SIZE];

    loop {
        let read = read_full(&mut reader_a, &mut buf_a).map_err(|err| StepError::io("read", a, err))?;
        let read_b =
            read_full(&mut reader_b, &mut buf_b).map_err(|err| StepError::io("read", b, err))?;
        if read != read_b || buf_a[..read] != buf_b[..read] {
            return Ok(false);
        }
        if read == 0 {
            return Ok(true);
        }
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Moves a file from `current` back to `original`.
///
/// `reconcile` is set when the forward step's outcome is unknown: an
/// ambiguous state is then left alone instead of reported as a conflict.
pub(crate) fn restore_move(
    original: &Path,
    current: &Path,
    copy_completed: bool,
    reconcile: bool,
    abort: &Abort,
) -> Result<RevertEffect, StepError> {
    match (exists(original)?, exists(current)?) {
        (true, false) => Ok(RevertEffect::AlreadyRestored),
        (false, true) => {
            ensure_parent(original)?;
            match rename_or_cross_device(current, original)? {
                Renamed::Done => {}
                Renamed::CrossDevice => {
                    copy_contents(current, original, abort)?;
                    remove(current)?;
                }
            }
            Ok(RevertEffect::Restored)
        }
        (true, true) if reconcile && copy_completed && same_contents(original, current)? => {
            remove(current)?;
            Ok(RevertEffect::DuplicateRemoved)
        }
        (true, true) if reconcile => Ok(RevertEffect::Untouched),
        (true, true) => Err(StepError::DestinationConflict {
            path: original.to_path_buf(),
        }),
        (false, false) => Err(StepError::SourceMissing {
            path: current.to_path_buf(),
        }),
    }
}

/// Removes the copy at `destination`.
///
/// Under `reconcile` the copy is removed only if it is byte-identical to
/// `source`, since a differing file may predate the batch.
pub(crate) fn remove_copy(
    source: &Path,
    destination: &Path,
    reconcile: bool,
) -> Result<RevertEffect, StepError> {
    if !exists(destination)? {
        return Ok(RevertEffect::AlreadyRestored);
    }
    if reconcile && !(exists(source)? && same_contents(source, destination)?) {
        return Ok(RevertEffect::Untouched);
    }
    remove(destination)?;
    Ok(RevertEffect::CopyRemoved)
}
