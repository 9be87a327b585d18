//! On-disk layout: one subdirectory per frame kind under a base directory,
//! files named by capture time in epoch milliseconds.
//!
//! Each frame kind is its own failure domain. A kind that fails to encode or
//! write is reported and skipped; the others in the same set still land.

use crate::encoder::{self, EncodeError, Encoding};
use kinectrec_hw::{Frame, FrameKind};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Two saves of the same kind within one millisecond. The earlier file is kept.
    #[error("{path} already exists (two captures in the same millisecond)")]
    Collision { path: PathBuf },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("writer thread panicked")]
    WorkerPanicked,
}

/// How the frames of one set are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// One after another on the capture thread.
    #[default]
    Sequential,
    /// One scoped thread per frame kind, joined before returning.
    Parallel,
}

/// Path of the file holding `kind` captured at `timestamp_ms`.
pub fn resolve_path(base: &Path, kind: FrameKind, timestamp_ms: i64) -> PathBuf {
    let extension = Encoding::for_kind(kind).extension();
    base.join(kind.name())
        .join(format!("{timestamp_ms}.{extension}"))
}

/// Create `path` and its parents. An existing directory is not an error.
pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(path).map_err(|source| StorageError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `bytes` to a file that must not exist yet.
///
/// A failed write removes the partial file.
fn write_new_file(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(StorageError::Collision {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(StorageError::Write {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if let Err(source) = file.write_all(bytes).and_then(|()| file.flush()) {
        drop(file);
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove partial file");
        }
        return Err(StorageError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Outcome of saving one frame set.
#[derive(Debug, Default)]
pub struct SaveReport {
    pub saved: Vec<(FrameKind, PathBuf)>,
    pub failures: Vec<(FrameKind, SaveError)>,
}

impl SaveReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn path_for(&self, kind: FrameKind) -> Option<&Path> {
        self.saved
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| p.as_path())
    }

    pub fn failure_for(&self, kind: FrameKind) -> Option<&SaveError> {
        self.failures
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, e)| e)
    }
}

/// Base directory plus the set of frame kinds this run records.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base: PathBuf,
    kinds: BTreeSet<FrameKind>,
    write_mode: WriteMode,
}

impl StorageLayout {
    pub fn new(base: impl Into<PathBuf>, kinds: impl IntoIterator<Item = FrameKind>) -> Self {
        Self {
            base: base.into(),
            kinds: kinds.into_iter().collect(),
            write_mode: WriteMode::default(),
        }
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn is_enabled(&self, kind: FrameKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn enabled_kinds(&self) -> impl Iterator<Item = FrameKind> + '_ {
        self.kinds.iter().copied()
    }

    /// Create the base directory and one subdirectory per enabled kind.
    pub fn prepare(&self) -> Result<(), StorageError> {
        ensure_directory(&self.base)?;
        for kind in &self.kinds {
            ensure_directory(&self.base.join(kind.name()))?;
        }
        Ok(())
    }

    /// Save every enabled frame of one capture under `timestamp_ms`.
    ///
    /// Frames of disabled kinds are ignored. Returns once every write has
    /// finished, whatever the write mode.
    pub fn save_frame_set(&self, frames: &[&Frame], timestamp_ms: i64) -> SaveReport {
        let targets: Vec<&Frame> = frames
            .iter()
            .copied()
            .filter(|f| self.is_enabled(f.kind))
            .collect();

        let results: Vec<(FrameKind, Result<PathBuf, SaveError>)> = match self.write_mode {
            WriteMode::Sequential => targets
                .iter()
                .map(|frame| (frame.kind, self.save_frame(frame, timestamp_ms)))
                .collect(),
            WriteMode::Parallel => std::thread::scope(|scope| {
                let handles: Vec<_> = targets
                    .iter()
                    .map(|&frame| {
                        let handle = scope.spawn(move || self.save_frame(frame, timestamp_ms));
                        (frame.kind, handle)
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(kind, handle)| {
                        let result = handle.join().unwrap_or(Err(SaveError::WorkerPanicked));
                        (kind, result)
                    })
                    .collect()
            }),
        };

        let mut report = SaveReport::default();
        for (kind, result) in results {
            match result {
                Ok(path) => {
                    tracing::debug!(%kind, path = %path.display(), "saved frame");
                    report.saved.push((kind, path));
                }
                Err(SaveError::Storage(e @ StorageError::Collision { .. })) => {
                    tracing::warn!(%kind, error = %e, "skipping frame, file already exists");
                    report.failures.push((kind, SaveError::Storage(e)));
                }
                Err(e) => {
                    tracing::error!(%kind, error = %e, "failed to save frame");
                    report.failures.push((kind, e));
                }
            }
        }
        report
    }

    fn save_frame(&self, frame: &Frame, timestamp_ms: i64) -> Result<PathBuf, SaveError> {
        let path = resolve_path(&self.base, frame.kind, timestamp_ms);
        ensure_directory(&self.base.join(frame.kind.name()))?;
        let bytes = encoder::encode(frame)?;
        write_new_file(&path, &bytes)?;
        Ok(path)
    }
}
