//! Deferred removal of transient paths.
//!
//! Layered assembly leaves behind files that must not survive into the
//! final tree. They are queued while layers are applied and removed in one
//! sweep afterwards, so removing a path never interferes with a later layer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

/// Errors arising from cleanup.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    /// A directory could not be listed while queueing its contents.
    #[error("failed to list {}: {source}", .dir.display())]
    Scan {
        /// Directory being listed.
        dir: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// One or more queued paths could not be removed.
    #[error("failed to remove {} ({others} further failures): {source}", .path.display())]
    Remove {
        /// First path that could not be removed.
        path: PathBuf,
        /// Why it could not be removed.
        #[source]
        source: io::Error,
        /// Number of other paths that also failed.
        others: usize,
    },
}

/// An ordered, duplicate-free set of paths to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSet {
    paths: Vec<PathBuf>,
}

impl CleanupSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `path`. Queueing a path twice has no further effect.
    pub fn push(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Queue every entry inside `dir`, hidden entries included, but not
    /// `dir` itself. A missing `dir` queues nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CleanupError::Scan`] if `dir` exists but cannot be listed.
    pub fn push_contents(&mut self, dir: &Path) -> Result<(), CleanupError> {
        let scan_err = |source| CleanupError::Scan {
            dir: dir.to_path_buf(),
            source,
        };
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(scan_err(err)),
        };
        for entry in entries {
            self.push(entry.map_err(scan_err)?.path());
        }
        Ok(())
    }

    /// Queued paths in insertion order.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Number of queued paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Remove every queued path, recursing into directories.
    ///
    /// Paths that are already gone are skipped, so purging the same set
    /// twice is harmless. Other failures do not stop the sweep; the first
    /// is reported once every path has been attempted.
    ///
    /// Returns the number of paths actually removed.
    ///
    /// # Errors
    ///
    /// Returns [`CleanupError::Remove`] if any path could not be removed.
    pub fn purge(self) -> Result<usize, CleanupError> {
        let mut removed = 0;
        let mut failures: Vec<(PathBuf, io::Error)> = Vec::new();
        for path in self.paths {
            match remove_path(&path) {
                Ok(true) => {
                    debug!("removed {}", path.display());
                    removed += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!("failed to remove {}: {err}", path.display());
                    failures.push((path, err));
                }
            }
        }

        let others = failures.len().saturating_sub(1);
        match failures.into_iter().next() {
            Some((path, source)) => Err(CleanupError::Remove {
                path,
                source,
                others,
            }),
            None => Ok(removed),
        }
    }
}

/// Remove a file, symlink or directory tree. Returns `false` if nothing was
/// there.
fn remove_path(path: &Path) -> io::Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
