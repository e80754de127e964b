//! Directory resolution abstraction for platform-specific paths.
//!
//! Downloads land in a cache directory. The CLI flag wins, then the
//! definition file, then the platform cache directory.

use std::path::PathBuf;

/// Application name used for platform directories.
const APPLICATION: &str = "rootstrap";

/// Source of platform base directories.
pub trait BaseDirs {
    /// Platform cache directory for rootstrap, if one can be determined.
    fn cache_dir(&self) -> Option<PathBuf>;
}

/// [`BaseDirs`] backed by `directories-next`.
///
/// - Linux: `~/.cache/rootstrap`
/// - macOS: `~/Library/Caches/rootstrap`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBaseDirs;

impl BaseDirs for SystemBaseDirs {
    fn cache_dir(&self) -> Option<PathBuf> {
        directories_next::ProjectDirs::from("", "", APPLICATION)
            .map(|dirs| dirs.cache_dir().to_path_buf())
    }
}

/// Pick the cache directory for a run.
#[must_use]
pub fn resolve_cache_dir(
    cli: Option<PathBuf>,
    definition: Option<PathBuf>,
    dirs: &dyn BaseDirs,
) -> Option<PathBuf> {
    cli.or(definition).or_else(|| dirs.cache_dir())
}
