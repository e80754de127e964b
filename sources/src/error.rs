//! The terminal error reported for an acquisition run.
//!
//! Component errors keep their own types; [`SourceError`] wraps them with
//! the URL or path involved so the CLI can report a single chain. Every
//! failure is also placed in an [`ErrorCategory`], which drives the exit
//! code.

use std::fmt;
use std::io;
use std::path::PathBuf;

use rootstrap_common::ConfigError;

use crate::artefact::checksum::ChecksumError;
use crate::artefact::download::DownloadError;
use crate::artefact::extraction::UnpackError;
use crate::assembly::AssemblyError;
use crate::resolve::ResolveError;
use crate::trust::TrustError;

/// Errors that end an acquisition run.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The definition file or CLI overrides are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured downloader name is not known.
    #[error("unknown downloader {name:?} (expected one of: {expected})")]
    UnknownBackend {
        /// Name from the definition.
        name: String,
        /// Known names.
        expected: String,
    },

    /// The backend has no mapping for the configured architecture.
    #[error("{backend} does not support architecture {architecture}")]
    UnsupportedArchitecture {
        /// Backend name.
        backend: &'static str,
        /// Configured architecture.
        architecture: String,
    },

    /// A URL built from the configuration is invalid.
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
        /// Underlying error.
        #[source]
        source: url::ParseError,
    },

    /// No cache directory was configured or discoverable.
    #[error("no cache directory available; pass --cache-dir")]
    NoCacheDir,

    /// Version resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Trust could not be established.
    #[error(transparent)]
    Trust(#[from] TrustError),

    /// The artefact itself could not be downloaded.
    #[error("failed to download {url}: {source}")]
    Download {
        /// Artefact URL.
        url: String,
        /// Underlying error.
        #[source]
        source: DownloadError,
    },

    /// An archive could not be unpacked.
    #[error(transparent)]
    Unpack(#[from] UnpackError),

    /// Layered assembly failed.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// A post-unpack filesystem step failed.
    #[error("failed to {action} {}: {source}", .path.display())]
    Filesystem {
        /// What was being done.
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Result type for acquisition operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Broad failure classes, each with its own process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad configuration or arguments.
    Configuration,
    /// Network or mirror failure, possibly transient.
    Transport,
    /// The index page did not contain what was looked for.
    Resolution,
    /// Signature or checksum failure; the download must not be used.
    Trust,
    /// Local filesystem or archive failure.
    Filesystem,
}

impl ErrorCategory {
    /// Process exit code for this category.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Configuration => 2,
            Self::Transport => 3,
            Self::Resolution => 4,
            Self::Trust => 5,
            Self::Filesystem => 6,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::Resolution => "resolution",
            Self::Trust => "trust",
            Self::Filesystem => "filesystem",
        };
        f.write_str(name)
    }
}

impl SourceError {
    /// Classify this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::UnknownBackend { .. }
            | Self::UnsupportedArchitecture { .. }
            | Self::InvalidUrl { .. }
            | Self::NoCacheDir => ErrorCategory::Configuration,
            Self::Resolve(ResolveError::NoMatch { .. }) => ErrorCategory::Resolution,
            Self::Resolve(ResolveError::Pattern(_)) => ErrorCategory::Configuration,
            Self::Resolve(ResolveError::Fetch { source, .. })
            | Self::Download { source, .. }
            | Self::Trust(TrustError::Fetch { source, .. }) => download_category(source),
            Self::Trust(_) => ErrorCategory::Trust,
            Self::Unpack(_)
            | Self::Assembly(_)
            | Self::Filesystem { .. } => ErrorCategory::Filesystem,
        }
    }
}

const fn download_category(err: &DownloadError) -> ErrorCategory {
    match err {
        DownloadError::Checksum(ChecksumError::Io { .. }) | DownloadError::Io { .. } => {
            ErrorCategory::Filesystem
        }
        DownloadError::Checksum(_) => ErrorCategory::Trust,
        DownloadError::NoFileName { .. } => ErrorCategory::Configuration,
        DownloadError::Http { .. } | DownloadError::NotFound { .. } => ErrorCategory::Transport,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn not_found() -> DownloadError {
        DownloadError::NotFound {
            url: "https://mirror.test/x".to_owned(),
        }
    }

    #[rstest]
    #[case::unknown(
        SourceError::UnknownBackend { name: "x".to_owned(), expected: String::new() },
        ErrorCategory::Configuration
    )]
    #[case::no_match(
        SourceError::Resolve(ResolveError::NoMatch { url: String::new(), what: String::new() }),
        ErrorCategory::Resolution
    )]
    #[case::index_fetch(
        SourceError::Resolve(ResolveError::Fetch { url: String::new(), source: not_found() }),
        ErrorCategory::Transport
    )]
    #[case::keys_required(
        SourceError::Trust(TrustError::KeysRequired { url: String::new() }),
        ErrorCategory::Trust
    )]
    #[case::unsigned_over_http(
        SourceError::Trust(TrustError::UnsignedOverHttp { url: String::new() }),
        ErrorCategory::Trust
    )]
    #[case::mismatch(
        SourceError::Download {
            url: String::new(),
            source: DownloadError::Checksum(ChecksumError::Mismatch {
                filename: String::new(),
                expected: String::new(),
                actual: String::new(),
            }),
        },
        ErrorCategory::Trust
    )]
    #[case::transfer(
        SourceError::Download { url: String::new(), source: not_found() },
        ErrorCategory::Transport
    )]
    fn categories(#[case] err: SourceError, #[case] expected: ErrorCategory) {
        assert_eq!(err.category(), expected);
    }

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let codes = [
            ErrorCategory::Configuration,
            ErrorCategory::Transport,
            ErrorCategory::Resolution,
            ErrorCategory::Trust,
            ErrorCategory::Filesystem,
        ]
        .map(ErrorCategory::exit_code);
        assert!(codes.iter().all(|&c| c != 0));
        let mut sorted = codes.to_vec();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }
}
