//! HTTP transport and the caching, retrying downloader.
//!
//! [`Transport`] is the raw byte mover. [`CachingDownloader`] layers the
//! download cache, retries and checksum enforcement on top of it, so backends
//! and the trust chain only ever deal with the [`Downloader`] trait.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use rootstrap_common::RetryPolicy;
use url::Url;

use super::checksum::{ChecksumError, ChecksumSource, HashAlgorithm, find_entry};

/// Length of the hex prefix used to name per-URL cache directories.
const CACHE_KEY_LEN: usize = 16;

/// Moves bytes from a URL to memory or disk.
///
/// Implementations should not retry; [`CachingDownloader`] owns that policy.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Fetch `url` and return the body as text.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::NotFound`] for a 404 and
    /// [`DownloadError::Http`] for other transfer failures.
    fn get_text(&self, url: &str) -> Result<String, DownloadError>;

    /// Fetch `url` and write the body to `dest`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns a transfer error as for [`Transport::get_text`], or
    /// [`DownloadError::Io`] if `dest` cannot be written.
    fn get_to_file(&self, url: &str, dest: &Path) -> Result<(), DownloadError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        (**self).get_text(url)
    }

    fn get_to_file(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        (**self).get_to_file(url, dest)
    }
}

/// Errors arising from downloads.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The transfer failed.
    #[error("download failed for {url}: {reason}")]
    Http {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The server answered 404.
    #[error("not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// The URL does not end in a file name.
    #[error("URL has no file name: {url}")]
    NoFileName {
        /// The offending URL.
        url: String,
    },

    /// Local filesystem failure while storing a download.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The published checksum was missing or did not match.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
}

impl DownloadError {
    /// Whether retrying the same request might succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Http { .. })
    }
}

/// Fetches artefacts into a local directory.
pub trait Downloader {
    /// Fetch `url` into a local directory and return that directory.
    ///
    /// When `checksums` is given the file is hashed after transfer and a
    /// mismatch is an error; the mismatching file is not left behind.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on transfer, storage or checksum failure.
    fn fetch(&self, url: &Url, checksums: Option<&ChecksumSource>)
    -> Result<PathBuf, DownloadError>;

    /// Fetch `url` and return the body as text.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on transfer failure.
    fn fetch_text(&self, url: &Url) -> Result<String, DownloadError>;

    /// Like [`Downloader::fetch`], but returns the path of the file itself.
    ///
    /// # Errors
    ///
    /// As for [`Downloader::fetch`].
    fn fetch_file(
        &self,
        url: &Url,
        checksums: Option<&ChecksumSource>,
    ) -> Result<PathBuf, DownloadError> {
        let dir = self.fetch(url, checksums)?;
        Ok(dir.join(url_file_name(url)?))
    }
}

/// Last path segment of `url`.
///
/// # Errors
///
/// Returns [`DownloadError::NoFileName`] if the URL ends in `/` or has no
/// path.
pub fn url_file_name(url: &Url) -> Result<&str, DownloadError> {
    url.path_segments()
        .and_then(Iterator::last)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DownloadError::NoFileName {
            url: url.to_string(),
        })
}

/// Production [`Downloader`]: caches by URL, retries transfers and enforces
/// checksums.
///
/// Files land in `<cache>/downloads/<key>/<file>`, where `<key>` is derived
/// from the URL's directory. Artefacts from the same upstream directory
/// (an image and its checksum manifest) therefore share a cache directory.
#[derive(Debug)]
pub struct CachingDownloader<T> {
    transport: T,
    cache_dir: PathBuf,
    retry: RetryPolicy,
}

impl<T: Transport> CachingDownloader<T> {
    /// Create a downloader storing files under `cache_dir`.
    pub fn new(transport: T, cache_dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            cache_dir: cache_dir.into(),
            retry,
        }
    }

    /// Cache directory for artefacts from `url`.
    #[must_use]
    pub fn cache_dir_for(&self, url: &Url) -> PathBuf {
        let mut parent = url.clone();
        if let Ok(mut segments) = parent.path_segments_mut() {
            segments.pop();
        }
        let digest = HashAlgorithm::Sha256.digest_bytes(parent.as_str().as_bytes());
        let key = digest.get(..CACHE_KEY_LEN).unwrap_or(&digest);
        self.cache_dir.join("downloads").join(key)
    }

    fn expected_hash(
        &self,
        source: &ChecksumSource,
        filename: &str,
    ) -> Result<String, DownloadError> {
        let manifest = match source.local() {
            Some(path) => fs::read_to_string(path).map_err(|err| DownloadError::Io {
                path: path.to_path_buf(),
                source: err,
            })?,
            None => self.fetch_text(source.url())?,
        };
        find_entry(&manifest, filename, source.algorithm()).ok_or_else(|| {
            ChecksumError::MissingEntry {
                manifest: source.url().to_string(),
                filename: filename.to_owned(),
                algorithm: source.algorithm(),
            }
            .into()
        })
    }

    fn transfer(&self, url: &Url, target: &Path) -> Result<(), DownloadError> {
        let partial = target.with_file_name(format!(
            "{}.part",
            target
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default()
        ));
        self.retry.run_while(
            |attempt| {
                debug!("fetching {url} (attempt {attempt})");
                self.transport.get_to_file(url.as_str(), &partial)
            },
            DownloadError::is_transient,
        )?;
        fs::rename(&partial, target).map_err(|source| DownloadError::Io {
            path: target.to_path_buf(),
            source,
        })
    }
}

impl<T: Transport> Downloader for CachingDownloader<T> {
    fn fetch(
        &self,
        url: &Url,
        checksums: Option<&ChecksumSource>,
    ) -> Result<PathBuf, DownloadError> {
        let filename = url_file_name(url)?;
        let dir = self.cache_dir_for(url);
        fs::create_dir_all(&dir).map_err(|source| DownloadError::Io {
            path: dir.clone(),
            source,
        })?;
        let target = dir.join(filename);

        let expected = checksums
            .map(|source| {
                self.expected_hash(source, filename)
                    .map(|hash| (hash, source.algorithm()))
            })
            .transpose()?;

        if let Some((hash, algorithm)) = &expected
            && target.is_file()
            && algorithm.digest_file(&target)? == *hash
        {
            debug!("reusing cached {}", target.display());
            return Ok(dir);
        }

        info!("Downloading {url}");
        self.transfer(url, &target)?;

        if let Some((hash, algorithm)) = expected {
            let actual = algorithm.digest_file(&target)?;
            if actual != hash {
                // Never leave a file that failed its checksum in the cache.
                if let Err(err) = fs::remove_file(&target) {
                    debug!("could not remove {}: {err}", target.display());
                }
                return Err(ChecksumError::Mismatch {
                    filename: filename.to_owned(),
                    expected: hash,
                    actual,
                }
                .into());
            }
            debug!("{algorithm} verified for {filename}");
        }
        Ok(dir)
    }

    fn fetch_text(&self, url: &Url) -> Result<String, DownloadError> {
        self.retry.run_while(
            |_| self.transport.get_text(url.as_str()),
            DownloadError::is_transient,
        )
    }
}

/// Timeout for index pages when none is configured.
pub const INDEX_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Transport`] over HTTP(S) using `ureq`.
///
/// Index pages and artefacts use separate agents; pages always carry a
/// timeout.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    pages: ureq::Agent,
    files: ureq::Agent,
}

impl UreqTransport {
    /// Build a transport with an optional whole-request timeout.
    ///
    /// Index pages fall back to [`INDEX_TIMEOUT`] when `timeout` is `None`.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            pages: agent(timeout.or(Some(INDEX_TIMEOUT))),
            files: agent(timeout),
        }
    }
}

fn agent(timeout: Option<Duration>) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(timeout)
        .build();
    ureq::Agent::new_with_config(config)
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Transport for UreqTransport {
    fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        let response = self
            .pages
            .get(url)
            .call()
            .map_err(|e| map_ureq_error(url, &e))?;
        response
            .into_body()
            .read_to_string()
            .map_err(|e| DownloadError::Http {
                url: url.to_owned(),
                reason: e.to_string(),
            })
    }

    fn get_to_file(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let response = self
            .files
            .get(url)
            .call()
            .map_err(|e| map_ureq_error(url, &e))?;
        let io_err = |source| DownloadError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = fs::File::create(dest).map_err(io_err)?;
        std::io::copy(&mut response.into_body().as_reader(), &mut file).map_err(|e| {
            DownloadError::Http {
                url: url.to_owned(),
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }
}

/// Map a ureq error to a [`DownloadError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> DownloadError {
    match err {
        ureq::Error::StatusCode(404) => DownloadError::NotFound {
            url: url.to_owned(),
        },
        other => DownloadError::Http {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
#[path = "download_tests.rs"]
mod tests;
