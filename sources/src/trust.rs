//! Verification policy and the trust chain.
//!
//! Trust in an artefact comes from one of two places: an OpenPGP signature
//! over a checksum manifest (or over the artefact itself) made by a
//! configured key, or the HTTPS transport when no keys are configured. The
//! policy is resolved once per artefact by [`TrustChain::establish`] before
//! the artefact is downloaded, and finished by [`TrustChain::confirm`] after
//! the download and before anything is unpacked.
//!
//! The floor: with no keys configured, plain-HTTP artefacts are refused
//! unless verification is explicitly skipped.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rootstrap_common::SourceConfig;
use url::Url;

use crate::artefact::checksum::{ChecksumSource, HashAlgorithm};
use crate::artefact::download::{DownloadError, Downloader};
use crate::artefact::signature::{SignatureVerifier, VerifyError};

/// Signed metadata a publisher provides for an artefact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attestation {
    /// A checksum manifest with a separate signature file.
    Detached {
        /// Checksum manifest URL.
        checksums: Url,
        /// Detached signature over the manifest.
        signature: Url,
    },
    /// A checksum manifest carrying an inline signature.
    Clearsigned {
        /// Clearsigned manifest URL.
        checksums: Url,
    },
    /// A detached signature over the artefact itself, with no manifest.
    ArtifactSignature {
        /// Signature URL.
        signature: Url,
    },
    /// The publisher offers nothing verifiable beyond the transport.
    None,
}

impl Attestation {
    /// URL of the checksum manifest, if this attestation has one.
    #[must_use]
    pub const fn checksums(&self) -> Option<&Url> {
        match self {
            Self::Detached { checksums, .. } | Self::Clearsigned { checksums } => Some(checksums),
            Self::ArtifactSignature { .. } | Self::None => None,
        }
    }
}

/// How one artefact is to be verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRequest {
    artifact: Url,
    attestation: Attestation,
    algorithm: HashAlgorithm,
    checksums_over_https: bool,
}

impl TrustRequest {
    /// Describe the artefact at `artifact` and what its publisher signs.
    #[must_use]
    pub const fn new(artifact: Url, attestation: Attestation, algorithm: HashAlgorithm) -> Self {
        Self {
            artifact,
            attestation,
            algorithm,
            checksums_over_https: false,
        }
    }

    /// Also hash-check the artefact against its (unsigned) manifest when
    /// trust rests on HTTPS alone.
    #[must_use]
    pub const fn with_checksums_over_https(mut self) -> Self {
        self.checksums_over_https = true;
        self
    }

    /// Artefact URL.
    #[must_use]
    pub const fn artifact(&self) -> &Url {
        &self.artifact
    }
}

/// The outcome of [`TrustChain::establish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trust {
    /// Verification was skipped by configuration.
    Skipped,
    /// Trust rests on HTTPS; the artefact may still be hash-checked.
    Transport {
        /// Unsigned manifest to hash-check against, if any.
        checksums: Option<ChecksumSource>,
    },
    /// The checksum manifest carries a valid signature.
    Signed {
        /// The verified manifest.
        checksums: ChecksumSource,
    },
    /// The artefact's own signature must be checked once it is downloaded.
    PendingArtifactSignature {
        /// Downloaded signature file.
        signature: PathBuf,
    },
}

impl Trust {
    /// Checksums the download must match, if any.
    #[must_use]
    pub const fn checksums(&self) -> Option<&ChecksumSource> {
        match self {
            Self::Transport { checksums } => checksums.as_ref(),
            Self::Signed { checksums } => Some(checksums),
            Self::Skipped | Self::PendingArtifactSignature { .. } => None,
        }
    }
}

impl fmt::Display for Trust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "verification skipped"),
            Self::Transport { checksums: None } => write!(f, "trusted via HTTPS"),
            Self::Transport { checksums: Some(_) } => {
                write!(f, "trusted via HTTPS with checksum")
            }
            Self::Signed { checksums } => {
                write!(f, "signed {} manifest", checksums.algorithm())
            }
            Self::PendingArtifactSignature { .. } => write!(f, "awaiting artefact signature"),
        }
    }
}

/// Errors arising while establishing or confirming trust.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Plain HTTP with no trusted keys configured.
    #[error("refusing unverifiable download {url}: configure trusted keys or use HTTPS")]
    KeysRequired {
        /// The artefact URL.
        url: String,
    },

    /// Plain HTTP where keys are configured but the publisher signs nothing.
    #[error("refusing unverifiable download {url}: no signed metadata is published; use HTTPS")]
    UnsignedOverHttp {
        /// The artefact URL.
        url: String,
    },

    /// Fetching attestation material failed.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        /// The attestation URL.
        url: String,
        /// Underlying error.
        #[source]
        source: DownloadError,
    },

    /// The signature was checked and is not valid for any trusted key.
    #[error("invalid signature for {}", .file.display())]
    InvalidSignature {
        /// The signed file.
        file: PathBuf,
    },

    /// Verification could not be attempted.
    #[error("cannot verify {}: {source}", .file.display())]
    Verifier {
        /// The signed file.
        file: PathBuf,
        /// Underlying error.
        #[source]
        source: VerifyError,
    },
}

/// Resolves and enforces the verification policy for a single source.
pub struct TrustChain<'a> {
    config: &'a SourceConfig,
    downloader: &'a dyn Downloader,
    verifier: &'a dyn SignatureVerifier,
}

impl<'a> TrustChain<'a> {
    /// Build a trust chain over the given collaborators.
    #[must_use]
    pub fn new(
        config: &'a SourceConfig,
        downloader: &'a dyn Downloader,
        verifier: &'a dyn SignatureVerifier,
    ) -> Self {
        Self {
            config,
            downloader,
            verifier,
        }
    }

    /// Decide how the artefact in `request` will be trusted.
    ///
    /// Attestation material is downloaded and manifest signatures are
    /// checked here, before the artefact itself is fetched.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::KeysRequired`] or [`TrustError::UnsignedOverHttp`]
    /// when the artefact is plain HTTP and nothing signed can vouch for it,
    /// or a fetch or signature error.
    pub fn establish(&self, request: &TrustRequest) -> Result<Trust, TrustError> {
        if self.config.skip_verification() {
            warn!("Skipping verification of {}", request.artifact);
            return Ok(Trust::Skipped);
        }

        let signed = self.config.has_keys() && request.attestation != Attestation::None;
        if !signed {
            if request.artifact.scheme() != "https" {
                let url = request.artifact.to_string();
                return Err(if self.config.has_keys() {
                    TrustError::UnsignedOverHttp { url }
                } else {
                    TrustError::KeysRequired { url }
                });
            }
            if self.config.has_keys() {
                warn!(
                    "No signed metadata published for {}; relying on HTTPS",
                    request.artifact
                );
            }
            let checksums = request
                .checksums_over_https
                .then(|| request.attestation.checksums())
                .flatten()
                .map(|url| ChecksumSource::remote(url.clone(), request.algorithm));
            return Ok(Trust::Transport { checksums });
        }

        match &request.attestation {
            Attestation::Detached {
                checksums,
                signature,
            } => {
                let manifest = self.fetch(checksums)?;
                let sig = self.fetch(signature)?;
                self.check(&manifest, Some(&sig))?;
                Ok(Trust::Signed {
                    checksums: ChecksumSource::verified(
                        checksums.clone(),
                        request.algorithm,
                        manifest,
                    ),
                })
            }
            Attestation::Clearsigned { checksums } => {
                let manifest = self.fetch(checksums)?;
                self.check(&manifest, None)?;
                Ok(Trust::Signed {
                    checksums: ChecksumSource::verified(
                        checksums.clone(),
                        request.algorithm,
                        manifest,
                    ),
                })
            }
            Attestation::ArtifactSignature { signature } => Ok(Trust::PendingArtifactSignature {
                signature: self.fetch(signature)?,
            }),
            Attestation::None => Ok(Trust::Transport { checksums: None }),
        }
    }

    /// Finish verification of a downloaded artefact.
    ///
    /// Only [`Trust::PendingArtifactSignature`] has work left to do here;
    /// hash checks happen inside the download itself.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidSignature`] if the artefact's signature
    /// does not verify.
    pub fn confirm(&self, trust: &Trust, artifact: &Path) -> Result<(), TrustError> {
        match trust {
            Trust::PendingArtifactSignature { signature } => self.check(artifact, Some(signature)),
            Trust::Skipped | Trust::Transport { .. } | Trust::Signed { .. } => Ok(()),
        }
    }

    fn fetch(&self, url: &Url) -> Result<PathBuf, TrustError> {
        self.downloader
            .fetch_file(url, None)
            .map_err(|source| TrustError::Fetch {
                url: url.to_string(),
                source,
            })
    }

    fn check(&self, file: &Path, signature: Option<&Path>) -> Result<(), TrustError> {
        let valid = self
            .verifier
            .verify(file, signature)
            .map_err(|source| TrustError::Verifier {
                file: file.to_path_buf(),
                source,
            })?;
        if !valid {
            return Err(TrustError::InvalidSignature {
                file: file.to_path_buf(),
            });
        }
        info!("Verified signature on {}", file.display());
        Ok(())
    }
}

#[cfg(test)]
#[path = "trust_tests.rs"]
mod tests;
