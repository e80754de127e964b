//! Acquisition strategies, one per distribution family.
//!
//! Every backend follows the same three steps: resolve the artefact URL
//! from the configuration (consulting an index page where needed), fetch
//! it under the trust chain, and assemble the root filesystem from it. The
//! steps share an [`Acquisition`] context holding the configuration and the
//! injected collaborators.
//!
//! The backend is chosen once, from the definition's `downloader` field,
//! via [`SourceKind`].

pub mod alt;
pub mod fedora;
pub mod gentoo;
pub mod openwrt;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;
use rootstrap_common::SourceConfig;
use url::Url;

use crate::artefact::download::Downloader;
use crate::artefact::extraction::ArchiveUnpacker;
use crate::artefact::signature::SignatureVerifier;
use crate::error::{Result, SourceError};
use crate::trust::{TrustChain, TrustRequest};

/// The concrete artefact a backend resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    filename: String,
    url: Url,
}

impl ResolvedArtifact {
    /// Resolve `filename` against the directory URL `base`.
    ///
    /// `base` is treated as a directory whether or not it ends in `/`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidUrl`] if the result is not a valid URL.
    pub fn in_directory(base: &str, filename: &str) -> Result<Self> {
        let raw = format!("{}/{filename}", base.trim_end_matches('/'));
        Ok(Self {
            url: parse_url(&raw)?,
            filename: filename.to_owned(),
        })
    }

    /// File name of the artefact.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Full artefact URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// A sibling file in the same directory, such as a checksum manifest.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidUrl`] if the result is not a valid URL.
    pub fn sibling(&self, name: &str) -> Result<Url> {
        self.url.join(name).map_err(|source| SourceError::InvalidUrl {
            url: name.to_owned(),
            source,
        })
    }

    /// The artefact URL with `suffix` appended, such as `.asc`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidUrl`] if the result is not a valid URL.
    pub fn with_suffix(&self, suffix: &str) -> Result<Url> {
        parse_url(&format!("{}{suffix}", self.url))
    }
}

/// Parse a URL built from configuration.
///
/// # Errors
///
/// Returns [`SourceError::InvalidUrl`] on failure.
pub fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|source| SourceError::InvalidUrl {
        url: raw.to_owned(),
        source,
    })
}

/// Configuration and collaborators shared by every step of one run.
pub struct Acquisition<'a> {
    config: &'a SourceConfig,
    rootfs: &'a Path,
    downloader: &'a dyn Downloader,
    verifier: &'a dyn SignatureVerifier,
    unpacker: &'a dyn ArchiveUnpacker,
}

impl<'a> Acquisition<'a> {
    /// Bundle the run configuration with its collaborators.
    #[must_use]
    pub fn new(
        config: &'a SourceConfig,
        rootfs: &'a Path,
        downloader: &'a dyn Downloader,
        verifier: &'a dyn SignatureVerifier,
        unpacker: &'a dyn ArchiveUnpacker,
    ) -> Self {
        Self {
            config,
            rootfs,
            downloader,
            verifier,
            unpacker,
        }
    }

    /// Source configuration.
    #[must_use]
    pub const fn config(&self) -> &'a SourceConfig {
        self.config
    }

    /// Target root filesystem directory.
    #[must_use]
    pub const fn rootfs(&self) -> &'a Path {
        self.rootfs
    }

    /// Downloader.
    #[must_use]
    pub fn downloader(&self) -> &'a dyn Downloader {
        self.downloader
    }

    /// Unpacker.
    #[must_use]
    pub fn unpacker(&self) -> &'a dyn ArchiveUnpacker {
        self.unpacker
    }

    /// Trust chain over this run's collaborators.
    #[must_use]
    pub fn trust_chain(&self) -> TrustChain<'a> {
        TrustChain::new(self.config, self.downloader, self.verifier)
    }

    /// Establish trust, download, then confirm trust, in that order.
    ///
    /// Returns the path of the downloaded artefact. Nothing is returned,
    /// and so nothing can be unpacked, unless every check passed.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Trust`] if trust cannot be established or
    /// confirmed and [`SourceError::Download`] if the transfer or checksum
    /// fails.
    pub fn verified_fetch(&self, request: &TrustRequest) -> Result<PathBuf> {
        let chain = self.trust_chain();
        let trust = chain.establish(request)?;
        info!("{}: {trust}", request.artifact());
        let path = self
            .downloader
            .fetch_file(request.artifact(), trust.checksums())
            .map_err(|source| SourceError::Download {
                url: request.artifact().to_string(),
                source,
            })?;
        chain.confirm(&trust, &path)?;
        Ok(path)
    }

    /// Unpack `archive` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unpack`] on failure.
    pub fn unpack(&self, archive: &Path, dest: &Path) -> Result<()> {
        info!("Unpacking {}", archive.display());
        self.unpacker.unpack(archive, dest)?;
        Ok(())
    }
}

/// One distribution family's acquisition strategy.
pub trait Source {
    /// Downloader name as used in definition files.
    fn name(&self) -> &'static str;

    /// Work out which artefact to fetch.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the configuration cannot be mapped to an
    /// artefact or an index page cannot be resolved.
    fn resolve(&self, acq: &Acquisition<'_>) -> Result<ResolvedArtifact>;

    /// Fetch the resolved artefact under the trust chain and return its
    /// local path.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on trust or transfer failure.
    fn fetch(&self, acq: &Acquisition<'_>, artifact: &ResolvedArtifact) -> Result<PathBuf>;

    /// Build the root filesystem from the fetched artefact. By default the
    /// artefact is unpacked straight into the target directory.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on unpacking or assembly failure.
    fn assemble(&self, acq: &Acquisition<'_>, archive: &Path) -> Result<()> {
        acq.unpack(archive, acq.rootfs())
    }

    /// Resolve, fetch and assemble.
    ///
    /// # Errors
    ///
    /// Returns the first step's error.
    fn run(&self, acq: &Acquisition<'_>) -> Result<()> {
        let artifact = self.resolve(acq)?;
        info!(
            "{}: resolved {} at {}",
            self.name(),
            artifact.filename(),
            artifact.url()
        );
        let archive = self.fetch(acq, &artifact)?;
        self.assemble(acq, &archive)
    }
}

/// The known backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// ALT Linux cloud images.
    AltHttp,
    /// Fedora container base images.
    FedoraHttp,
    /// Gentoo stage3 tarballs plus a Portage snapshot.
    GentooHttp,
    /// OpenWrt root filesystem tarballs.
    OpenWrtHttp,
}

impl SourceKind {
    /// Every backend, in documentation order.
    pub const ALL: [Self; 4] = [
        Self::AltHttp,
        Self::FedoraHttp,
        Self::GentooHttp,
        Self::OpenWrtHttp,
    ];

    /// Downloader name as used in definition files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AltHttp => "alt-http",
            Self::FedoraHttp => "fedora-http",
            Self::GentooHttp => "gentoo-http",
            Self::OpenWrtHttp => "openwrt-http",
        }
    }

    /// The backend implementation.
    #[must_use]
    pub fn source(self) -> Box<dyn Source> {
        match self {
            Self::AltHttp => Box::new(alt::AltLinux),
            Self::FedoraHttp => Box::new(fedora::Fedora),
            Self::GentooHttp => Box::new(gentoo::Gentoo),
            Self::OpenWrtHttp => Box::new(openwrt::OpenWrt),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = SourceError;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| SourceError::UnknownBackend {
                name: name.to_owned(),
                expected: Self::ALL.map(Self::as_str).join(", "),
            })
    }
}
