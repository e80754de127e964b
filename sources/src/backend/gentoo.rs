//! Gentoo stage3 tarballs with a Portage tree snapshot.
//!
//! The stage3 name carries a timestamp, so it is resolved from the
//! `current-stage3-*` autobuild index. Each stage3 has a clearsigned
//! `.DIGESTS.asc` manifest with SHA-512 hashes. After the stage3 is
//! unpacked, the latest Portage snapshot is fetched, verified against its
//! own detached signature, and installed as `var/db/repos/gentoo` so the
//! tree is usable without an initial sync.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;

use crate::artefact::checksum::HashAlgorithm;
use crate::error::{Result, SourceError};
use crate::resolve::VersionResolver;
use crate::trust::{Attestation, TrustRequest};

use super::{Acquisition, ResolvedArtifact, Source, parse_url};

/// Snapshot tarball name under `<url>/snapshots/`.
const SNAPSHOT: &str = "portage-latest.tar.xz";

/// Where repositories live inside the root filesystem.
const REPOS_DIR: &str = "var/db/repos";

/// The `gentoo-http` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gentoo;

/// Gentoo groups some architectures under a family directory.
fn arch_family(arch: &str) -> &str {
    if arch == "i686" {
        "x86"
    } else if arch.starts_with("arm") && arch != "arm64" {
        "arm"
    } else if arch.starts_with("ppc") {
        "ppc"
    } else if arch.starts_with("s390") {
        "s390"
    } else {
        arch
    }
}

impl Gentoo {
    fn fetch_snapshot(acq: &Acquisition<'_>) -> Result<PathBuf> {
        let artifact = ResolvedArtifact::in_directory(
            &format!("{}/snapshots", acq.config().url()),
            SNAPSHOT,
        )?;
        let request = TrustRequest::new(
            artifact.url().clone(),
            Attestation::ArtifactSignature {
                signature: artifact.with_suffix(".gpgsig")?,
            },
            HashAlgorithm::Sha512,
        );
        acq.verified_fetch(&request)
    }

    /// Unpack the snapshot and rename its `portage` directory to `gentoo`,
    /// replacing any tree the stage3 shipped.
    fn install_snapshot(acq: &Acquisition<'_>, snapshot: &Path) -> Result<()> {
        let repos = acq.rootfs().join(REPOS_DIR);
        acq.unpack(snapshot, &repos)?;

        let target = repos.join("gentoo");
        match fs::remove_dir_all(&target) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(SourceError::Filesystem {
                    action: "remove",
                    path: target,
                    source,
                });
            }
        }
        let unpacked = repos.join("portage");
        fs::rename(&unpacked, &target).map_err(|source| SourceError::Filesystem {
            action: "rename",
            path: unpacked,
            source,
        })?;
        info!("Installed Portage snapshot at {}", target.display());
        Ok(())
    }
}

impl Source for Gentoo {
    fn name(&self) -> &'static str {
        "gentoo-http"
    }

    fn resolve(&self, acq: &Acquisition<'_>) -> Result<ResolvedArtifact> {
        let config = acq.config();
        let arch = config.architecture();
        let autobuild = match config.variant() {
            Some(variant) => format!("current-stage3-{arch}-{variant}"),
            None => format!("current-stage3-{arch}"),
        };
        let base = format!(
            "{}/releases/{}/autobuilds/{autobuild}",
            config.url(),
            arch_family(arch)
        );
        let index = parse_url(&format!("{base}/"))?;
        let resolver = VersionResolver::StageTarball {
            arch,
            variant: config.variant(),
        };
        let filename = resolver.resolve(acq.downloader(), &index)?;
        ResolvedArtifact::in_directory(&base, &filename)
    }

    fn fetch(&self, acq: &Acquisition<'_>, artifact: &ResolvedArtifact) -> Result<PathBuf> {
        let request = TrustRequest::new(
            artifact.url().clone(),
            Attestation::Clearsigned {
                checksums: artifact.with_suffix(".DIGESTS.asc")?,
            },
            HashAlgorithm::Sha512,
        )
        .with_checksums_over_https();
        acq.verified_fetch(&request)
    }

    fn assemble(&self, acq: &Acquisition<'_>, archive: &Path) -> Result<()> {
        acq.unpack(archive, acq.rootfs())?;
        let snapshot = Self::fetch_snapshot(acq)?;
        Self::install_snapshot(acq, &snapshot)
    }
}
