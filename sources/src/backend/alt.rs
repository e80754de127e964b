//! ALT Linux cloud root filesystems.
//!
//! Images live at `<url>/<release>/cloud/<arch>/` alongside a `SHA256SUMS`
//! manifest and its detached signature `SHA256SUMS.gpg`.

use std::path::PathBuf;

use crate::artefact::checksum::HashAlgorithm;
use crate::error::Result;
use crate::trust::{Attestation, TrustRequest};

use super::{Acquisition, ResolvedArtifact, Source};

/// The `alt-http` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct AltLinux;

/// ALT names 32-bit ARM hard-float `armh`.
fn upstream_arch(arch: &str) -> &str {
    match arch {
        "armhf" => "armh",
        other => other,
    }
}

impl Source for AltLinux {
    fn name(&self) -> &'static str {
        "alt-http"
    }

    fn resolve(&self, acq: &Acquisition<'_>) -> Result<ResolvedArtifact> {
        let config = acq.config();
        let arch = upstream_arch(config.architecture());
        let base = format!("{}/{}/cloud/{arch}/", config.url(), config.release());
        let filename = format!(
            "alt-{}-rootfs-systemd-{arch}.tar.xz",
            config.release().to_lowercase()
        );
        ResolvedArtifact::in_directory(&base, &filename)
    }

    fn fetch(&self, acq: &Acquisition<'_>, artifact: &ResolvedArtifact) -> Result<PathBuf> {
        let request = TrustRequest::new(
            artifact.url().clone(),
            Attestation::Detached {
                checksums: artifact.sibling("SHA256SUMS")?,
                signature: artifact.sibling("SHA256SUMS.gpg")?,
            },
            HashAlgorithm::Sha256,
        );
        acq.verified_fetch(&request)
    }
}
