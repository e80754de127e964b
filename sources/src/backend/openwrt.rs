//! OpenWrt root filesystem tarballs.
//!
//! A release may be given as a full service release (`23.05.3`), as a
//! series (`23.05`), which resolves to the newest service release listed
//! under `<url>/releases/`, or as `snapshot`. Targets are laid out as
//! `targets/<target>/<subtarget>/` with a `sha256sums` manifest and its
//! detached signature `sha256sums.asc`.

use std::path::PathBuf;

use crate::artefact::checksum::HashAlgorithm;
use crate::error::{Result, SourceError};
use crate::resolve::VersionResolver;
use crate::trust::{Attestation, TrustRequest};

use super::{Acquisition, ResolvedArtifact, Source, parse_url};

/// Release name selecting the development snapshot.
const SNAPSHOT: &str = "snapshot";

/// The `openwrt-http` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenWrt;

/// Map an architecture to OpenWrt's `(target, subtarget)`.
///
/// An explicit `target/subtarget` pair is accepted as-is.
fn target_for(arch: &str) -> Option<(&str, &str)> {
    match arch {
        "x86_64" | "amd64" => Some(("x86", "64")),
        "i686" | "i386" => Some(("x86", "generic")),
        "aarch64" | "arm64" => Some(("armsr", "armv8")),
        "armv7l" | "armhf" => Some(("armsr", "armv7")),
        other => other
            .split_once('/')
            .filter(|(target, sub)| !target.is_empty() && !sub.is_empty()),
    }
}

/// Whether `release` names a series (`X.Y`) rather than a service release.
fn is_series(release: &str) -> bool {
    let parts: Vec<&str> = release.split('.').collect();
    parts.len() == 2
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

impl OpenWrt {
    fn release(acq: &Acquisition<'_>) -> Result<String> {
        let config = acq.config();
        let release = config.release();
        if release != SNAPSHOT && is_series(release) {
            let index = parse_url(&format!("{}/releases/", config.url()))?;
            let resolver = VersionResolver::ServiceRelease { series: release };
            return Ok(resolver.resolve(acq.downloader(), &index)?);
        }
        Ok(release.to_owned())
    }
}

impl Source for OpenWrt {
    fn name(&self) -> &'static str {
        "openwrt-http"
    }

    fn resolve(&self, acq: &Acquisition<'_>) -> Result<ResolvedArtifact> {
        let config = acq.config();
        let (target, subtarget) = target_for(config.architecture()).ok_or_else(|| {
            SourceError::UnsupportedArchitecture {
                backend: self.name(),
                architecture: config.architecture().to_owned(),
            }
        })?;
        let release = Self::release(acq)?;

        let (base, filename) = if release == SNAPSHOT {
            (
                format!("{}/snapshots/targets/{target}/{subtarget}", config.url()),
                format!("openwrt-{target}-{subtarget}-rootfs.tar.gz"),
            )
        } else {
            (
                format!(
                    "{}/releases/{release}/targets/{target}/{subtarget}",
                    config.url()
                ),
                format!("openwrt-{release}-{target}-{subtarget}-rootfs.tar.gz"),
            )
        };
        ResolvedArtifact::in_directory(&base, &filename)
    }

    fn fetch(&self, acq: &Acquisition<'_>, artifact: &ResolvedArtifact) -> Result<PathBuf> {
        let request = TrustRequest::new(
            artifact.url().clone(),
            Attestation::Detached {
                checksums: artifact.sibling("sha256sums")?,
                signature: artifact.sibling("sha256sums.asc")?,
            },
            HashAlgorithm::Sha256,
        )
        .with_checksums_over_https();
        acq.verified_fetch(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artefact::download::CachingDownloader;
    use crate::artefact::extraction::TarUnpacker;
    use crate::test_utils::{StubTransport, StubVerifier};
    use rootstrap_common::{RetryPolicy, SourceConfig};
    use rstest::rstest;
    use std::path::Path;

    const RELEASES: &str = r#"
        <a href="17.01.1/">17.01.1/</a>
        <a href="17.01.9/">17.01.9/</a>
        <a href="17.01.3/">17.01.3/</a>
        <a href="18.06.2/">18.06.2/</a>
    "#;

    fn resolve(release: &str, arch: &str) -> (Result<ResolvedArtifact>, Vec<String>) {
        let cache = tempfile::tempdir().expect("temp dir");
        let config = SourceConfig::new("https://downloads.test", release, arch);
        let transport =
            StubTransport::new().with_body("https://downloads.test/releases/", RELEASES);
        let downloader = CachingDownloader::new(&transport, cache.path(), RetryPolicy::default());
        let verifier = StubVerifier::accepting();
        let unpacker = TarUnpacker::default();
        let acq = Acquisition::new(
            &config,
            Path::new("/unused"),
            &downloader,
            &verifier,
            &unpacker,
        );
        let result = OpenWrt.resolve(&acq);
        (result, transport.requests())
    }

    #[test]
    fn series_resolves_to_highest_service_release() {
        let (artifact, requests) = resolve("17.01", "x86_64");
        assert_eq!(
            artifact.expect("resolve").url().as_str(),
            "https://downloads.test/releases/17.01.9/targets/x86/64/openwrt-17.01.9-x86-64-rootfs.tar.gz"
        );
        assert_eq!(requests, vec!["https://downloads.test/releases/".to_owned()]);
    }

    #[rstest]
    #[case::service_release(
        "23.05.3",
        "aarch64",
        "https://downloads.test/releases/23.05.3/targets/armsr/armv8/openwrt-23.05.3-armsr-armv8-rootfs.tar.gz"
    )]
    #[case::snapshot(
        "snapshot",
        "armv7l",
        "https://downloads.test/snapshots/targets/armsr/armv7/openwrt-armsr-armv7-rootfs.tar.gz"
    )]
    #[case::explicit_target(
        "23.05.3",
        "ramips/mt7621",
        "https://downloads.test/releases/23.05.3/targets/ramips/mt7621/openwrt-23.05.3-ramips-mt7621-rootfs.tar.gz"
    )]
    fn explicit_releases_need_no_index(
        #[case] release: &str,
        #[case] arch: &str,
        #[case] expected: &str,
    ) {
        let (artifact, requests) = resolve(release, arch);
        assert_eq!(artifact.expect("resolve").url().as_str(), expected);
        assert!(requests.is_empty());
    }

    #[test]
    fn unknown_architecture_is_rejected() {
        let (artifact, _) = resolve("23.05.3", "sparc64");
        assert!(matches!(
            artifact,
            Err(SourceError::UnsupportedArchitecture { .. })
        ));
    }

    #[rstest]
    #[case("17.01", true)]
    #[case("17.01.4", false)]
    #[case("snapshot", false)]
    #[case("17.", false)]
    fn series_detection(#[case] release: &str, #[case] expected: bool) {
        assert_eq!(is_series(release), expected);
    }
}
