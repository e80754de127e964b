//! Fedora container base images.
//!
//! Fedora publishes its base image as a saved, layered container image
//! under `<url>/packages/Fedora-Container-Base/<release>/<build>/images/`.
//! The build identifier is the latest one listed on the release index. No
//! signed metadata is published for these images, so trust rests on HTTPS.

use std::path::{Path, PathBuf};

use crate::artefact::checksum::HashAlgorithm;
use crate::assembly::LayeredAssembler;
use crate::error::Result;
use crate::resolve::VersionResolver;
use crate::trust::{Attestation, TrustRequest};

use super::{Acquisition, ResolvedArtifact, Source, parse_url};

/// The `fedora-http` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fedora;

impl Source for Fedora {
    fn name(&self) -> &'static str {
        "fedora-http"
    }

    fn resolve(&self, acq: &Acquisition<'_>) -> Result<ResolvedArtifact> {
        let config = acq.config();
        let base = format!("{}/packages/Fedora-Container-Base", config.url());
        let index = parse_url(&format!("{base}/{}/", config.release()))?;
        let build = VersionResolver::LatestBuild.resolve(acq.downloader(), &index)?;
        let filename = format!(
            "Fedora-Container-Base-{}-{build}.{}.tar.xz",
            config.release(),
            config.architecture()
        );
        ResolvedArtifact::in_directory(
            &format!("{base}/{}/{build}/images", config.release()),
            &filename,
        )
    }

    fn fetch(&self, acq: &Acquisition<'_>, artifact: &ResolvedArtifact) -> Result<PathBuf> {
        let request = TrustRequest::new(
            artifact.url().clone(),
            Attestation::None,
            HashAlgorithm::Sha256,
        );
        acq.verified_fetch(&request)
    }

    fn assemble(&self, acq: &Acquisition<'_>, archive: &Path) -> Result<()> {
        LayeredAssembler::new(acq.unpacker()).assemble(archive, acq.rootfs())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artefact::download::CachingDownloader;
    use crate::artefact::extraction::TarUnpacker;
    use crate::error::SourceError;
    use crate::resolve::ResolveError;
    use crate::test_utils::{StubTransport, StubVerifier};
    use rootstrap_common::{RetryPolicy, SourceConfig};
    use std::path::Path;

    const INDEX_URL: &str = "https://koji.test/packages/Fedora-Container-Base/40/";

    fn resolve(transport: &StubTransport) -> Result<ResolvedArtifact> {
        let cache = tempfile::tempdir().expect("temp dir");
        let config = SourceConfig::new("https://koji.test", "40", "aarch64");
        let downloader = CachingDownloader::new(transport, cache.path(), RetryPolicy::default());
        let verifier = StubVerifier::accepting();
        let unpacker = TarUnpacker::default();
        let acq = Acquisition::new(
            &config,
            Path::new("/unused"),
            &downloader,
            &verifier,
            &unpacker,
        );
        Fedora.resolve(&acq)
    }

    #[test]
    fn resolves_latest_build_image() {
        let transport = StubTransport::new().with_body(
            INDEX_URL,
            r#"<a href="20240410.0/">20240410.0/</a> <a href="20240412.n.0/">20240412.n.0/</a>"#,
        );
        let artifact = resolve(&transport).expect("resolve");
        assert_eq!(
            artifact.url().as_str(),
            "https://koji.test/packages/Fedora-Container-Base/40/20240412.n.0/images/\
             Fedora-Container-Base-40-20240412.n.0.aarch64.tar.xz"
        );
        assert_eq!(
            artifact.filename(),
            "Fedora-Container-Base-40-20240412.n.0.aarch64.tar.xz"
        );
    }

    #[test]
    fn index_without_builds_is_a_resolution_failure() {
        let transport = StubTransport::new().with_body(INDEX_URL, "<html>nothing here</html>");
        let err = resolve(&transport).expect_err("no builds listed");
        assert!(matches!(
            err,
            SourceError::Resolve(ResolveError::NoMatch { .. })
        ));
    }
}
