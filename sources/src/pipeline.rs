//! Wiring of production collaborators for one run.
//!
//! [`run`] turns a loaded definition plus CLI overrides into an
//! [`Acquisition`] over the real transport, `gpg` and tar unpacker, then
//! hands it to the selected backend. [`run_with`] is the seam tests use to
//! drive a backend over stubs.

use std::path::PathBuf;

use log::info;
use rootstrap_common::Definition;

use crate::artefact::download::{CachingDownloader, UreqTransport};
use crate::artefact::extraction::TarUnpacker;
use crate::artefact::signature::GpgVerifier;
use crate::backend::{Acquisition, SourceKind};
use crate::command::SystemCommandExecutor;
use crate::dirs::{BaseDirs, resolve_cache_dir};
use crate::error::{Result, SourceError};

/// Per-run settings that come from the command line rather than the
/// definition file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Target root filesystem directory.
    pub rootfs: PathBuf,
    /// Cache directory override.
    pub cache_dir: Option<PathBuf>,
    /// Skip verification regardless of the definition.
    pub skip_verification: bool,
    /// Restore ownership when unpacking.
    pub preserve_ownership: bool,
}

/// Acquire the image described by `definition` into `options.rootfs`.
///
/// # Errors
///
/// Returns [`SourceError`] for an unknown downloader, a missing cache
/// directory, or any failure during acquisition.
pub fn run(definition: &Definition, options: &RunOptions, dirs: &dyn BaseDirs) -> Result<()> {
    let kind: SourceKind = definition.source.downloader.parse()?;
    let config = definition
        .source_config()
        .with_skip_verification(definition.source.skip_verification || options.skip_verification);
    let cache_dir = resolve_cache_dir(
        options.cache_dir.clone(),
        definition.download.cache_dir.clone().map(PathBuf::from),
        dirs,
    )
    .ok_or(SourceError::NoCacheDir)?;
    info!("Using download cache {}", cache_dir.display());

    let downloader = CachingDownloader::new(
        UreqTransport::new(definition.timeout()),
        cache_dir,
        definition.retry_policy(),
    );
    let verifier = GpgVerifier::new(SystemCommandExecutor, config.keys(), config.keyserver());
    let unpacker = TarUnpacker::new(options.preserve_ownership);
    let acq = Acquisition::new(
        &config,
        &options.rootfs,
        &downloader,
        &verifier,
        &unpacker,
    );
    run_with(kind, &acq)
}

/// Run the backend for `kind` over an already assembled context.
///
/// # Errors
///
/// Returns the backend's error.
pub fn run_with(kind: SourceKind, acq: &Acquisition<'_>) -> Result<()> {
    info!(
        "Acquiring {} {} with {kind} into {}",
        acq.config().release(),
        acq.config().architecture(),
        acq.rootfs().display()
    );
    kind.source().run(acq)?;
    info!("Root filesystem ready at {}", acq.rootfs().display());
    Ok(())
}
