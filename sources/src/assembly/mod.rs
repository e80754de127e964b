//! Layered image assembly.
//!
//! Some publishers ship their root filesystem as a saved container image:
//! an outer tarball holding `manifest.json`, one tarball per layer and a
//! config file per image. Assembly unpacks the outer archive, applies each
//! layer over the tree in manifest order (later layers overwrite earlier
//! ones), and then removes the packaging so only the merged filesystem
//! remains.
//!
//! Transient paths are queued in a [`CleanupSet`] while layers are applied
//! and removed in one pass at the end. If any layer fails, nothing is
//! removed, so the partial tree can be inspected.
//!
//! # Sub-modules
//!
//! - [`cleanup`] - Queued, idempotent removal of transient paths.
//! - [`manifest`] - `manifest.json` parsing and validation.

pub mod cleanup;
pub mod manifest;

use std::path::{Component, Path, PathBuf};

use log::{debug, info};

use crate::artefact::extraction::{ArchiveUnpacker, UnpackError};
use cleanup::{CleanupError, CleanupSet};
use manifest::{ImageManifest, MANIFEST_FILE, ManifestError};

/// Saved-image bookkeeping file removed alongside the manifest.
pub const REPOSITORIES_FILE: &str = "repositories";

/// Directories whose contents are cleared, but which are kept themselves.
pub const SCRATCH_DIRS: [&str; 2] = ["tmp", "root"];

/// Errors arising from layered assembly.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// The outer image archive could not be unpacked.
    #[error("failed to unpack base image: {0}")]
    Base(#[source] UnpackError),

    /// The image manifest is missing or invalid.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A layer could not be applied.
    #[error("failed to apply layer {layer}: {source}")]
    Layer {
        /// Layer path as named in the manifest.
        layer: String,
        /// Underlying error.
        #[source]
        source: UnpackError,
    },

    /// Transient paths could not be removed.
    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}

/// Builds a root filesystem from a saved, layered container image.
pub struct LayeredAssembler<'a> {
    unpacker: &'a dyn ArchiveUnpacker,
}

impl<'a> LayeredAssembler<'a> {
    /// Assemble with the given unpacker.
    #[must_use]
    pub fn new(unpacker: &'a dyn ArchiveUnpacker) -> Self {
        Self { unpacker }
    }

    /// Unpack `image` into `rootfs`, apply its layers, and clean up.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError`] identifying the failing step. Nothing is
    /// removed unless every layer applied.
    pub fn assemble(&self, image: &Path, rootfs: &Path) -> Result<(), AssemblyError> {
        self.unpacker
            .unpack(image, rootfs)
            .map_err(AssemblyError::Base)?;
        let pending = self.apply_layers(rootfs)?;
        let removed = pending.purge()?;
        debug!("removed {removed} transient paths from {}", rootfs.display());
        Ok(())
    }

    /// Apply every layer named by `rootfs/manifest.json` onto `rootfs` and
    /// return what should then be removed.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Manifest`] for a missing or invalid manifest
    /// and [`AssemblyError::Layer`] for the first layer that fails.
    pub fn apply_layers(&self, rootfs: &Path) -> Result<CleanupSet, AssemblyError> {
        let manifest = ImageManifest::read(rootfs)?;
        let mut pending = CleanupSet::new();

        for descriptor in manifest.descriptors() {
            for layer in &descriptor.layers {
                info!("Applying layer {layer}");
                let archive = rootfs.join(layer);
                self.unpacker
                    .unpack(&archive, rootfs)
                    .map_err(|source| AssemblyError::Layer {
                        layer: layer.clone(),
                        source,
                    })?;
                pending.push(layer_container(rootfs, layer));
            }
            pending.push(rootfs.join(&descriptor.config));
        }

        pending.push(rootfs.join(MANIFEST_FILE));
        pending.push(rootfs.join(REPOSITORIES_FILE));
        for dir in SCRATCH_DIRS {
            pending.push_contents(&rootfs.join(dir))?;
        }
        Ok(pending)
    }
}

/// The directory holding a layer tarball, or the tarball itself when it
/// sits at the image root.
fn layer_container(rootfs: &Path, layer: &str) -> PathBuf {
    let path = Path::new(layer);
    match path.parent() {
        Some(dir) if dir.components().any(|c| matches!(c, Component::Normal(_))) => {
            rootfs.join(dir)
        }
        _ => rootfs.join(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artefact::extraction::MockArchiveUnpacker;
    use crate::artefact::extraction::TarUnpacker;
    use crate::test_utils::{TarEntry, write_layered_image, write_tar};
    use mockall::predicate::eq;
    use std::fs;

    #[test]
    fn layer_container_is_parent_or_self() {
        let root = Path::new("/rootfs");
        assert_eq!(layer_container(root, "l1/layer.tar"), root.join("l1"));
        assert_eq!(layer_container(root, "abc.tar"), root.join("abc.tar"));
        assert_eq!(layer_container(root, "./abc.tar"), root.join("./abc.tar"));
    }

    #[test]
    fn end_to_end_removes_packaging() {
        let dir = tempfile::tempdir().expect("temp dir");
        let image = dir.path().join("base.tar.xz");
        write_layered_image(
            &image,
            &[(
                "l1",
                vec![
                    TarEntry::dir("etc"),
                    TarEntry::file("etc/os-release", b"ID=fedora\n"),
                    TarEntry::dir("tmp"),
                    TarEntry::file("tmp/.build-leftover", b"x"),
                ],
            )],
        )
        .expect("write image");
        let rootfs = dir.path().join("rootfs");

        LayeredAssembler::new(&TarUnpacker::default())
            .assemble(&image, &rootfs)
            .expect("assemble");

        assert!(rootfs.join("etc/os-release").is_file());
        for gone in ["manifest.json", "repositories", "l1", "l1/json", "l1/layer.tar"] {
            assert!(!rootfs.join(gone).exists(), "{gone} should be removed");
        }
        assert!(rootfs.join("tmp").is_dir());
        assert_eq!(fs::read_dir(rootfs.join("tmp")).expect("list").count(), 0);
    }

    #[test]
    fn later_layers_win() {
        let dir = tempfile::tempdir().expect("temp dir");
        let image = dir.path().join("base.tar.xz");
        write_layered_image(
            &image,
            &[
                ("l1", vec![TarEntry::file("etc/hostname", b"first")]),
                ("l2", vec![TarEntry::file("etc/hostname", b"second")]),
            ],
        )
        .expect("write image");
        let rootfs = dir.path().join("rootfs");

        LayeredAssembler::new(&TarUnpacker::default())
            .assemble(&image, &rootfs)
            .expect("assemble");

        assert_eq!(
            fs::read_to_string(rootfs.join("etc/hostname")).expect("read"),
            "second"
        );
    }

    #[test]
    fn failing_layer_stops_before_cleanup() {
        let dir = tempfile::tempdir().expect("temp dir");
        let rootfs = dir.path().join("rootfs");
        fs::create_dir_all(&rootfs).expect("mkdir");
        fs::write(
            rootfs.join(MANIFEST_FILE),
            r#"[{"Config":"c.json","Layers":["l1/layer.tar","l2/layer.tar"]}]"#,
        )
        .expect("write manifest");
        let base = dir.path().join("base.tar");
        write_tar(&base, &[]).expect("write base");

        let mut unpacker = MockArchiveUnpacker::new();
        let mut seq = mockall::Sequence::new();
        unpacker
            .expect_unpack()
            .with(eq(base.clone()), eq(rootfs.clone()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        unpacker
            .expect_unpack()
            .with(eq(rootfs.join("l1/layer.tar")), eq(rootfs.clone()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|archive, _| {
                Err(UnpackError::Io {
                    archive: archive.to_path_buf(),
                    source: std::io::Error::other("corrupt layer"),
                })
            });

        let err = LayeredAssembler::new(&unpacker)
            .assemble(&base, &rootfs)
            .expect_err("layer fails");

        assert!(matches!(err, AssemblyError::Layer { ref layer, .. } if layer == "l1/layer.tar"));
        assert!(rootfs.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn root_level_layer_queues_the_archive() {
        let dir = tempfile::tempdir().expect("temp dir");
        let rootfs = dir.path();
        fs::write(
            rootfs.join(MANIFEST_FILE),
            r#"[{"Config":"cfg.json","Layers":["abc.tar"]}]"#,
        )
        .expect("write manifest");

        let mut unpacker = MockArchiveUnpacker::new();
        unpacker.expect_unpack().returning(|_, _| Ok(()));

        let pending = LayeredAssembler::new(&unpacker)
            .apply_layers(rootfs)
            .expect("apply");

        assert_eq!(
            pending.paths(),
            &[
                rootfs.join("abc.tar"),
                rootfs.join("cfg.json"),
                rootfs.join(MANIFEST_FILE),
                rootfs.join(REPOSITORIES_FILE),
            ]
        );
    }
}
