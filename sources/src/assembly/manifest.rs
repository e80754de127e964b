//! Layered image manifests.
//!
//! A saved container image carries a `manifest.json` at its root: a JSON
//! array of descriptors, each naming its layer tarballs in application order
//! and a config file. Fields other than `Layers` and `Config` (`RepoTags`,
//! for instance) are ignored.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::artefact::extraction::validate_entry_path;

/// File name of the manifest at the image root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One image in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LayerDescriptor {
    /// Layer tarballs relative to the image root, bottom layer first.
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
    /// Config file relative to the image root.
    #[serde(rename = "Config")]
    pub config: String,
}

/// The parsed contents of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ImageManifest {
    descriptors: Vec<LayerDescriptor>,
}

/// Errors arising from reading a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The image has no manifest.
    #[error("image manifest not found at {}", .path.display())]
    Missing {
        /// Expected manifest path.
        path: PathBuf,
    },

    /// The manifest could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The manifest is not valid JSON of the expected shape.
    #[error("malformed image manifest {}: {source}", .path.display())]
    Malformed {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A path in the manifest escapes the image root.
    #[error("image manifest names a path outside the image: {entry}")]
    UnsafePath {
        /// The offending path.
        entry: String,
    },
}

impl ImageManifest {
    /// Read and validate `manifest.json` from an unpacked image root.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Missing`] if there is no manifest,
    /// [`ManifestError::Malformed`] if it does not parse, and
    /// [`ManifestError::UnsafePath`] if it names a path outside `root`.
    pub fn read(root: &Path) -> Result<Self, ManifestError> {
        let path = root.join(MANIFEST_FILE);
        let contents = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ManifestError::Missing { path: path.clone() }
            } else {
                ManifestError::Read {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        let manifest: Self = serde_json::from_str(&contents)
            .map_err(|source| ManifestError::Malformed { path, source })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Descriptors in file order.
    #[must_use]
    pub fn descriptors(&self) -> &[LayerDescriptor] {
        &self.descriptors
    }

    fn validate(&self) -> Result<(), ManifestError> {
        self.descriptors
            .iter()
            .flat_map(|d| d.layers.iter().chain(std::iter::once(&d.config)))
            .try_for_each(|entry| {
                let names_something = Path::new(entry)
                    .components()
                    .any(|c| matches!(c, Component::Normal(_)));
                if !names_something {
                    return Err(ManifestError::UnsafePath {
                        entry: entry.clone(),
                    });
                }
                validate_entry_path(Path::new(entry))
                    .map_err(|entry| ManifestError::UnsafePath { entry })
            })
    }
}
