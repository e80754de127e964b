//! Tar unpacking for root-filesystem images.
//!
//! Upstream images ship as tarballs under several compressors. The
//! compressor is sniffed from magic bytes rather than trusted from the file
//! extension, every entry path is validated against traversal before it is
//! written, and permissions are preserved.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use log::debug;

/// Compression formats recognised in front of a tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Uncompressed tar.
    None,
    /// gzip (`1f 8b`).
    Gzip,
    /// bzip2 (`BZh`).
    Bzip2,
    /// xz (`fd 37 7a 58 5a 00`).
    Xz,
    /// zstd (`28 b5 2f fd`).
    Zstd,
}

impl Compression {
    /// Identify the compressor from the leading bytes of a file.
    ///
    /// # Examples
    ///
    /// ```
    /// use rootstrap_sources::artefact::extraction::Compression;
    ///
    /// assert_eq!(Compression::detect(&[0x1f, 0x8b, 0x08]), Compression::Gzip);
    /// assert_eq!(Compression::detect(b"ustar"), Compression::None);
    /// ```
    #[must_use]
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if magic.starts_with(b"BZh") {
            Self::Bzip2
        } else if magic.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Self::Xz
        } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// Identify the compressor of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while reading the header.
    pub fn sniff(path: &Path) -> io::Result<Self> {
        let mut magic = Vec::with_capacity(6);
        File::open(path)?.take(6).read_to_end(&mut magic)?;
        Ok(Self::detect(&magic))
    }
}

/// Unpacks an archive into a directory, enabling test mocking.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveUnpacker {
    /// Unpack `archive` into `dest`, creating `dest` if needed and
    /// overwriting existing files.
    ///
    /// # Errors
    ///
    /// Returns [`UnpackError::PathTraversal`] if an entry would escape
    /// `dest`, or [`UnpackError::Io`] on read or write failure.
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<(), UnpackError>;
}

/// Errors arising from unpacking.
#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    /// I/O failure reading the archive or writing the tree.
    #[error("failed to unpack {}: {source}", .archive.display())]
    Io {
        /// Archive being unpacked.
        archive: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// An entry path attempts to traverse outside the destination.
    #[error("path traversal detected in {}: {entry}", .archive.display())]
    PathTraversal {
        /// Archive being unpacked.
        archive: PathBuf,
        /// The offending entry path.
        entry: String,
    },
}

/// Default [`ArchiveUnpacker`] using the `tar` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarUnpacker {
    preserve_ownership: bool,
}

impl TarUnpacker {
    /// Create an unpacker. Ownership is only restored when requested, since
    /// it normally requires root.
    #[must_use]
    pub const fn new(preserve_ownership: bool) -> Self {
        Self { preserve_ownership }
    }

    fn unpack_stream<R: Read>(
        &self,
        reader: R,
        archive: &Path,
        dest: &Path,
    ) -> Result<(), UnpackError> {
        let io_err = |source| UnpackError::Io {
            archive: archive.to_path_buf(),
            source,
        };
        let mut tar = tar::Archive::new(reader);
        tar.set_preserve_permissions(true);
        tar.set_preserve_ownerships(self.preserve_ownership);
        tar.set_overwrite(true);

        for entry in tar.entries().map_err(io_err)? {
            let mut entry = entry.map_err(io_err)?;
            let path = entry.path().map_err(io_err)?.into_owned();
            if validate_entry_path(&path).is_err() {
                return Err(UnpackError::PathTraversal {
                    archive: archive.to_path_buf(),
                    entry: path.display().to_string(),
                });
            }
            entry.unpack_in(dest).map_err(io_err)?;
        }
        Ok(())
    }
}

impl ArchiveUnpacker for TarUnpacker {
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<(), UnpackError> {
        let io_err = |source| UnpackError::Io {
            archive: archive.to_path_buf(),
            source,
        };
        fs::create_dir_all(dest).map_err(io_err)?;
        let compression = Compression::sniff(archive).map_err(io_err)?;
        debug!(
            "unpacking {} ({compression:?}) into {}",
            archive.display(),
            dest.display()
        );
        let file = BufReader::new(File::open(archive).map_err(io_err)?);

        match compression {
            Compression::None => self.unpack_stream(file, archive, dest),
            Compression::Gzip => {
                self.unpack_stream(flate2::read::GzDecoder::new(file), archive, dest)
            }
            Compression::Bzip2 => {
                self.unpack_stream(bzip2::read::BzDecoder::new(file), archive, dest)
            }
            Compression::Xz => self.unpack_stream(xz2::read::XzDecoder::new(file), archive, dest),
            Compression::Zstd => {
                let decoder = zstd::Decoder::with_buffer(file).map_err(io_err)?;
                self.unpack_stream(decoder, archive, dest)
            }
        }
    }
}

/// Check that a relative path stays beneath the directory it is joined to.
///
/// Rejects absolute paths and any `..` component. Used for archive entries
/// and for paths named by image manifests.
///
/// # Errors
///
/// Returns the offending path, for the caller to wrap in its own error.
pub fn validate_entry_path(path: &Path) -> Result<(), String> {
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
    if escapes {
        Err(path.display().to_string())
    } else {
        Ok(())
    }
}
