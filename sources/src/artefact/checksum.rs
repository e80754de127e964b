//! Hash algorithms and checksum-manifest lookup.
//!
//! Upstream mirrors publish checksum manifests in a handful of shapes:
//! GNU `sha256sum` output (`<hash>  <file>` or `<hash> *<file>`), Gentoo
//! `DIGESTS` files that interleave several algorithms under PGP armour, and
//! BSD-style `SHA256 (<file>) = <hash>` lines. Lookup therefore works on
//! whitespace-separated fields: a line applies when one field names the
//! file, and the hash is the first field of the algorithm's hex length.
//!
//! Lengths alone are ambiguous (BLAKE2B and SHA-512 digests are both 128
//! hex characters), so `# <ALGO> HASH` section headers and BSD algorithm
//! tags are honoured when present.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256, Sha512};
use url::Url;

/// Hash algorithm used by a checksum manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256, 64 hex characters.
    Sha256,
    /// SHA-512, 128 hex characters.
    Sha512,
}

impl HashAlgorithm {
    /// Length of a hex-encoded digest for this algorithm.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Name used in manifest section headers and BSD tags, such as
    /// `SHA512`.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    fn names(self, label: &str) -> bool {
        label.replace('-', "").eq_ignore_ascii_case(self.tag())
    }

    /// Hash everything `reader` yields and return the lowercase hex digest.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while reading.
    pub fn digest_reader(self, reader: impl Read) -> io::Result<String> {
        match self {
            Self::Sha256 => hash_with(Sha256::new(), reader),
            Self::Sha512 => hash_with(Sha512::new(), reader),
        }
    }

    /// Hash a file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::Io`] if the file cannot be read.
    pub fn digest_file(self, path: &Path) -> Result<String, ChecksumError> {
        let io_err = |source| ChecksumError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        self.digest_reader(BufReader::new(file)).map_err(io_err)
    }

    /// Hash an in-memory buffer.
    #[must_use]
    pub fn digest_bytes(self, bytes: &[u8]) -> String {
        match self {
            Self::Sha256 => to_hex(&Sha256::digest(bytes)),
            Self::Sha512 => to_hex(&Sha512::digest(bytes)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => f.write_str("SHA-256"),
            Self::Sha512 => f.write_str("SHA-512"),
        }
    }
}

fn hash_with<D: Digest>(mut hasher: D, mut reader: impl Read) -> io::Result<String> {
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(buffer.get(..read).unwrap_or_default());
    }
    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Where the expected hash for a download comes from.
///
/// When the manifest has already been fetched and signature-checked, `local`
/// points at that verified copy so the hash is read from exactly the bytes
/// that were verified rather than fetched a second time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumSource {
    url: Url,
    algorithm: HashAlgorithm,
    local: Option<PathBuf>,
}

impl ChecksumSource {
    /// Checksums to be fetched from `url` at download time.
    #[must_use]
    pub const fn remote(url: Url, algorithm: HashAlgorithm) -> Self {
        Self {
            url,
            algorithm,
            local: None,
        }
    }

    /// Checksums already present on disk at `path`, originally from `url`.
    #[must_use]
    pub const fn verified(url: Url, algorithm: HashAlgorithm, path: PathBuf) -> Self {
        Self {
            url,
            algorithm,
            local: Some(path),
        }
    }

    /// URL the manifest is published at.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Algorithm the manifest uses.
    #[must_use]
    pub const fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Verified local copy of the manifest, if any.
    #[must_use]
    pub fn local(&self) -> Option<&Path> {
        self.local.as_deref()
    }
}

/// Errors arising from checksum lookup and comparison.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// The manifest has no usable entry for the file.
    #[error("no {algorithm} entry for {filename} in {manifest}")]
    MissingEntry {
        /// Manifest URL.
        manifest: String,
        /// File that was looked up.
        filename: String,
        /// Algorithm that was looked up.
        algorithm: HashAlgorithm,
    },

    /// The downloaded file does not hash to the published value.
    #[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
    Mismatch {
        /// Downloaded file name.
        filename: String,
        /// Hash from the manifest.
        expected: String,
        /// Hash of the bytes on disk.
        actual: String,
    },

    /// The file or manifest could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Find the expected hash for `filename` in a checksum manifest.
///
/// The match is case-insensitive on the hash and exact on the file name,
/// ignoring a leading `*` (binary mode marker), surrounding parentheses
/// (BSD style) and any directory prefix. Under a `# <ALGO> HASH` header
/// only the section for `algorithm` is read.
///
/// # Examples
///
/// ```
/// use rootstrap_sources::artefact::checksum::{HashAlgorithm, find_entry};
///
/// let hash = "a".repeat(64);
/// let manifest = format!("{hash} *rootfs.tar.xz\n");
/// let found = find_entry(&manifest, "rootfs.tar.xz", HashAlgorithm::Sha256);
/// assert_eq!(found.as_deref(), Some(hash.as_str()));
/// ```
#[must_use]
pub fn find_entry(manifest: &str, filename: &str, algorithm: HashAlgorithm) -> Option<String> {
    let mut in_section = true;
    for line in manifest.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if let Some(label) = section_header(&fields) {
            in_section = algorithm.names(label);
            continue;
        }
        if !in_section || !fields.iter().any(|field| names_file(field, filename)) {
            continue;
        }
        if bsd_tag(&fields).is_some_and(|tag| !algorithm.names(tag)) {
            continue;
        }
        if let Some(hash) = fields.iter().find(|field| is_hex_digest(field, algorithm)) {
            return Some(hash.to_ascii_lowercase());
        }
    }
    None
}

/// The algorithm named by a Gentoo `# <ALGO> HASH` header line.
fn section_header<'a>(fields: &[&'a str]) -> Option<&'a str> {
    match fields {
        ["#", label, hash] if hash.eq_ignore_ascii_case("HASH") => Some(*label),
        _ => None,
    }
}

/// The leading algorithm tag of a BSD `<ALGO> (<file>) = <hash>` line.
fn bsd_tag<'a>(fields: &[&'a str]) -> Option<&'a str> {
    match fields {
        [tag, name, ..] if name.starts_with('(') => Some(*tag),
        _ => None,
    }
}

fn names_file(field: &str, filename: &str) -> bool {
    let name = field
        .trim_start_matches('*')
        .trim_start_matches('(')
        .trim_end_matches(')');
    name == filename
        || name
            .rsplit_once('/')
            .is_some_and(|(_, base)| base == filename)
}

fn is_hex_digest(field: &str, algorithm: HashAlgorithm) -> bool {
    field.len() == algorithm.hex_len() && field.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SHA256_EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn digest_bytes_matches_known_vector() {
        assert_eq!(HashAlgorithm::Sha256.digest_bytes(b""), SHA256_EMPTY);
        assert_eq!(HashAlgorithm::Sha512.digest_bytes(b"abc").len(), 128);
    }

    #[test]
    fn digest_file_agrees_with_digest_bytes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("blob");
        std::fs::write(&path, b"rootfs bytes").expect("write blob");

        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            assert_eq!(
                algorithm.digest_file(&path).expect("digest"),
                algorithm.digest_bytes(b"rootfs bytes")
            );
        }
    }

    #[test]
    fn digest_file_reports_missing_path() {
        let err = HashAlgorithm::Sha256
            .digest_file(Path::new("/nonexistent/rootstrap/blob"))
            .expect_err("missing file");
        assert!(matches!(err, ChecksumError::Io { .. }));
    }

    #[rstest]
    #[case::gnu_text("{h}  alt-p10-rootfs.tar.xz")]
    #[case::gnu_binary("{h} *alt-p10-rootfs.tar.xz")]
    #[case::bsd("SHA256 (alt-p10-rootfs.tar.xz) = {h}")]
    #[case::directory_prefix("{h}  ./images/alt-p10-rootfs.tar.xz")]
    fn find_entry_accepts_common_layouts(#[case] template: &str) {
        let hash = "ab".repeat(32);
        let manifest = format!(
            "{} other.tar.xz\n{}\n",
            "cd".repeat(32),
            template.replace("{h}", &hash)
        );
        assert_eq!(
            find_entry(&manifest, "alt-p10-rootfs.tar.xz", HashAlgorithm::Sha256),
            Some(hash)
        );
    }

    #[test]
    fn find_entry_picks_hash_of_requested_length() {
        let sha256 = "0f".repeat(32);
        let manifest = format!(
            "{blake}  stage3.tar.xz\n{sha256}  stage3.tar.xz\n",
            blake = "1a".repeat(64),
        );
        assert_eq!(
            find_entry(&manifest, "stage3.tar.xz", HashAlgorithm::Sha256),
            Some(sha256)
        );
    }

    #[test]
    fn find_entry_reads_only_the_matching_digests_section() {
        let sha512 = "0f".repeat(64);
        let manifest = format!(
            "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\n\
             # BLAKE2B HASH\n{blake}  stage3.tar.xz\n{blake}  stage3.tar.xz.CONTENTS.gz\n\
             # SHA512 HASH\n{sha512}  stage3.tar.xz\n\
             -----BEGIN PGP SIGNATURE-----\n",
            blake = "1a".repeat(64),
        );
        assert_eq!(
            find_entry(&manifest, "stage3.tar.xz", HashAlgorithm::Sha512),
            Some(sha512)
        );
    }

    #[test]
    fn find_entry_without_matching_section_finds_nothing() {
        let manifest = format!("# BLAKE2B HASH\n{}  stage3.tar.xz\n", "1a".repeat(64));
        assert_eq!(
            find_entry(&manifest, "stage3.tar.xz", HashAlgorithm::Sha512),
            None
        );
    }

    #[test]
    fn find_entry_skips_bsd_lines_for_other_algorithms() {
        let sha512 = "0f".repeat(64);
        let manifest = format!(
            "BLAKE2b (rootfs.tar.xz) = {}\nSHA512 (rootfs.tar.xz) = {sha512}\n",
            "1a".repeat(64)
        );
        assert_eq!(
            find_entry(&manifest, "rootfs.tar.xz", HashAlgorithm::Sha512),
            Some(sha512)
        );
    }

    #[test]
    fn find_entry_does_not_match_name_prefixes() {
        let manifest = format!("{}  rootfs.tar.xz.asc\n", "ab".repeat(32));
        assert_eq!(
            find_entry(&manifest, "rootfs.tar.xz", HashAlgorithm::Sha256),
            None
        );
    }

    #[test]
    fn find_entry_normalises_case() {
        let manifest = format!("{}  rootfs.tar.gz\n", "AB".repeat(32));
        assert_eq!(
            find_entry(&manifest, "rootfs.tar.gz", HashAlgorithm::Sha256),
            Some("ab".repeat(32))
        );
    }
}
