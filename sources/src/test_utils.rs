//! Shared test utilities for rootstrap acquisition.
//!
//! Available to in-crate unit tests and, through the `test-support`
//! feature, to the integration suites under `tests/`.

#![expect(
    clippy::expect_used,
    reason = "test doubles fail loudly on unexpected use"
)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};

use crate::artefact::checksum::HashAlgorithm;
use crate::artefact::download::{DownloadError, Transport};
use crate::artefact::signature::{SignatureVerifier, VerifyError};
use crate::command::CommandExecutor;

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code.unsigned_abs())
}

/// Creates a successful command `Output` with empty stdout and stderr.
#[must_use]
pub fn success_output() -> Output {
    Output {
        status: exit_status(0),
        stdout: Vec::new(),
        stderr: Vec::new(),
    }
}

/// Creates a failed command `Output` with the given stderr message.
#[must_use]
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(2),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// An expected command invocation.
///
/// `args` is matched as a contiguous run somewhere in the actual argument
/// list, since keyring paths differ between runs.
#[derive(Debug)]
pub struct ExpectedCall {
    cmd: &'static str,
    args: Vec<&'static str>,
    result: io::Result<Output>,
}

impl ExpectedCall {
    /// Expect `cmd` with `args` somewhere in its argument list.
    #[must_use]
    pub fn new(cmd: &'static str, args: &[&'static str], result: io::Result<Output>) -> Self {
        Self {
            cmd,
            args: args.to_vec(),
            result,
        }
    }
}

/// A scripted [`CommandExecutor`].
#[derive(Debug)]
pub struct StubExecutor {
    expected: RefCell<VecDeque<ExpectedCall>>,
}

impl StubExecutor {
    /// Creates a new `StubExecutor` with the given expected calls.
    #[must_use]
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: RefCell::new(expected.into()),
        }
    }

    /// Asserts that all expected command invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if there are remaining expected calls that were not invoked.
    pub fn assert_finished(&self) {
        assert!(
            self.expected.borrow().is_empty(),
            "expected no further command invocations"
        );
    }
}

impl CommandExecutor for StubExecutor {
    fn run(&self, cmd: &str, args: &[&str]) -> io::Result<Output> {
        let call = self
            .expected
            .borrow_mut()
            .pop_front()
            .expect("unexpected command invocation");

        assert_eq!(call.cmd, cmd);
        assert!(
            call.args.is_empty()
                || args
                    .windows(call.args.len())
                    .any(|window| window == call.args.as_slice()),
            "expected {:?} within {args:?}",
            call.args
        );
        call.result
    }
}

/// Canned response for a [`StubTransport`] URL.
#[derive(Debug, Clone)]
enum Response {
    Body(Vec<u8>),
    NotFound,
    Failure(String),
}

/// A [`Transport`] serving canned bodies per URL and recording requests.
///
/// Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct StubTransport {
    responses: HashMap<String, Response>,
    requests: RefCell<Vec<String>>,
}

impl StubTransport {
    /// An empty transport; every URL answers 404.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`.
    #[must_use]
    pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.responses
            .insert(url.to_owned(), Response::Body(body.into()));
        self
    }

    /// Serve the contents of the file at `path` at `url`.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be read.
    #[must_use]
    pub fn with_file(self, url: &str, path: &Path) -> Self {
        let body = std::fs::read(path).expect("read fixture file");
        self.with_body(url, body)
    }

    /// Answer `url` with a 404.
    #[must_use]
    pub fn with_not_found(mut self, url: &str) -> Self {
        self.responses.insert(url.to_owned(), Response::NotFound);
        self
    }

    /// Answer `url` with a transfer failure.
    #[must_use]
    pub fn with_failure(mut self, url: &str, reason: &str) -> Self {
        self.responses
            .insert(url.to_owned(), Response::Failure(reason.to_owned()));
        self
    }

    /// Every URL requested so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    /// Whether `url` has been requested.
    #[must_use]
    pub fn was_requested(&self, url: &str) -> bool {
        self.requests.borrow().iter().any(|seen| seen == url)
    }

    fn respond(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.requests.borrow_mut().push(url.to_owned());
        match self.responses.get(url) {
            Some(Response::Body(body)) => Ok(body.clone()),
            Some(Response::Failure(reason)) => Err(DownloadError::Http {
                url: url.to_owned(),
                reason: reason.clone(),
            }),
            Some(Response::NotFound) | None => Err(DownloadError::NotFound {
                url: url.to_owned(),
            }),
        }
    }
}

impl Transport for StubTransport {
    fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        let body = self.respond(url)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn get_to_file(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let body = self.respond(url)?;
        std::fs::write(dest, body).map_err(|source| DownloadError::Io {
            path: dest.to_path_buf(),
            source,
        })
    }
}

/// A [`SignatureVerifier`] with a fixed verdict that records its calls.
#[derive(Debug)]
pub struct StubVerifier {
    verdict: bool,
    calls: RefCell<Vec<(PathBuf, Option<PathBuf>)>>,
}

impl StubVerifier {
    /// A verifier accepting every signature.
    #[must_use]
    pub fn accepting() -> Self {
        Self::with_verdict(true)
    }

    /// A verifier rejecting every signature.
    #[must_use]
    pub fn rejecting() -> Self {
        Self::with_verdict(false)
    }

    const fn with_verdict(verdict: bool) -> Self {
        Self {
            verdict,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// File names passed as `(data, signature)`, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        let name = |path: &Path| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        self.calls
            .borrow()
            .iter()
            .map(|(data, sig)| (name(data), sig.as_deref().map(name)))
            .collect()
    }
}

impl SignatureVerifier for StubVerifier {
    fn verify(&self, data: &Path, signature: Option<&Path>) -> Result<bool, VerifyError> {
        self.calls
            .borrow_mut()
            .push((data.to_path_buf(), signature.map(Path::to_path_buf)));
        Ok(self.verdict)
    }
}

/// One entry in a fixture tarball.
#[derive(Debug, Clone)]
pub struct TarEntry {
    path: String,
    contents: Option<Vec<u8>>,
    mode: u32,
}

impl TarEntry {
    /// A regular file.
    #[must_use]
    pub fn file(path: &str, contents: &[u8]) -> Self {
        Self {
            path: path.to_owned(),
            contents: Some(contents.to_vec()),
            mode: 0o644,
        }
    }

    /// A directory.
    #[must_use]
    pub fn dir(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            contents: None,
            mode: 0o755,
        }
    }

    /// Override the permission bits.
    #[must_use]
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}

fn append_entries<W: Write>(writer: W, entries: &[TarEntry]) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        let data = entry.contents.as_deref().unwrap_or_default();
        header.set_entry_type(if entry.contents.is_some() {
            tar::EntryType::Regular
        } else {
            tar::EntryType::Directory
        });
        header.set_size(data.len() as u64);
        header.set_mode(entry.mode);
        header.set_mtime(0);
        // Written raw so fixtures can carry hostile names such as `../x`.
        let name = entry.path.as_bytes();
        let slot = &mut header.as_old_mut().name;
        assert!(name.len() < slot.len(), "fixture path too long");
        slot.iter_mut().for_each(|byte| *byte = 0);
        for (dst, src) in slot.iter_mut().zip(name) {
            *dst = *src;
        }
        header.set_cksum();
        builder.append(&header, data)?;
    }
    builder.into_inner()
}

/// Write an uncompressed tarball.
///
/// # Errors
///
/// Returns any I/O error raised while writing.
pub fn write_tar(path: &Path, entries: &[TarEntry]) -> io::Result<()> {
    append_entries(File::create(path)?, entries)?.flush()
}

/// Write a gzip-compressed tarball.
///
/// # Errors
///
/// Returns any I/O error raised while writing.
pub fn write_tar_gz(path: &Path, entries: &[TarEntry]) -> io::Result<()> {
    let encoder = flate2::write::GzEncoder::new(File::create(path)?, flate2::Compression::fast());
    append_entries(encoder, entries)?.finish()?;
    Ok(())
}

/// Write a bzip2-compressed tarball.
///
/// # Errors
///
/// Returns any I/O error raised while writing.
pub fn write_tar_bz2(path: &Path, entries: &[TarEntry]) -> io::Result<()> {
    let encoder = bzip2::write::BzEncoder::new(File::create(path)?, bzip2::Compression::fast());
    append_entries(encoder, entries)?.finish()?;
    Ok(())
}

/// Write an xz-compressed tarball.
///
/// # Errors
///
/// Returns any I/O error raised while writing.
pub fn write_tar_xz(path: &Path, entries: &[TarEntry]) -> io::Result<()> {
    let encoder = xz2::write::XzEncoder::new(File::create(path)?, 1);
    append_entries(encoder, entries)?.finish()?;
    Ok(())
}

/// Write a zstd-compressed tarball.
///
/// # Errors
///
/// Returns any I/O error raised while writing.
pub fn write_tar_zst(path: &Path, entries: &[TarEntry]) -> io::Result<()> {
    let encoder = zstd::Encoder::new(File::create(path)?, 0)?;
    append_entries(encoder, entries)?.finish()?;
    Ok(())
}

/// Write a layered container image: one `<id>/layer.tar` per layer plus a
/// `manifest.json` listing them in order with `<id>/json` as config.
///
/// The outer archive is xz-compressed, as Fedora publishes it.
///
/// # Errors
///
/// Returns any I/O error raised while writing.
pub fn write_layered_image(path: &Path, layers: &[(&str, Vec<TarEntry>)]) -> io::Result<()> {
    let scratch = tempfile::tempdir()?;
    let mut outer = Vec::new();
    let mut descriptors = Vec::new();
    for (id, entries) in layers {
        let layer_path = scratch.path().join(format!("{id}.tar"));
        write_tar(&layer_path, entries)?;
        outer.push(TarEntry::dir(id));
        outer.push(TarEntry::file(
            &format!("{id}/layer.tar"),
            &std::fs::read(&layer_path)?,
        ));
        outer.push(TarEntry::file(&format!("{id}/json"), b"{}"));
        descriptors.push(format!(
            r#"{{"Config":"{id}/json","RepoTags":[],"Layers":["{id}/layer.tar"]}}"#
        ));
    }
    let manifest = format!("[{}]", descriptors.join(","));
    outer.push(TarEntry::file("manifest.json", manifest.as_bytes()));
    outer.push(TarEntry::file("repositories", b"{}"));
    write_tar_xz(path, &outer)
}

/// A `sha256sum`-style manifest line for `bytes` named `filename`.
#[must_use]
pub fn sha256_line(bytes: &[u8], filename: &str) -> String {
    format!(
        "{}  {filename}\n",
        HashAlgorithm::Sha256.digest_bytes(bytes)
    )
}

/// A `sha512sum`-style manifest line for `bytes` named `filename`.
#[must_use]
pub fn sha512_line(bytes: &[u8], filename: &str) -> String {
    format!(
        "{}  {filename}\n",
        HashAlgorithm::Sha512.digest_bytes(bytes)
    )
}
