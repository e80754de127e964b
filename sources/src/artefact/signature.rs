//! OpenPGP signature verification via `gpg`.
//!
//! Each verification runs against a throwaway keyring so the host keyring
//! is never consulted or modified. Configured keys are either armoured
//! public key blocks, which are imported directly, or fingerprints, which
//! are fetched from the configured keyserver.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::command::{CommandExecutor, stderr_text};

/// Program used for verification.
const GPG: &str = "gpg";

/// Marker identifying an armoured public key block.
const ARMOURED_KEY: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";

/// Checks OpenPGP signatures against the configured trusted keys.
pub trait SignatureVerifier {
    /// Verify `data` against a detached `signature`, or as a clearsigned
    /// document when `signature` is `None`.
    ///
    /// Returns `Ok(false)` when the signature is checked and found invalid.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError`] if verification could not be attempted,
    /// for example because no keys are configured or key import failed.
    fn verify(&self, data: &Path, signature: Option<&Path>) -> Result<bool, VerifyError>;
}

/// Errors that prevent a verification from being attempted.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// No trusted keys were configured.
    #[error("no trusted keys configured for signature verification")]
    NoKeys,

    /// The temporary keyring could not be prepared.
    #[error("failed to prepare keyring at {}: {source}", .path.display())]
    Keyring {
        /// Keyring directory or key file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// `gpg` could not be started.
    #[error("failed to run {command}: {source}")]
    Spawn {
        /// Program name.
        command: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Importing or receiving keys failed.
    #[error("failed to import trusted keys: {reason}")]
    KeyImport {
        /// `gpg` diagnostic output.
        reason: String,
    },
}

/// [`SignatureVerifier`] that shells out to `gpg`.
#[derive(Debug)]
pub struct GpgVerifier<E> {
    executor: E,
    keys: Vec<String>,
    keyserver: String,
}

impl<E: CommandExecutor> GpgVerifier<E> {
    /// Create a verifier trusting `keys`, fetching fingerprints from
    /// `keyserver`.
    pub fn new(executor: E, keys: &[String], keyserver: &str) -> Self {
        Self {
            executor,
            keys: keys.to_vec(),
            keyserver: keyserver.to_owned(),
        }
    }

    fn gpg(&self, args: &[&str]) -> Result<std::process::Output, VerifyError> {
        self.executor
            .run(GPG, args)
            .map_err(|source| VerifyError::Spawn {
                command: GPG,
                source,
            })
    }

    fn import_keys(&self, home: &Path, home_arg: &str) -> Result<(), VerifyError> {
        let (armoured, fingerprints): (Vec<&String>, Vec<&String>) = self
            .keys
            .iter()
            .partition(|key| key.contains(ARMOURED_KEY));

        for (index, key) in armoured.iter().enumerate() {
            let path = home.join(format!("trusted-{index}.asc"));
            fs::write(&path, key.as_bytes()).map_err(|source| VerifyError::Keyring {
                path: path.clone(),
                source,
            })?;
            let key_arg = path.to_string_lossy();
            let output = self.gpg(&["--homedir", home_arg, "--batch", "--import", &*key_arg])?;
            if !output.status.success() {
                return Err(VerifyError::KeyImport {
                    reason: stderr_text(&output),
                });
            }
        }

        if !fingerprints.is_empty() {
            let mut args = vec![
                "--homedir",
                home_arg,
                "--batch",
                "--keyserver",
                self.keyserver.as_str(),
                "--recv-keys",
            ];
            args.extend(fingerprints.iter().map(|key| key.trim()));
            let output = self.gpg(&args)?;
            if !output.status.success() {
                return Err(VerifyError::KeyImport {
                    reason: stderr_text(&output),
                });
            }
        }
        Ok(())
    }
}

impl<E: CommandExecutor> SignatureVerifier for GpgVerifier<E> {
    fn verify(&self, data: &Path, signature: Option<&Path>) -> Result<bool, VerifyError> {
        if self.keys.is_empty() {
            return Err(VerifyError::NoKeys);
        }
        let home = tempfile::Builder::new()
            .prefix("rootstrap-gpg-")
            .tempdir()
            .map_err(|source| VerifyError::Keyring {
                path: std::env::temp_dir(),
                source,
            })?;
        let home_arg = home.path().to_string_lossy().into_owned();
        self.import_keys(home.path(), &home_arg)?;

        let data_arg = data.to_string_lossy();
        let signature_arg = signature.map(Path::to_string_lossy);
        let mut args = vec!["--homedir", home_arg.as_str(), "--batch", "--verify"];
        if let Some(sig) = &signature_arg {
            args.push(sig);
        }
        args.push(&data_arg);

        let output = self.gpg(&args)?;
        if !output.status.success() {
            debug!("gpg rejected {}: {}", data.display(), stderr_text(&output));
        }
        Ok(output.status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ExpectedCall, StubExecutor, failure_output, success_output};

    const FINGERPRINT: &str = "0xBB572E0E2D182910";
    const ARMOURED: &str =
        "-----BEGIN PGP PUBLIC KEY BLOCK-----\n\nmQINBF...\n-----END PGP PUBLIC KEY BLOCK-----\n";

    fn verifier(executor: StubExecutor, keys: &[&str]) -> GpgVerifier<StubExecutor> {
        let keys: Vec<String> = keys.iter().map(|&k| k.to_owned()).collect();
        GpgVerifier::new(executor, &keys, "hkps://keys.test")
    }

    #[test]
    fn refuses_without_keys() {
        let gpg = verifier(StubExecutor::new(vec![]), &[]);
        let err = gpg
            .verify(Path::new("SHA256SUMS"), None)
            .expect_err("no keys");
        assert!(matches!(err, VerifyError::NoKeys));
    }

    #[test]
    fn detached_signature_with_fingerprint() {
        let executor = StubExecutor::new(vec![
            ExpectedCall::new(
                "gpg",
                &["--keyserver", "hkps://keys.test", "--recv-keys", FINGERPRINT],
                Ok(success_output()),
            ),
            ExpectedCall::new(
                "gpg",
                &["--verify", "SHA256SUMS.gpg", "SHA256SUMS"],
                Ok(success_output()),
            ),
        ]);
        let gpg = verifier(executor, &[FINGERPRINT]);

        let valid = gpg
            .verify(Path::new("SHA256SUMS"), Some(Path::new("SHA256SUMS.gpg")))
            .expect("verification runs");

        assert!(valid);
        gpg.executor.assert_finished();
    }

    #[test]
    fn clearsigned_document_with_armoured_key() {
        let executor = StubExecutor::new(vec![
            ExpectedCall::new("gpg", &["--import"], Ok(success_output())),
            ExpectedCall::new("gpg", &["--verify", "stage3.DIGESTS.asc"], Ok(success_output())),
        ]);
        let gpg = verifier(executor, &[ARMOURED]);

        let valid = gpg
            .verify(Path::new("stage3.DIGESTS.asc"), None)
            .expect("verification runs");

        assert!(valid);
        gpg.executor.assert_finished();
    }

    #[test]
    fn bad_signature_is_reported_as_invalid() {
        let executor = StubExecutor::new(vec![
            ExpectedCall::new("gpg", &["--recv-keys"], Ok(success_output())),
            ExpectedCall::new(
                "gpg",
                &["--verify"],
                Ok(failure_output("gpg: BAD signature")),
            ),
        ]);
        let gpg = verifier(executor, &[FINGERPRINT]);

        let valid = gpg
            .verify(Path::new("sums"), Some(Path::new("sums.asc")))
            .expect("verification runs");

        assert!(!valid);
    }

    #[test]
    fn failed_key_import_is_an_error() {
        let executor = StubExecutor::new(vec![ExpectedCall::new(
            "gpg",
            &["--recv-keys"],
            Ok(failure_output("keyserver receive failed")),
        )]);
        let gpg = verifier(executor, &[FINGERPRINT]);

        let err = gpg
            .verify(Path::new("sums"), Some(Path::new("sums.asc")))
            .expect_err("import failure");

        assert!(matches!(err, VerifyError::KeyImport { reason } if reason.contains("keyserver")));
    }
}
