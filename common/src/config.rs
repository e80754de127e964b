//! Image definition loading and the immutable source configuration.
//!
//! A definition file is a small TOML document with three tables:
//!
//! ```toml
//! [source]
//! downloader = "fedora-http"
//! url = "https://kojipkgs.fedoraproject.org"
//! keys = []
//!
//! [image]
//! release = "39"
//! architecture = "x86_64"
//!
//! [download]
//! attempts = 3
//! ```
//!
//! [`Definition`] mirrors the file. [`SourceConfig`] is the read-only view
//! that a single acquisition run consumes.

use crate::retry::RetryPolicy;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Keyserver queried when a configured key is a fingerprint rather than an
/// armoured key block.
pub const DEFAULT_KEYSERVER: &str = "hkps://keyserver.ubuntu.com";

/// Errors raised while loading or validating a definition file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The definition file could not be read.
    #[error("failed to read definition {path}")]
    Read {
        /// Path of the definition file.
        path: Utf8PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The definition file is not valid TOML or does not match the schema.
    #[error("failed to parse definition {origin}: {source}")]
    Parse {
        /// Where the document came from (a path, or `<inline>`).
        origin: String,
        /// The underlying deserialisation failure.
        #[source]
        source: toml::de::Error,
    },

    /// A field parsed correctly but holds an unusable value.
    #[error("invalid definition field `{field}`: {reason}")]
    Invalid {
        /// Dotted name of the offending field.
        field: &'static str,
        /// Description of the constraint that was violated.
        reason: String,
    },
}

/// Parsed contents of an image definition file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Definition {
    /// Where and how the base image is published.
    pub source: SourceDefinition,
    /// Which release and architecture to acquire.
    pub image: ImageDefinition,
    /// Transfer tuning; every field is optional.
    #[serde(default)]
    pub download: DownloadSettings,
}

/// The `[source]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SourceDefinition {
    /// Backend identifier, for example `gentoo-http`.
    pub downloader: String,
    /// Publisher base URL.
    pub url: String,
    /// Trusted signing keys: fingerprints or armoured public-key blocks.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Keyserver used to receive fingerprint-only keys.
    #[serde(default = "default_keyserver")]
    pub keyserver: String,
    /// Optional publisher variant tag (e.g. `systemd`, `openrc`).
    #[serde(default)]
    pub variant: Option<String>,
    /// Accept artifacts without any verification.
    #[serde(default)]
    pub skip_verification: bool,
}

/// The `[image]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageDefinition {
    /// Target release identifier as the publisher spells it.
    pub release: String,
    /// Architecture, already mapped to the publisher's naming.
    pub architecture: String,
}

/// The `[download]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadSettings {
    /// Maximum number of attempts for each network transfer.
    pub attempts: u32,
    /// Pause between attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Global timeout for a single transfer. When unset, index pages use
    /// a short default and artifacts are unbounded.
    pub timeout_secs: Option<u64>,
    /// Directory that receives downloaded artifacts.
    pub cache_dir: Option<Utf8PathBuf>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            attempts: RetryPolicy::DEFAULT_ATTEMPTS,
            retry_delay_ms: 0,
            timeout_secs: None,
            cache_dir: None,
        }
    }
}

fn default_keyserver() -> String {
    DEFAULT_KEYSERVER.to_owned()
}

impl Definition {
    /// Read and validate a definition file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read, and the
    /// errors of [`Self::from_toml_str`] otherwise.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&contents, path.as_str())
    }

    /// Parse and validate a definition from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown fields,
    /// and [`ConfigError::Invalid`] when a required value is blank.
    ///
    /// # Examples
    ///
    /// ```
    /// use rootstrap_common::config::Definition;
    ///
    /// let definition = Definition::from_toml_str(concat!(
    ///     "[source]\n",
    ///     "downloader = \"alt-http\"\n",
    ///     "url = \"https://ftp.altlinux.org/pub/distributions/ALTLinux\"\n",
    ///     "[image]\n",
    ///     "release = \"Sisyphus\"\n",
    ///     "architecture = \"x86_64\"\n",
    /// ))
    /// .expect("valid definition");
    /// assert_eq!(definition.source_config().release(), "Sisyphus");
    /// assert_eq!(definition.retry_policy().attempts(), 3);
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, "<inline>")
    }

    fn parse(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        let definition: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            origin: origin.to_owned(),
            source,
        })?;
        definition.validate()?;
        Ok(definition)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_non_blank("source.downloader", &self.source.downloader)?;
        require_non_blank("source.url", &self.source.url)?;
        require_non_blank("image.release", &self.image.release)?;
        require_non_blank("image.architecture", &self.image.architecture)?;
        if self.download.attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "download.attempts",
                reason: "at least one attempt is required".to_owned(),
            });
        }
        Ok(())
    }

    /// Build the immutable configuration consumed by one acquisition run.
    #[must_use]
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            url: self.source.url.trim_end_matches('/').to_owned(),
            release: self.image.release.clone(),
            architecture: self.image.architecture.clone(),
            variant: self
                .source
                .variant
                .as_deref()
                .map(str::trim)
                .filter(|variant| !variant.is_empty())
                .map(str::to_owned),
            keys: self.source.keys.clone(),
            keyserver: self.source.keyserver.clone(),
            skip_verification: self.source.skip_verification,
        }
    }

    /// Build the retry policy for network transfers.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.download.attempts,
            Duration::from_millis(self.download.retry_delay_ms),
        )
    }

    /// Return the configured transfer timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.download.timeout_secs.map(Duration::from_secs)
    }
}

fn require_non_blank(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field,
            reason: "value must not be blank".to_owned(),
        });
    }
    Ok(())
}

/// Read-only settings for one acquisition run.
///
/// Built once from a [`Definition`] (or directly in tests) and never
/// mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    url: String,
    release: String,
    architecture: String,
    variant: Option<String>,
    keys: Vec<String>,
    keyserver: String,
    skip_verification: bool,
}

impl SourceConfig {
    /// Create a configuration with no variant, no keys and verification
    /// enabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use rootstrap_common::config::SourceConfig;
    ///
    /// let config = SourceConfig::new("https://example.test/", "17.01", "x86_64")
    ///     .with_variant("openrc");
    /// assert_eq!(config.url(), "https://example.test");
    /// assert_eq!(config.variant(), Some("openrc"));
    /// assert!(!config.has_keys());
    /// ```
    #[must_use]
    pub fn new(url: &str, release: &str, architecture: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            release: release.to_owned(),
            architecture: architecture.to_owned(),
            variant: None,
            keys: Vec::new(),
            keyserver: DEFAULT_KEYSERVER.to_owned(),
            skip_verification: false,
        }
    }

    /// Set the variant tag.
    #[must_use]
    pub fn with_variant(mut self, variant: &str) -> Self {
        self.variant = Some(variant.to_owned());
        self
    }

    /// Replace the trusted signing keys.
    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the keyserver.
    #[must_use]
    pub fn with_keyserver(mut self, keyserver: &str) -> Self {
        self.keyserver = keyserver.to_owned();
        self
    }

    /// Set whether verification is skipped entirely.
    #[must_use]
    pub fn with_skip_verification(mut self, skip: bool) -> Self {
        self.skip_verification = skip;
        self
    }

    /// Publisher base URL without a trailing slash.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Target release identifier.
    #[must_use]
    pub fn release(&self) -> &str {
        &self.release
    }

    /// Mapped architecture string.
    #[must_use]
    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// Variant tag, if one was configured.
    #[must_use]
    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// Trusted signing keys.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Whether any signing key is configured.
    #[must_use]
    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Keyserver for fingerprint-only keys.
    #[must_use]
    pub fn keyserver(&self) -> &str {
        &self.keyserver
    }

    /// Whether the operator opted out of verification.
    #[must_use]
    pub const fn skip_verification(&self) -> bool {
        self.skip_verification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MINIMAL: &str = concat!(
        "[source]\n",
        "downloader = \"gentoo-http\"\n",
        "url = \"https://distfiles.gentoo.org/\"\n",
        "[image]\n",
        "release = \"current\"\n",
        "architecture = \"amd64\"\n",
    );

    #[test]
    fn minimal_definition_uses_defaults() {
        let definition = Definition::from_toml_str(MINIMAL).expect("valid definition");
        assert_eq!(definition.download, DownloadSettings::default());
        assert_eq!(definition.source.keyserver, DEFAULT_KEYSERVER);
        assert!(definition.source.keys.is_empty());
        assert!(!definition.source.skip_verification);
        assert_eq!(definition.timeout(), None);
    }

    #[test]
    fn source_config_strips_trailing_slash() {
        let definition = Definition::from_toml_str(MINIMAL).expect("valid definition");
        let config = definition.source_config();
        assert_eq!(config.url(), "https://distfiles.gentoo.org");
        assert_eq!(config.architecture(), "amd64");
        assert_eq!(config.variant(), None);
    }

    #[rstest]
    #[case::blank("   ", None)]
    #[case::empty("", None)]
    #[case::present("openrc", Some("openrc"))]
    fn blank_variants_are_treated_as_absent(#[case] variant: &str, #[case] expected: Option<&str>) {
        let toml = MINIMAL.replace(
            "[image]",
            &format!("variant = \"{variant}\"\n[image]"),
        );
        let definition = Definition::from_toml_str(&toml).expect("valid definition");
        assert_eq!(definition.source_config().variant(), expected);
    }

    #[test]
    fn download_table_feeds_retry_policy() {
        let toml = format!("{MINIMAL}[download]\nattempts = 5\nretry_delay_ms = 250\n");
        let definition = Definition::from_toml_str(&toml).expect("valid definition");
        let policy = definition.retry_policy();
        assert_eq!(policy.attempts(), 5);
        assert_eq!(policy.delay(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_unknown_fields() {
        let toml = format!("{MINIMAL}[download]\nparallel = true\n");
        let err = Definition::from_toml_str(&toml).expect_err("unknown field");
        assert!(matches!(err, ConfigError::Parse { .. }), "got {err:?}");
    }

    #[test]
    fn rejects_zero_attempts() {
        let toml = format!("{MINIMAL}[download]\nattempts = 0\n");
        let err = Definition::from_toml_str(&toml).expect_err("zero attempts");
        assert!(
            matches!(err, ConfigError::Invalid { field: "download.attempts", .. }),
            "got {err:?}"
        );
    }

    #[rstest]
    #[case::url("url = \"https://distfiles.gentoo.org/\"", "url = \" \"", "source.url")]
    #[case::release("release = \"current\"", "release = \"\"", "image.release")]
    fn rejects_blank_required_fields(
        #[case] from: &str,
        #[case] to: &str,
        #[case] field: &'static str,
    ) {
        let toml = MINIMAL.replace(from, to);
        let err = Definition::from_toml_str(&toml).expect_err("blank field");
        match err {
            ConfigError::Invalid { field: actual, .. } => assert_eq!(actual, field),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn load_reports_missing_file_path() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::try_from(temp.path().join("absent.toml")).expect("UTF-8 path");
        let err = Definition::load(&path).expect_err("missing file");
        assert!(err.to_string().contains("absent.toml"), "got {err}");
    }
}
