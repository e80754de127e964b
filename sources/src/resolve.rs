//! Index-page version resolution.
//!
//! Some publishers only expose the concrete artefact name through an HTML
//! directory listing. A [`VersionResolver`] fetches such a page and picks a
//! single token out of it. Each strategy has its own ordering rule, and
//! "nothing matched" is reported separately from "could not fetch".

use log::debug;
use regex::Regex;
use url::Url;

use crate::artefact::download::{DownloadError, Downloader};

/// Build identifiers such as `20240101.0` or `20240101.n.2`.
const BUILD_PATTERN: &str = r"\d{8}\.(?:n\.)?\d+";

/// Errors arising from version resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The index page could not be fetched.
    #[error("failed to fetch index {url}: {source}")]
    Fetch {
        /// Index URL.
        url: String,
        /// Underlying error.
        #[source]
        source: DownloadError,
    },

    /// The index page contained no matching entry.
    #[error("no {what} found at {url}")]
    NoMatch {
        /// Index URL.
        url: String,
        /// What was being looked for.
        what: String,
    },

    /// A search pattern failed to compile.
    #[error("invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A strategy for picking the concrete version out of an index page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionResolver<'a> {
    /// The lexicographically greatest build identifier on the page.
    LatestBuild,
    /// The first stage tarball for an architecture and optional variant,
    /// preferring `.tar.xz` over `.tar.bz2`.
    StageTarball {
        /// Upstream architecture name.
        arch: &'a str,
        /// Variant tag, for example `openrc`.
        variant: Option<&'a str>,
    },
    /// The highest-numbered service release of a `X.Y` series.
    ServiceRelease {
        /// Release series, for example `23.05`.
        series: &'a str,
    },
}

impl VersionResolver<'_> {
    /// Fetch `index` and select from it.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Fetch`] if the page cannot be fetched and
    /// [`ResolveError::NoMatch`] if nothing on it matches.
    pub fn resolve(&self, downloader: &dyn Downloader, index: &Url) -> Result<String, ResolveError> {
        let body = downloader
            .fetch_text(index)
            .map_err(|source| ResolveError::Fetch {
                url: index.to_string(),
                source,
            })?;
        let selected = self.select(&body)?.ok_or_else(|| ResolveError::NoMatch {
            url: index.to_string(),
            what: self.describe(),
        })?;
        debug!("resolved {} to {selected} from {index}", self.describe());
        Ok(selected)
    }

    /// Select from an already fetched page body.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Pattern`] if a search pattern fails to build.
    ///
    /// # Examples
    ///
    /// ```
    /// use rootstrap_sources::resolve::VersionResolver;
    ///
    /// let page = r#"<a href="17.01.1/">17.01.1</a> <a href="17.01.9/">17.01.9</a>
    ///               <a href="17.01.3/">17.01.3</a>"#;
    /// let resolver = VersionResolver::ServiceRelease { series: "17.01" };
    /// assert_eq!(resolver.select(page)?.as_deref(), Some("17.01.9"));
    /// # Ok::<(), rootstrap_sources::resolve::ResolveError>(())
    /// ```
    pub fn select(&self, body: &str) -> Result<Option<String>, ResolveError> {
        match *self {
            Self::LatestBuild => latest_build(body),
            Self::StageTarball { arch, variant } => stage_tarball(body, arch, variant),
            Self::ServiceRelease { series } => latest_service_release(body, series),
        }
    }

    fn describe(&self) -> String {
        match *self {
            Self::LatestBuild => "build".to_owned(),
            Self::StageTarball { arch, variant } => match variant {
                Some(variant) => format!("stage tarball for {arch}-{variant}"),
                None => format!("stage tarball for {arch}"),
            },
            Self::ServiceRelease { series } => format!("service release of {series}"),
        }
    }
}

fn latest_build(body: &str) -> Result<Option<String>, ResolveError> {
    let pattern = Regex::new(BUILD_PATTERN)?;
    Ok(pattern
        .find_iter(body)
        .map(|m| m.as_str())
        .max()
        .map(str::to_owned))
}

fn stage_tarball(
    body: &str,
    arch: &str,
    variant: Option<&str>,
) -> Result<Option<String>, ResolveError> {
    let prefix = match variant {
        Some(variant) => format!("stage3-{}-{}-", regex::escape(arch), regex::escape(variant)),
        None => format!("stage3-{}-", regex::escape(arch)),
    };
    for extension in [r"\.tar\.xz", r"\.tar\.bz2"] {
        let pattern = Regex::new(&format!(r#""{prefix}[^"/]*{extension}""#))?;
        if let Some(found) = pattern.find(body) {
            return Ok(Some(found.as_str().trim_matches('"').to_owned()));
        }
    }
    Ok(None)
}

fn latest_service_release(body: &str, series: &str) -> Result<Option<String>, ResolveError> {
    let pattern = Regex::new(&format!(r"(?:^|[^\d.]){}\.(\d+)", regex::escape(series)))?;
    Ok(pattern
        .captures_iter(body)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .max()
        .map(|service| format!("{series}.{service}")))
}
