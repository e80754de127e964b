//! CLI argument definitions for rootstrap.
//!
//! Kept apart from the binary so the argument surface can be tested.

use camino::Utf8PathBuf;
use clap::{ArgAction, Parser};
use log::LevelFilter;

/// Fetch, verify and unpack an upstream root filesystem.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "rootstrap")]
#[command(version, about)]
#[command(long_about = concat!(
    "Fetch, verify and unpack an upstream root filesystem.\n\n",
    "rootstrap reads an image definition naming a downloader, a mirror URL, ",
    "a release and an architecture. It resolves the concrete artefact, ",
    "establishes trust in it (signed checksums where trusted keys are ",
    "configured, HTTPS otherwise), downloads it into a cache, and unpacks ",
    "it into the target directory.",
))]
#[command(after_help = concat!(
    "DOWNLOADERS:\n",
    "  alt-http       ALT Linux cloud images\n",
    "  fedora-http    Fedora container base images (layered)\n",
    "  gentoo-http    Gentoo stage3 plus a Portage snapshot\n",
    "  openwrt-http   OpenWrt rootfs tarballs\n\n",
    "EXAMPLES:\n",
    "  Unpack an image into ./rootfs:\n",
    "    $ rootstrap --definition fedora.toml --rootfs ./rootfs\n\n",
    "  Use a specific cache and show debug output:\n",
    "    $ rootstrap -d gentoo.toml -r ./rootfs --cache-dir /var/cache/rootstrap -vv\n\n",
    "Set RUST_LOG to override the log filter entirely.",
))]
pub struct Cli {
    /// Image definition file (TOML).
    #[arg(short, long, value_name = "FILE")]
    pub definition: Utf8PathBuf,

    /// Directory to unpack the root filesystem into.
    #[arg(short, long, value_name = "DIR")]
    pub rootfs: Utf8PathBuf,

    /// Download cache directory [default: platform cache directory].
    #[arg(long, value_name = "DIR", env = "ROOTSTRAP_CACHE_DIR")]
    pub cache_dir: Option<Utf8PathBuf>,

    /// Do not verify signatures or checksums.
    #[arg(long)]
    pub skip_verification: bool,

    /// Restore file ownership from archives (normally requires root).
    #[arg(long)]
    pub preserve_ownership: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Log level implied by `-v` and `-q`.
    #[must_use]
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
