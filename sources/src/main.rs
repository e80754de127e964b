//! rootstrap CLI entrypoint.
//!
//! Loads an image definition, applies command-line overrides and acquires
//! the described root filesystem. Failures are reported on stderr with
//! their full cause chain, and the exit code identifies the error category.

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rootstrap_common::Definition;
use rootstrap_sources::cli::Cli;
use rootstrap_sources::dirs::SystemBaseDirs;
use rootstrap_sources::error::Result;
use rootstrap_sources::pipeline::{self, RunOptions};

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    let mut stderr = std::io::stderr();
    let run_result = run(&cli);
    ExitCode::from(exit_code_for_run_result(run_result, &mut stderr))
}

fn run(cli: &Cli) -> Result<()> {
    let definition = Definition::load(&cli.definition)?;
    pipeline::run(&definition, &run_options(cli), &SystemBaseDirs)
}

fn run_options(cli: &Cli) -> RunOptions {
    RunOptions {
        rootfs: PathBuf::from(&cli.rootfs),
        cache_dir: cli.cache_dir.as_ref().map(PathBuf::from),
        skip_verification: cli.skip_verification,
        preserve_ownership: cli.preserve_ownership,
    }
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> u8 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, format_args!("error: {err}"));
            let mut cause = err.source();
            while let Some(inner) = cause {
                write_stderr_line(stderr, format_args!("  caused by: {inner}"));
                cause = inner.source();
            }
            err.category().exit_code()
        }
    }
}

fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort reporting; ignore write failures.
    }
}
