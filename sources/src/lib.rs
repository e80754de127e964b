//! Rootstrap acquisition library.
//!
//! This crate acquires a base root-filesystem image from an upstream
//! distribution mirror, establishes trust in what it downloaded, and unpacks
//! it into a directory tree. It is used by the `rootstrap` CLI binary and can
//! be driven programmatically with injected collaborators for testing.
//!
//! # Modules
//!
//! - [`artefact`] - Transfer, checksum, signature and unpacking collaborators
//! - [`assembly`] - Layered image assembly and transient-path cleanup
//! - [`backend`] - One acquisition strategy per distribution family
//! - [`cli`] - Command-line argument definitions
//! - [`command`] - External command execution abstraction
//! - [`dirs`] - Platform cache directory resolution
//! - [`error`] - The terminal error reported for a run
//! - [`pipeline`] - Wiring of production collaborators for one run
//! - [`resolve`] - Index-page version resolution
//! - [`trust`] - Verification policy and the trust chain

pub mod artefact;
pub mod assembly;
pub mod backend;
pub mod cli;
pub mod command;
pub mod dirs;
pub mod error;
pub mod pipeline;
pub mod resolve;
pub mod trust;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
