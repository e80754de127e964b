//! Collaborators that move bytes: transfer, checksums, signatures and
//! unpacking.
//!
//! Each collaborator is a trait with one production implementation so
//! backends and the trust chain can be exercised without network access,
//! a keyring, or real upstream archives.
//!
//! # Sub-modules
//!
//! - [`checksum`] - Hash algorithms and checksum-manifest lookup.
//! - [`download`] - HTTP transport and the caching, retrying downloader.
//! - [`extraction`] - Tar unpacking with compression sniffing and traversal
//!   protection.
//! - [`signature`] - Detached and clearsigned OpenPGP verification via `gpg`.

pub mod checksum;
pub mod download;
pub mod extraction;
pub mod signature;
