//! Shared configuration and retry primitives for rootstrap.
//!
//! - [`config`] - Image definition files and the immutable [`SourceConfig`]
//! - [`retry`] - The stateless [`RetryPolicy`] used around network transfers

pub mod config;
pub mod retry;

pub use config::{ConfigError, DEFAULT_KEYSERVER, Definition, SourceConfig};
pub use retry::RetryPolicy;
