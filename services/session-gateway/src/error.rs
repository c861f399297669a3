//! Service-specific error types

use thiserror::Error;

/// Startup errors. Per-request failures never propagate as Rust errors: the
/// session engine turns them into session payloads or redirects.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
