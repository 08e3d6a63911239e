//! Common error types for tonepool

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for tonepool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the tonepool crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML file could not be parsed
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
