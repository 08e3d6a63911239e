//! Error types for tonepool-player
//!
//! The first five variants are the playback error taxonomy: device open
//! failures, submission rejection, completion protocol violations and the
//! shutdown signal returned to blocked acquirers.

use thiserror::Error;

/// Main error type for tonepool-player
#[derive(Error, Debug)]
pub enum Error {
    /// Device cannot play the requested format (raised at open)
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// No usable output device (raised at open)
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Device rejected a submission
    #[error("Device I/O error: {0}")]
    Io(String),

    /// Completion notification did not match an in-flight buffer
    #[error("Device protocol violation: {0}")]
    Protocol(String),

    /// Pool is shutting down; not a failure for the caller
    #[error("Buffer pool is shut down")]
    Shutdown,

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not valid in the current buffer or session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// In-flight buffers did not complete within the drain timeout
    #[error("Drain timed out with {in_flight} buffer(s) still in flight")]
    DrainTimeout { in_flight: usize },

    /// WAV rendering errors
    #[error("WAV output error: {0}")]
    Wav(#[from] hound::Error),

    /// Errors from the shared tonepool-common crate
    #[error(transparent)]
    Common(#[from] tonepool_common::Error),
}

impl Error {
    /// True for the termination signal handed to blocked acquirers
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::Shutdown)
    }
}

/// Convenience Result type using tonepool-player Error
pub type Result<T> = std::result::Result<T, Error>;
