//! # tonepool player
//!
//! Streams a continuously synthesized tone to an audio output device through
//! a fixed pool of sample buffers. A producer thread fills free buffers and
//! submits them; the device plays them in order and hands each one back when
//! it finishes, which is what paces the producer.
//!
//! **Architecture:** [`playback::BufferPool`] holds the buffers,
//! [`playback::Producer`] fills them, an [`audio::Device`] (cpal or virtual)
//! plays them, and [`playback::Session`] drives the
//! `Idle → Running → Draining → Stopped` lifecycle.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use error::{Error, Result};

/// Build identification embedded by build.rs
pub mod build_info {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
    pub const GIT_HASH: &str = env!("TONEPOOL_GIT_HASH");
    pub const BUILD_TIMESTAMP: &str = env!("TONEPOOL_BUILD_TIMESTAMP");
    pub const BUILD_PROFILE: &str = env!("TONEPOOL_BUILD_PROFILE");
}
