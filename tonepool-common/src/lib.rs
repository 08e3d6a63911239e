//! # Tonepool Common Library
//!
//! Shared code for the tonepool workspace:
//! - Error type shared by configuration loading
//! - TOML configuration file resolution and loading
//! - Sample/time conversions

pub mod config;
pub mod error;
pub mod time;

pub use error::{Error, Result};
