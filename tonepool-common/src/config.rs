//! Configuration file resolution and loading
//!
//! Config files are optional. Resolution follows this priority order:
//! 1. Explicit path (command-line argument or environment variable)
//! 2. Per-user config: `<config_dir>/<app>/config.toml`
//! 3. System config (Linux only): `/etc/<app>/config.toml`
//! 4. None: the caller falls back to compiled defaults
//!
//! An explicitly named file that does not exist is an error. A missing
//! per-user or system file is not.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name looked up inside the per-application config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Per-user config file location for `app_name`, whether or not it exists
pub fn user_config_path(app_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(app_name).join(CONFIG_FILE_NAME))
}

/// System-wide config file location for `app_name`
///
/// Only Linux has a conventional location.
pub fn system_config_path(app_name: &str) -> Option<PathBuf> {
    if cfg!(target_os = "linux") {
        Some(PathBuf::from("/etc").join(app_name).join(CONFIG_FILE_NAME))
    } else {
        None
    }
}

/// Find the config file to load, following the module-level priority order.
pub fn resolve_config_file(explicit: Option<&Path>, app_name: &str) -> Result<Option<PathBuf>> {
    // Priority 1: explicit path must exist
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    // Priority 2 and 3: conventional locations
    for candidate in [user_config_path(app_name), system_config_path(app_name)]
        .into_iter()
        .flatten()
    {
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
        debug!("No config file at {}", candidate.display());
    }

    Ok(None)
}

/// Parse a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve and load the config file, or return `T::default()` when none exists.
///
/// Returns the loaded value together with the path it came from.
pub fn load_or_default<T>(explicit: Option<&Path>, app_name: &str) -> Result<(T, Option<PathBuf>)>
where
    T: DeserializeOwned + Default,
{
    match resolve_config_file(explicit, app_name)? {
        Some(path) => {
            let value = load_toml(&path)?;
            info!("Loaded configuration from {}", path.display());
            Ok((value, Some(path)))
        }
        None => {
            info!("No configuration file found, using built-in defaults");
            Ok((T::default(), None))
        }
    }
}
