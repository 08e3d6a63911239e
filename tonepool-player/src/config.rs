//! tonepool-player configuration
//!
//! Resolution order: command line (and `TONEPOOL_*` environment) > TOML file >
//! compiled defaults. The file is `<config_dir>/tonepool/config.toml` unless
//! `--config` names another one.

use crate::audio::synth::{Partial, ToneMix};
use crate::audio::types::{AudioFormat, BITS_PER_SAMPLE, CHANNELS};
use crate::audio::virtual_device::Pacing;
use crate::error::{Error, Result};
use crate::playback::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tonepool_common::time::duration_to_samples;
use tracing::warn;

/// Application name used for config directory lookup
pub const APP_NAME: &str = "tonepool";

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_POOL_CAPACITY: usize = 4;
pub const DEFAULT_BUFFER_DURATION_SECS: f64 = 0.25;
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

const MIN_SAMPLE_RATE: u32 = 8_000;
const MAX_SAMPLE_RATE: u32 = 192_000;

/// Longest buffer accepted; larger buffers only add latency
pub const MAX_BUFFER_DURATION_SECS: f64 = 10.0;

/// Which output device to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Sound card via cpal
    #[default]
    Cpal,
    /// Software device (no audio hardware)
    Virtual,
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "tonepool_player=debug"
    pub level: Option<String>,
}

/// On-disk configuration. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub device: Option<DeviceKind>,
    pub device_name: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bits_per_sample: Option<u16>,
    pub pool_capacity: Option<usize>,
    pub buffer_duration_secs: Option<f64>,
    pub drain_timeout_ms: Option<u64>,
    pub duration_secs: Option<f64>,
    pub pacing: Option<Pacing>,
    pub wav_output: Option<PathBuf>,
    pub tones: Option<Vec<Partial>>,
    pub logging: LoggingConfig,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub device: Option<DeviceKind>,
    pub device_name: Option<String>,
    pub sample_rate: Option<u32>,
    pub pool_capacity: Option<usize>,
    pub buffer_duration_secs: Option<f64>,
    pub drain_timeout_ms: Option<u64>,
    pub duration_secs: Option<f64>,
    pub pacing: Option<Pacing>,
    pub wav_output: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Fully resolved player configuration
#[derive(Debug, Clone, Serialize)]
pub struct PlayerConfig {
    pub device: DeviceKind,
    pub device_name: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub pool_capacity: usize,
    pub buffer_duration_secs: f64,
    pub drain_timeout_ms: u64,
    pub duration_secs: Option<f64>,
    pub pacing: Pacing,
    pub wav_output: Option<PathBuf>,
    pub tones: Vec<Partial>,
    pub log_level: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self::resolve(TomlConfig::default(), ConfigOverrides::default())
    }
}

impl PlayerConfig {
    /// Merge file values and overrides over the defaults. Does not validate.
    pub fn resolve(file: TomlConfig, overrides: ConfigOverrides) -> Self {
        Self {
            device: overrides.device.or(file.device).unwrap_or_default(),
            device_name: overrides.device_name.or(file.device_name),
            sample_rate: overrides
                .sample_rate
                .or(file.sample_rate)
                .unwrap_or(DEFAULT_SAMPLE_RATE),
            channels: file.channels.unwrap_or(CHANNELS),
            bits_per_sample: file.bits_per_sample.unwrap_or(BITS_PER_SAMPLE),
            pool_capacity: overrides
                .pool_capacity
                .or(file.pool_capacity)
                .unwrap_or(DEFAULT_POOL_CAPACITY),
            buffer_duration_secs: overrides
                .buffer_duration_secs
                .or(file.buffer_duration_secs)
                .unwrap_or(DEFAULT_BUFFER_DURATION_SECS),
            drain_timeout_ms: overrides
                .drain_timeout_ms
                .or(file.drain_timeout_ms)
                .unwrap_or(DEFAULT_DRAIN_TIMEOUT_MS),
            duration_secs: overrides.duration_secs.or(file.duration_secs),
            pacing: overrides.pacing.or(file.pacing).unwrap_or_default(),
            wav_output: overrides.wav_output.or(file.wav_output),
            tones: file.tones.unwrap_or_else(ToneMix::default_partials),
            log_level: overrides.log_level.or(file.logging.level),
        }
    }

    /// Load the TOML file (explicit path, or the default location if present),
    /// apply overrides and validate.
    ///
    /// Returns the config and the file it came from, if any.
    pub fn load(explicit: Option<&Path>, overrides: ConfigOverrides) -> Result<(Self, Option<PathBuf>)> {
        let (file, source) = tonepool_common::config::load_or_default::<TomlConfig>(explicit, APP_NAME)?;
        let config = Self::resolve(file, overrides);
        config.validate()?;
        Ok((config, source))
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels != CHANNELS {
            return Err(Error::Config(format!(
                "channels must be {} (got {})",
                CHANNELS, self.channels
            )));
        }
        if self.bits_per_sample != BITS_PER_SAMPLE {
            return Err(Error::Config(format!(
                "bits_per_sample must be {} (got {})",
                BITS_PER_SAMPLE, self.bits_per_sample
            )));
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(Error::Config(format!(
                "sample_rate {} outside {}..={}",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        if self.pool_capacity == 0 {
            return Err(Error::Config("pool_capacity must be at least 1".to_string()));
        }
        if !self.buffer_duration_secs.is_finite() || self.buffer_len() == 0 {
            return Err(Error::Config(format!(
                "buffer_duration_secs {} holds no samples at {} Hz",
                self.buffer_duration_secs, self.sample_rate
            )));
        }
        if self.buffer_duration_secs > MAX_BUFFER_DURATION_SECS {
            return Err(Error::Config(format!(
                "buffer_duration_secs {} exceeds {} s",
                self.buffer_duration_secs, MAX_BUFFER_DURATION_SECS
            )));
        }
        if let Some(secs) = self.duration_secs {
            if secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
                return Err(Error::Config(format!(
                    "duration_secs must be a positive, representable duration (got {})",
                    secs
                )));
            }
        }
        if self.wav_output.is_some() && self.device != DeviceKind::Virtual {
            return Err(Error::Config(
                "wav_output requires the virtual device".to_string(),
            ));
        }
        if self
            .tones
            .iter()
            .any(|p| !p.frequency_hz.is_finite() || !p.amplitude.is_finite() || p.frequency_hz < 0.0)
        {
            return Err(Error::Config("tone partials must be finite, non-negative frequencies".to_string()));
        }

        let peak = self.tone_mix().peak();
        if peak > i16::MAX as f64 {
            warn!(
                "Tone mix peak {:.0} exceeds {}; output will clip",
                peak,
                i16::MAX
            );
        }
        Ok(())
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::mono_i16(self.sample_rate)
    }

    /// Samples per buffer
    pub fn buffer_len(&self) -> usize {
        self.format().buffer_len_for(self.buffer_duration_secs)
    }

    pub fn tone_mix(&self) -> ToneMix {
        ToneMix::new(self.tones.clone())
    }

    /// Completions arrive once per buffer duration only on devices that play in real time
    fn paced(&self) -> bool {
        match self.device {
            DeviceKind::Cpal => true,
            DeviceKind::Virtual => self.pacing == Pacing::Realtime,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let format = self.format();
        let buffer_len = self.buffer_len();
        SessionConfig {
            format,
            pool_capacity: self.pool_capacity,
            buffer_len,
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            max_samples: self
                .duration_secs
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .map(|duration| duration_to_samples(duration, self.sample_rate)),
            expected_completion_interval: self.paced().then(|| format.duration_of(buffer_len)),
        }
    }
}
