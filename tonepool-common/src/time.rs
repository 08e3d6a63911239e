//! Sample-count and wall-clock conversions
//!
//! Playback positions are sample offsets at a fixed sample rate. These helpers
//! convert between those offsets and durations for configuration and logging.

use std::time::Duration;

/// Number of samples covering `seconds` at `sample_rate`, rounded to nearest.
///
/// Negative or non-finite inputs yield 0.
pub fn seconds_to_samples(seconds: f64, sample_rate: u32) -> usize {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * sample_rate as f64).round() as usize
}

/// Number of samples covering `duration` at `sample_rate`, rounded to nearest.
pub fn duration_to_samples(duration: Duration, sample_rate: u32) -> u64 {
    let nanos = duration.as_nanos();
    // round(nanos * rate / 1e9) in integer arithmetic
    let samples = (nanos * sample_rate as u128 + 500_000_000) / 1_000_000_000;
    u64::try_from(samples).unwrap_or(u64::MAX)
}

/// Wall-clock span of `samples` at `sample_rate`
pub fn samples_to_duration(samples: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = samples as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

/// Milliseconds spanned by `samples` at `sample_rate` (truncating)
pub fn samples_to_ms(samples: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    samples.saturating_mul(1000) / sample_rate as u64
}
