//! Core audio format types
//!
//! Output is always mono, 16-bit signed PCM. Only the sample rate is
//! negotiable.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tonepool_common::time::seconds_to_samples;

/// Fixed channel count
pub const CHANNELS: u16 = 1;

/// Fixed sample width in bits
pub const BITS_PER_SAMPLE: u16 = 16;

/// Sample type written into buffers
pub type Sample = i16;

/// PCM format negotiated with the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioFormat {
    /// Samples per second
    pub sample_rate: u32,

    /// Channel count (always [`CHANNELS`])
    pub channels: u16,

    /// Bits per sample (always [`BITS_PER_SAMPLE`])
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Mono 16-bit format at `sample_rate`
    pub fn mono_i16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: CHANNELS,
            bits_per_sample: BITS_PER_SAMPLE,
        }
    }

    /// Bytes per frame (all channels of one sample instant)
    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }

    /// Bytes consumed per second of playback
    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Buffer length in samples for a buffer lasting `seconds`
    pub fn buffer_len_for(&self, seconds: f64) -> usize {
        seconds_to_samples(seconds, self.sample_rate)
    }

    /// Wall-clock duration of `samples` samples
    pub fn duration_of(&self, samples: usize) -> Duration {
        tonepool_common::time::samples_to_duration(samples as u64, self.sample_rate)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit PCM",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_i16_derived_sizes() {
        let format = AudioFormat::mono_i16(44_100);
        assert_eq!(format.block_align(), 2);
        assert_eq!(format.avg_bytes_per_sec(), 88_200);
        assert_eq!(format.buffer_len_for(0.25), 11_025);
    }

    #[test]
    fn test_duration_of_buffer() {
        let format = AudioFormat::mono_i16(44_100);
        assert_eq!(format.duration_of(11_025), Duration::from_millis(250));
    }
}
