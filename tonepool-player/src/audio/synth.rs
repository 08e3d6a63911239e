//! Test-tone synthesis
//!
//! The signal is a fixed sum of sinusoids evaluated at absolute time, so any
//! sample can be computed independently of the ones before it. Quantization to
//! 16-bit clamps instead of wrapping.

use crate::audio::types::Sample;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Continuous-time signal sampled by the producer.
pub trait Signal: Send + 'static {
    /// Signal value at `t` seconds, in sample units (full scale = 32767)
    fn value_at(&self, t: f64) -> f64;
}

/// One sinusoidal component of a [`ToneMix`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    pub frequency_hz: f64,
    pub amplitude: f64,
}

impl Partial {
    pub fn new(frequency_hz: f64, amplitude: f64) -> Self {
        Self {
            frequency_hz,
            amplitude,
        }
    }

    fn value_at(&self, t: f64) -> f64 {
        self.amplitude * (t * TAU * self.frequency_hz).sin()
    }
}

/// Sum of sinusoidal partials.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneMix {
    partials: Vec<Partial>,
}

impl ToneMix {
    pub fn new(partials: Vec<Partial>) -> Self {
        Self { partials }
    }

    /// Two close tones beating against each other over a low hum
    pub fn default_partials() -> Vec<Partial> {
        vec![
            Partial::new(1200.0, 5000.0),
            Partial::new(1210.0, 5000.0),
            Partial::new(210.0, 4000.0),
        ]
    }

    pub fn partials(&self) -> &[Partial] {
        &self.partials
    }

    /// Largest possible absolute value (sum of amplitudes)
    pub fn peak(&self) -> f64 {
        self.partials.iter().map(|p| p.amplitude.abs()).sum()
    }
}

impl Default for ToneMix {
    fn default() -> Self {
        Self::new(Self::default_partials())
    }
}

impl Signal for ToneMix {
    fn value_at(&self, t: f64) -> f64 {
        self.partials.iter().map(|p| p.value_at(t)).sum()
    }
}

/// Round and clamp a signal value into the 16-bit sample range.
///
/// Out-of-range values saturate at the rails; NaN maps to silence.
#[inline]
pub fn to_sample(value: f64) -> Sample {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(Sample::MIN as f64, Sample::MAX as f64) as Sample
}
