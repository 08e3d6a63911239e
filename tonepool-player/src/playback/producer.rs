//! Producer loop
//!
//! Owns the playback cursor and the signal. Each iteration takes a free
//! buffer (blocking when none is available), fills it with the next
//! contiguous span of samples, records it as in flight and submits it.
//!
//! `acquire_free` is the only blocking point, which paces the producer to the
//! rate at which the device returns buffers.

use crate::audio::device::Device;
use crate::audio::synth::{to_sample, Signal};
use crate::audio::types::Sample;
use crate::error::{Error, Result};
use crate::playback::buffer::Buffer;
use crate::playback::pool::BufferPool;
use tonepool_common::time::samples_to_ms;
use tracing::{debug, error, info};

/// Sample producer.
pub struct Producer<S: Signal> {
    signal: S,
    sample_rate: u32,
    /// Offset of the next sample to synthesize
    cursor: u64,
    /// Stop once the cursor reaches this many samples
    sample_limit: Option<u64>,
}

impl<S: Signal> Producer<S> {
    pub fn new(signal: S, sample_rate: u32) -> Self {
        Self {
            signal,
            sample_rate,
            cursor: 0,
            sample_limit: None,
        }
    }

    /// End the loop cleanly after `limit` samples (rounded up to whole buffers)
    pub fn with_sample_limit(mut self, limit: Option<u64>) -> Self {
        self.sample_limit = limit;
        self
    }

    /// Offset of the next sample to synthesize
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Fill `samples` with the next span of the signal and advance the cursor.
    ///
    /// Sample `i` is the signal at `(cursor + i) / sample_rate`; the cursor
    /// moves only after the whole span is written.
    pub fn fill(&mut self, samples: &mut [Sample]) {
        let rate = self.sample_rate as f64;
        for (i, slot) in samples.iter_mut().enumerate() {
            let position = self.cursor + i as u64;
            *slot = to_sample(self.signal.value_at(position as f64 / rate));
        }
        self.cursor += samples.len() as u64;
    }

    fn fill_buffer(&mut self, buffer: &mut Buffer) -> Result<()> {
        let samples = buffer.samples_mut()?;
        self.fill(samples);
        Ok(())
    }

    fn limit_reached(&self) -> bool {
        self.sample_limit.is_some_and(|limit| self.cursor >= limit)
    }

    /// Run until the pool shuts down, the sample limit is reached, or an
    /// error occurs.
    ///
    /// A rejected submission is rolled back into the free collection and
    /// ends the loop with the device's `Error::Io`.
    pub fn run(&mut self, pool: &BufferPool, device: &dyn Device) -> Result<()> {
        info!(
            "Producer started: {} buffers x {} samples at {} Hz",
            pool.capacity(),
            pool.buffer_len(),
            self.sample_rate
        );

        loop {
            if self.limit_reached() {
                info!("Producer reached its limit at sample {}", self.cursor);
                break;
            }

            let mut buffer = match pool.acquire_free() {
                Ok(buffer) => buffer,
                Err(Error::Shutdown) => {
                    info!("Producer stopping at sample {}: shutdown requested", self.cursor);
                    break;
                }
                Err(e) => return Err(e),
            };

            let start = self.cursor;
            if let Err(e) = self.fill_buffer(&mut buffer) {
                error!("Failed to fill buffer {}: {}", buffer.slot(), e);
                pool.release(buffer);
                return Err(e);
            }

            let slot = buffer.slot();
            let block = pool.mark_submitted(buffer)?;
            let sequence = block.sequence();

            debug!(
                "Writing buffer #{} (slot {}, samples {}..{}, at {} ms)",
                sequence,
                slot,
                start,
                self.cursor,
                samples_to_ms(start, self.sample_rate)
            );

            if let Err(e) = device.submit(block) {
                error!("Device rejected buffer #{}: {}", sequence, e);
                pool.rollback_submission(sequence)?;
                return Err(e);
            }
        }

        Ok(())
    }
}
