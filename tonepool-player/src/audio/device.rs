//! Output device boundary
//!
//! A device accepts [`SampleBlock`]s in order, plays them, and reports each
//! one back through the [`CompletionHandler`] it was opened with. Opening is
//! device specific: every implementation provides a constructor taking the
//! negotiated [`AudioFormat`](crate::audio::types::AudioFormat) and the
//! handler, failing with `UnsupportedFormat` or `DeviceUnavailable`.

use crate::error::Result;
use crate::playback::buffer::{SampleBlock, TransferDescriptor};

/// Audio output device.
///
/// Implementations must:
/// - play submitted blocks in submission order
/// - drop a block before reporting its completion
/// - report every accepted block exactly once
/// - never report a block whose `submit` returned an error
pub trait Device: Send + Sync {
    /// Human-readable device name for logs
    fn name(&self) -> String;

    /// Prepare a buffer's descriptor before its first submission.
    fn prepare(&self, descriptor: &mut TransferDescriptor) -> Result<()> {
        descriptor.mark_prepared(None);
        Ok(())
    }

    /// Queue a block for playback.
    ///
    /// Fails with `Error::Io` if the device rejects it immediately.
    fn submit(&self, block: SampleBlock) -> Result<()>;

    /// Release a descriptor at teardown, after all buffers have drained.
    fn unprepare(&self, descriptor: &mut TransferDescriptor) -> Result<()> {
        descriptor.mark_unprepared();
        Ok(())
    }

    /// Release the device. Must not be called while blocks are in flight.
    ///
    /// A session whose drain times out never calls this; the device is torn
    /// down by its `Drop` instead.
    fn close(&self) -> Result<()>;
}
