//! Playback buffers
//!
//! A [`Buffer`] is a fixed-length block of samples plus the transfer
//! descriptor the device uses to track it. Buffers cycle through
//! `Free → Filling → Submitted → Completed → Free` and are only ever created
//! by the [`BufferPool`](crate::playback::pool::BufferPool).
//!
//! Sample storage is reference counted. While the device plays a buffer it
//! holds a [`SampleBlock`] sharing the same storage, and the producer can only
//! write into a buffer once that reference is gone.

use crate::audio::types::Sample;
use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferState {
    /// In the pool's free collection
    Free,
    /// Leased to the producer, being written
    Filling,
    /// Handed to the device, in the in-flight collection
    Submitted,
    /// Device reported it finished playing
    Completed,
}

impl BufferState {
    /// Whether `self → next` is a legal lifecycle step.
    ///
    /// `Filling → Free` returns an unsubmitted lease; `Submitted → Free`
    /// undoes a submission the device rejected.
    pub fn can_transition_to(self, next: BufferState) -> bool {
        use BufferState::*;
        matches!(
            (self, next),
            (Free, Filling)
                | (Filling, Submitted)
                | (Filling, Free)
                | (Submitted, Completed)
                | (Submitted, Free)
                | (Completed, Free)
        )
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferState::Free => write!(f, "free"),
            BufferState::Filling => write!(f, "filling"),
            BufferState::Submitted => write!(f, "submitted"),
            BufferState::Completed => write!(f, "completed"),
        }
    }
}

/// Device-side bookkeeping for one buffer.
///
/// Allocated with its buffer at pool construction and released at teardown.
/// The device may stash its own handle here when preparing the buffer.
#[derive(Debug, Clone, Default)]
pub struct TransferDescriptor {
    byte_len: usize,
    prepared: bool,
    in_queue: bool,
    done: bool,
    device_handle: Option<u64>,
}

impl TransferDescriptor {
    pub fn new(byte_len: usize) -> Self {
        Self {
            byte_len,
            ..Self::default()
        }
    }

    /// Size of the sample payload in bytes
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// True between submission and completion
    pub fn is_in_queue(&self) -> bool {
        self.in_queue
    }

    /// True once the device has finished the most recent submission
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn device_handle(&self) -> Option<u64> {
        self.device_handle
    }

    /// Record that the device has prepared this descriptor
    pub fn mark_prepared(&mut self, device_handle: Option<u64>) {
        self.prepared = true;
        self.device_handle = device_handle;
    }

    /// Record that the device has released this descriptor
    pub fn mark_unprepared(&mut self) {
        self.prepared = false;
        self.device_handle = None;
    }

    pub(crate) fn mark_queued(&mut self) {
        self.in_queue = true;
        self.done = false;
    }

    pub(crate) fn mark_done(&mut self) {
        self.in_queue = false;
        self.done = true;
    }

    pub(crate) fn mark_dequeued(&mut self) {
        self.in_queue = false;
    }
}

/// Fixed-length sample block owned by the pool.
pub struct Buffer {
    slot: usize,
    sequence: Option<u64>,
    state: BufferState,
    samples: Arc<[Sample]>,
    descriptor: TransferDescriptor,
}

impl Buffer {
    pub(crate) fn new(slot: usize, len: usize) -> Self {
        let samples: Arc<[Sample]> = vec![0; len].into();
        Self {
            slot,
            sequence: None,
            state: BufferState::Free,
            samples,
            descriptor: TransferDescriptor::new(len * std::mem::size_of::<Sample>()),
        }
    }

    /// Index of this buffer within its pool
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Submission sequence number of the most recent submission
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn descriptor(&self) -> &TransferDescriptor {
        &self.descriptor
    }

    /// Writable sample storage.
    ///
    /// Only available while the buffer is leased for filling, and only once
    /// the device has dropped every block referencing it.
    pub fn samples_mut(&mut self) -> Result<&mut [Sample]> {
        if self.state != BufferState::Filling {
            return Err(Error::InvalidState(format!(
                "buffer {} is {}, not filling",
                self.slot, self.state
            )));
        }
        let slot = self.slot;
        Arc::get_mut(&mut self.samples).ok_or_else(|| {
            Error::Protocol(format!(
                "buffer {} storage is still referenced by the device",
                slot
            ))
        })
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut TransferDescriptor {
        &mut self.descriptor
    }

    pub(crate) fn set_sequence(&mut self, sequence: Option<u64>) {
        self.sequence = sequence;
    }

    pub(crate) fn transition(&mut self, next: BufferState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "buffer {} cannot move from {} to {}",
                self.slot, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Read-only view handed to the device at submission
    pub(crate) fn block(&self) -> SampleBlock {
        SampleBlock {
            slot: self.slot,
            sequence: self.sequence.unwrap_or_default(),
            device_handle: self.descriptor.device_handle,
            samples: Arc::clone(&self.samples),
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("slot", &self.slot)
            .field("sequence", &self.sequence)
            .field("state", &self.state)
            .field("len", &self.samples.len())
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Samples of one submitted buffer, as seen by the device.
///
/// The device must drop the block before reporting its completion, otherwise
/// the producer cannot refill the buffer.
#[derive(Clone)]
pub struct SampleBlock {
    slot: usize,
    sequence: u64,
    device_handle: Option<u64>,
    samples: Arc<[Sample]>,
}

impl SampleBlock {
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Token to pass back on completion
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn device_handle(&self) -> Option<u64> {
        self.device_handle
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl fmt::Debug for SampleBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBlock")
            .field("slot", &self.slot)
            .field("sequence", &self.sequence)
            .field("len", &self.samples.len())
            .finish()
    }
}
