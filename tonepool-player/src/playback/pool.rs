//! Fixed buffer pool
//!
//! Owns every [`Buffer`] for the lifetime of a session. Buffers live in one of
//! two collections, `free` and `in_flight` (submission order), except for the
//! single lease the producer holds while filling.
//!
//! Both the producer and the device's completion path mutate the pool, so all
//! state sits behind one mutex. Critical sections only move buffers between
//! collections; synthesis and device calls happen outside the lock.

use crate::audio::device::Device;
use crate::error::{Error, Result};
use crate::playback::buffer::{Buffer, BufferState, SampleBlock, TransferDescriptor};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Identity of a buffer returned to the free collection by a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedBuffer {
    pub slot: usize,
    pub sequence: u64,
}

/// Pool occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub in_flight: usize,
    /// Buffers currently held by the producer (0 or 1 in normal operation)
    pub leased: usize,
    pub submitted_total: u64,
    pub completed_total: u64,
    pub rejected_total: u64,
}

impl PoolStats {
    /// No buffer lost or duplicated
    pub fn is_consistent(&self) -> bool {
        self.free + self.in_flight + self.leased == self.capacity
    }
}

struct PoolInner {
    free: VecDeque<Buffer>,
    in_flight: VecDeque<Buffer>,
    leased: usize,
    shutdown: bool,
    next_sequence: u64,
    submitted_total: u64,
    completed_total: u64,
    rejected_total: u64,
}

impl PoolInner {
    /// Put a buffer back into the free collection after a failed operation
    fn restore_free(&mut self, mut buffer: Buffer) {
        buffer.set_sequence(None);
        buffer.descriptor_mut().mark_dequeued();
        // Leased and submitted buffers may both return straight to Free
        let _ = buffer.transition(BufferState::Free);
        self.free.push_back(buffer);
    }
}

/// Fixed-capacity pool of playback buffers.
pub struct BufferPool {
    inner: Mutex<PoolInner>,
    /// Signalled whenever a buffer enters the free collection
    freed: Condvar,
    /// Signalled whenever the in-flight collection becomes empty
    drained: Condvar,
    capacity: usize,
    buffer_len: usize,
}

impl BufferPool {
    /// Allocate `capacity` buffers of `buffer_len` samples each.
    ///
    /// This is the only allocation of sample storage for the session.
    pub fn new(capacity: usize, buffer_len: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("pool capacity must be at least 1".to_string()));
        }
        if buffer_len == 0 {
            return Err(Error::Config("buffer length must be at least 1 sample".to_string()));
        }

        let free: VecDeque<Buffer> = (0..capacity).map(|slot| Buffer::new(slot, buffer_len)).collect();

        debug!(
            "Allocated buffer pool: {} buffers x {} samples",
            capacity, buffer_len
        );

        Ok(Self {
            inner: Mutex::new(PoolInner {
                free,
                in_flight: VecDeque::with_capacity(capacity),
                leased: 0,
                shutdown: false,
                next_sequence: 0,
                submitted_total: 0,
                completed_total: 0,
                rejected_total: 0,
            }),
            freed: Condvar::new(),
            drained: Condvar::new(),
            capacity,
            buffer_len,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples per buffer
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    // A panic elsewhere cannot leave the collections half-updated: every
    // critical section is a sequence of infallible moves.
    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lease the next free buffer to the caller
    fn lease(inner: &mut PoolInner) -> Result<Option<Buffer>> {
        let Some(mut buffer) = inner.free.pop_front() else {
            return Ok(None);
        };
        if let Err(e) = buffer.transition(BufferState::Filling) {
            inner.free.push_front(buffer);
            return Err(e);
        }
        inner.leased += 1;
        Ok(Some(buffer))
    }

    /// Block until a buffer is free, then take it.
    ///
    /// Returns [`Error::Shutdown`] once the pool is shut down, including for
    /// callers already blocked here.
    pub fn acquire_free(&self) -> Result<Buffer> {
        let mut inner = self.lock();
        loop {
            if inner.shutdown {
                return Err(Error::Shutdown);
            }
            if let Some(buffer) = Self::lease(&mut inner)? {
                return Ok(buffer);
            }
            inner = self
                .freed
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`acquire_free`](Self::acquire_free) but gives up after `timeout`,
    /// returning `Ok(None)`.
    pub fn acquire_free_timeout(&self, timeout: Duration) -> Result<Option<Buffer>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if inner.shutdown {
                return Err(Error::Shutdown);
            }
            if let Some(buffer) = Self::lease(&mut inner)? {
                return Ok(Some(buffer));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            inner = self
                .freed
                .wait_timeout(inner, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Non-blocking acquire
    pub fn try_acquire_free(&self) -> Result<Option<Buffer>> {
        let mut inner = self.lock();
        if inner.shutdown {
            return Err(Error::Shutdown);
        }
        Self::lease(&mut inner)
    }

    /// Return a leased buffer without submitting it.
    pub fn release(&self, buffer: Buffer) {
        let mut inner = self.lock();
        inner.leased = inner.leased.saturating_sub(1);
        inner.restore_free(buffer);
        self.freed.notify_one();
    }

    /// Record `buffer` as handed to the device and return the block to submit.
    ///
    /// The buffer is appended to the in-flight collection and assigned the next
    /// submission sequence number. Call this immediately before
    /// `Device::submit`, so a completion can never arrive for a buffer the pool
    /// does not yet consider in flight; undo with
    /// [`rollback_submission`](Self::rollback_submission) if the device
    /// rejects the block.
    pub fn mark_submitted(&self, mut buffer: Buffer) -> Result<SampleBlock> {
        if buffer.slot() >= self.capacity || buffer.len() != self.buffer_len {
            return Err(Error::InvalidState(format!(
                "buffer {} does not belong to this pool",
                buffer.slot()
            )));
        }

        let mut inner = self.lock();
        inner.leased = inner.leased.saturating_sub(1);

        if let Err(e) = buffer.transition(BufferState::Submitted) {
            inner.restore_free(buffer);
            self.freed.notify_one();
            return Err(e);
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.submitted_total += 1;

        buffer.set_sequence(Some(sequence));
        buffer.descriptor_mut().mark_queued();
        let block = buffer.block();
        inner.in_flight.push_back(buffer);

        Ok(block)
    }

    /// Move a rejected submission back to the free collection.
    pub fn rollback_submission(&self, sequence: u64) -> Result<()> {
        let mut inner = self.lock();
        let position = inner
            .in_flight
            .iter()
            .rposition(|b| b.sequence() == Some(sequence))
            .ok_or_else(|| {
                Error::InvalidState(format!("buffer #{} is not in flight", sequence))
            })?;

        if let Some(buffer) = inner.in_flight.remove(position) {
            inner.restore_free(buffer);
            inner.submitted_total = inner.submitted_total.saturating_sub(1);
            inner.rejected_total += 1;
        }

        self.freed.notify_one();
        if inner.in_flight.is_empty() {
            self.drained.notify_all();
        }
        Ok(())
    }

    /// Reclaim the oldest in-flight buffer into the free collection.
    ///
    /// Called from the device's completion path. Fails with
    /// [`Error::Protocol`] if nothing is in flight.
    pub fn complete_oldest(&self) -> Result<CompletedBuffer> {
        let mut inner = self.lock();
        let mut buffer = inner.in_flight.pop_front().ok_or_else(|| {
            Error::Protocol("completion received with no buffer in flight".to_string())
        })?;

        if let Err(e) = buffer.transition(BufferState::Completed) {
            inner.in_flight.push_front(buffer);
            return Err(e);
        }
        buffer.descriptor_mut().mark_done();
        let done = CompletedBuffer {
            slot: buffer.slot(),
            sequence: buffer.sequence().unwrap_or_default(),
        };
        // Completed → Free is always legal
        let _ = buffer.transition(BufferState::Free);

        inner.free.push_back(buffer);
        inner.completed_total += 1;

        self.freed.notify_one();
        if inner.in_flight.is_empty() {
            self.drained.notify_all();
        }
        Ok(done)
    }

    /// Stop handing out buffers and wake every blocked acquirer.
    ///
    /// Completions keep being accepted so in-flight buffers can drain.
    /// Does not log; the device's completion callback reaches this through
    /// a fault.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.freed.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Block until every in-flight buffer has completed or `timeout` elapses.
    pub fn wait_drained(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while !inner.in_flight.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::DrainTimeout {
                    in_flight: inner.in_flight.len(),
                });
            }
            inner = self
                .drained
                .wait_timeout(inner, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            capacity: self.capacity,
            free: inner.free.len(),
            in_flight: inner.in_flight.len(),
            leased: inner.leased,
            submitted_total: inner.submitted_total,
            completed_total: inner.completed_total,
            rejected_total: inner.rejected_total,
        }
    }

    /// Sequence numbers currently in flight, oldest first
    pub fn in_flight_sequences(&self) -> Vec<u64> {
        self.lock()
            .in_flight
            .iter()
            .filter_map(Buffer::sequence)
            .collect()
    }

    /// Run `f` over every buffer's transfer descriptor.
    ///
    /// Only valid while the pool is idle (nothing leased or in flight). The
    /// buffers are taken out of the pool while `f` runs so device calls never
    /// happen under the lock. Every descriptor is visited even if `f` fails;
    /// the first error is returned.
    pub fn for_each_descriptor<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut TransferDescriptor) -> Result<()>,
    {
        let mut buffers = {
            let mut inner = self.lock();
            if inner.leased > 0 || !inner.in_flight.is_empty() {
                return Err(Error::InvalidState(format!(
                    "descriptors can only change while idle ({} leased, {} in flight)",
                    inner.leased,
                    inner.in_flight.len()
                )));
            }
            inner.leased = inner.free.len();
            std::mem::take(&mut inner.free)
        };

        let mut first_error = None;
        for buffer in buffers.iter_mut() {
            if let Err(e) = f(buffer.descriptor_mut()) {
                first_error.get_or_insert(e);
            }
        }

        let mut inner = self.lock();
        inner.leased = 0;
        inner.free.append(&mut buffers);
        self.freed.notify_all();
        drop(inner);

        first_error.map_or(Ok(()), Err)
    }

    /// Have `device` prepare every descriptor before the first submission.
    pub fn prepare_all(&self, device: &dyn Device) -> Result<()> {
        self.for_each_descriptor(|d| device.prepare(d))?;
        debug!("Prepared {} transfer descriptors", self.capacity);
        Ok(())
    }

    /// Have `device` release every descriptor. Call only after draining.
    pub fn unprepare_all(&self, device: &dyn Device) -> Result<()> {
        self.for_each_descriptor(|d| device.unprepare(d))?;
        debug!("Released {} transfer descriptors", self.capacity);
        Ok(())
    }
}
