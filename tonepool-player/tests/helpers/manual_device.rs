//! Device double driven by the test
//!
//! Submitted blocks wait in a queue until the test completes them, so tests
//! control exactly when buffers return to the pool. Completions can also be
//! sent with the wrong token, and the next submission can be made to fail.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tonepool_player::audio::{AudioFormat, Device, Sample};
use tonepool_player::playback::{CompletionHandler, SampleBlock, TransferDescriptor};
use tonepool_player::{Error, Result};

#[derive(Default)]
struct Queue {
    pending: VecDeque<SampleBlock>,
    /// Sequence of every accepted submission, in order
    history: Vec<u64>,
    /// Samples of every completed block, in completion order
    played: Vec<Sample>,
}

/// State shared between a test and the [`ManualDevice`] it opened
#[derive(Default)]
pub struct ManualDeviceState {
    handler: Mutex<Option<CompletionHandler>>,
    queue: Mutex<Queue>,
    submitted: Condvar,
    reject_next: AtomicBool,
    fail_prepare: AtomicBool,
    rejected: AtomicUsize,
    prepared: AtomicUsize,
    unprepared: AtomicUsize,
    closed: AtomicBool,
}

impl ManualDeviceState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Device bound to this state, reporting completions to `handler`
    pub fn device(self: &Arc<Self>, handler: CompletionHandler) -> ManualDevice {
        *self.handler.lock().unwrap() = Some(handler);
        ManualDevice {
            state: Arc::clone(self),
        }
    }

    /// Opener for `Session::run`
    pub fn opener(
        self: &Arc<Self>,
    ) -> impl FnOnce(&AudioFormat, CompletionHandler) -> Result<Box<dyn Device>> {
        let state = Arc::clone(self);
        move |_format: &AudioFormat, handler: CompletionHandler| {
            Ok(Box::new(state.device(handler)) as Box<dyn Device>)
        }
    }

    /// Make the next `submit` fail with `Error::Io`
    pub fn reject_next_submit(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    /// Make `prepare` fail
    pub fn fail_prepare(&self) {
        self.fail_prepare.store(true, Ordering::SeqCst);
    }

    fn handler(&self) -> CompletionHandler {
        self.handler
            .lock()
            .unwrap()
            .clone()
            .expect("device not opened")
    }

    /// Finish the oldest pending block and report it. Returns its token.
    pub fn complete_next(&self) -> Option<u64> {
        let block = {
            let mut queue = self.queue.lock().unwrap();
            let block = queue.pending.pop_front()?;
            queue.played.extend_from_slice(block.samples());
            block
        };
        let token = block.sequence();
        drop(block);
        let _ = self.handler().on_complete(token);
        Some(token)
    }

    /// Finish the oldest pending block but report `token` instead of its own
    pub fn complete_next_with_token(&self, token: u64) -> Option<Result<()>> {
        let block = self.queue.lock().unwrap().pending.pop_front()?;
        drop(block);
        Some(self.handler().on_complete(token).map(|_| ()))
    }

    /// Report a completion for `token` with nothing dequeued
    pub fn spurious_completion(&self, token: u64) -> Result<()> {
        self.handler().on_complete(token).map(|_| ())
    }

    /// Complete everything pending. Returns how many were completed.
    pub fn complete_all(&self) -> usize {
        let mut count = 0;
        while self.complete_next().is_some() {
            count += 1;
        }
        count
    }

    /// Wait until at least `count` submissions have been accepted
    pub fn wait_for_submissions(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().unwrap();
        while queue.history.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            queue = self.submitted.wait_timeout(queue, deadline - now).unwrap().0;
        }
        true
    }

    pub fn submitted_sequences(&self) -> Vec<u64> {
        self.queue.lock().unwrap().history.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().unwrap().pending.len()
    }

    pub fn played_samples(&self) -> Vec<Sample> {
        self.queue.lock().unwrap().played.clone()
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn prepared_count(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn unprepared_count(&self) -> usize {
        self.unprepared.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Device whose completions are issued by the test through [`ManualDeviceState`]
pub struct ManualDevice {
    state: Arc<ManualDeviceState>,
}

impl Device for ManualDevice {
    fn name(&self) -> String {
        "manual".to_string()
    }

    fn prepare(&self, descriptor: &mut TransferDescriptor) -> Result<()> {
        if self.state.fail_prepare.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable("prepare failed".to_string()));
        }
        let handle = self.state.prepared.fetch_add(1, Ordering::SeqCst) as u64;
        descriptor.mark_prepared(Some(handle));
        Ok(())
    }

    fn submit(&self, block: SampleBlock) -> Result<()> {
        if self.state.reject_next.swap(false, Ordering::SeqCst) {
            self.state.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Io(format!("buffer #{} rejected", block.sequence())));
        }
        let mut queue = self.state.queue.lock().unwrap();
        queue.history.push(block.sequence());
        queue.pending.push_back(block);
        self.state.submitted.notify_all();
        Ok(())
    }

    fn unprepare(&self, descriptor: &mut TransferDescriptor) -> Result<()> {
        self.state.unprepared.fetch_add(1, Ordering::SeqCst);
        descriptor.mark_unprepared();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
