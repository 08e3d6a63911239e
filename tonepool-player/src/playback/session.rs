//! Playback session lifecycle
//!
//! A session walks `Idle → Running → Draining → Stopped`:
//! - **Idle**: pool allocated, device being opened and buffers prepared
//! - **Running**: producer thread filling and submitting, device completing
//! - **Draining**: producer stopped; waiting for in-flight buffers to finish
//! - **Stopped**: descriptors released, device closed
//!
//! [`SessionControl`] is the shared handle used to request shutdown from any
//! thread and to record the first fatal fault.

use crate::audio::device::Device;
use crate::audio::synth::Signal;
use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use crate::playback::completion::CompletionHandler;
use crate::playback::monitor::{CompletionMonitor, MonitorStats};
use crate::playback::pool::{BufferPool, PoolStats};
use crate::playback::producer::Producer;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl SessionState {
    /// `Idle → Stopped` covers sessions that fail before playback begins
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Running) | (Idle, Stopped) | (Running, Draining) | (Draining, Stopped)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Running => write!(f, "running"),
            SessionState::Draining => write!(f, "draining"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Shutdown request, fault slot and state shared across threads.
pub struct SessionControl {
    stop_requested: AtomicBool,
    pool: OnceLock<Arc<BufferPool>>,
    fault: Mutex<Option<Error>>,
    state: Mutex<SessionState>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            pool: OnceLock::new(),
            fault: Mutex::new(None),
            state: Mutex::new(SessionState::Idle),
        }
    }

    /// Ask the session to stop. Safe to call from any thread, any number of
    /// times, before or after the pool exists.
    pub fn request_shutdown(&self) {
        if self.stop() {
            info!("Shutdown requested");
        }
    }

    /// Set the stop flag and shut the pool without logging. Returns whether
    /// this call was the first request.
    fn stop(&self) -> bool {
        let first = !self.stop_requested.swap(true, Ordering::SeqCst);
        if let Some(pool) = self.pool.get() {
            pool.shutdown();
        }
        first
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Connect the pool so shutdown requests reach blocked acquirers.
    pub fn attach_pool(&self, pool: Arc<BufferPool>) {
        let pool = self.pool.get_or_init(|| pool);
        // A request may have raced ahead of the pool
        if self.stop_requested.load(Ordering::SeqCst) {
            pool.shutdown();
        }
    }

    /// Record a fatal error and stop the session. Only the first fault is
    /// kept.
    ///
    /// Called from the device's completion callback, so nothing here logs or
    /// allocates; the session thread logs the fault when it builds the report.
    pub fn record_fault(&self, fault: Error) {
        {
            let mut slot = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(fault);
            }
        }
        self.stop();
    }

    pub fn has_fault(&self) -> bool {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn take_fault(&self) -> Option<Error> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "session cannot move from {} to {}",
                *state, next
            )));
        }
        info!("Session {} → {}", *state, next);
        *state = next;
        Ok(())
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed parameters of one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub format: AudioFormat,
    pub pool_capacity: usize,
    /// Samples per buffer
    pub buffer_len: usize,
    /// Longest wait for in-flight buffers during Draining
    pub drain_timeout: Duration,
    /// Stop after this many samples (rounded up to whole buffers)
    pub max_samples: Option<u64>,
    /// Expected completion spacing for the monitor, if the device plays in real time
    pub expected_completion_interval: Option<Duration>,
}

/// Totals reported when a session stops
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub final_state: SessionState,
    pub device: String,
    pub samples_synthesized: u64,
    pub pool: PoolStats,
    pub monitor: MonitorStats,
    /// First fatal error, if playback stopped because of one
    #[serde(serialize_with = "serialize_fault")]
    pub fault: Option<Error>,
}

fn serialize_fault<S: Serializer>(fault: &Option<Error>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match fault {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl SessionReport {
    /// Convert into `Err` if the session ended on a fault
    pub fn into_result(self) -> Result<SessionReport> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok(self),
        }
    }
}

/// One audio session from device open to device close.
pub struct Session {
    config: SessionConfig,
    control: Arc<SessionControl>,
    runtime: Option<tokio::runtime::Handle>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            control: Arc::new(SessionControl::new()),
            runtime: None,
        }
    }

    /// Run the completion monitor's logging task on `handle`
    pub fn with_runtime(mut self, handle: tokio::runtime::Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn control(&self) -> Arc<SessionControl> {
        Arc::clone(&self.control)
    }

    /// Run the session to completion on the calling thread.
    ///
    /// `open` opens the device with the session's format and completion
    /// handler. Failures before playback starts (pool allocation, open,
    /// descriptor preparation) are returned as `Err`. Faults during playback
    /// end up in [`SessionReport::fault`] after in-flight buffers drain.
    pub fn run<S, F>(self, signal: S, open: F) -> Result<SessionReport>
    where
        S: Signal,
        F: FnOnce(&AudioFormat, CompletionHandler) -> Result<Box<dyn Device>>,
    {
        let Session {
            config,
            control,
            runtime,
        } = self;

        // Idle
        let pool = match BufferPool::new(config.pool_capacity, config.buffer_len) {
            Ok(pool) => Arc::new(pool),
            Err(e) => return Err(Self::abort_idle(&control, e)),
        };
        let monitor = Arc::new(CompletionMonitor::new(config.expected_completion_interval));
        let handler = CompletionHandler::new(Arc::clone(&pool), Arc::clone(&control), Arc::clone(&monitor));

        let device: Arc<dyn Device> = match open(&config.format, handler) {
            Ok(device) => Arc::from(device),
            Err(e) => return Err(Self::abort_idle(&control, e)),
        };
        info!("Opened device '{}' ({})", device.name(), config.format);

        if let Err(e) = pool.prepare_all(device.as_ref()) {
            if let Err(unprepare) = pool.unprepare_all(device.as_ref()) {
                warn!("Failed to release descriptors: {}", unprepare);
            }
            if let Err(close) = device.close() {
                warn!("Failed to close device: {}", close);
            }
            return Err(Self::abort_idle(&control, e));
        }

        // Running
        control.attach_pool(Arc::clone(&pool));
        control.set_state(SessionState::Running)?;

        let monitor_stop = runtime
            .as_ref()
            .map(|handle| Arc::clone(&monitor).spawn_monitoring_task(handle, Arc::clone(&pool)));

        let mut producer = Producer::new(signal, config.format.sample_rate)
            .with_sample_limit(config.max_samples);
        let producer_pool = Arc::clone(&pool);
        let producer_device = Arc::clone(&device);

        let spawned = thread::Builder::new()
            .name("tonepool-producer".to_string())
            .spawn(move || {
                let result = producer.run(&producer_pool, producer_device.as_ref());
                (producer.cursor(), result)
            });

        let samples_synthesized = match spawned {
            Ok(handle) => match handle.join() {
                Ok((cursor, Ok(()))) => cursor,
                Ok((cursor, Err(e))) => {
                    control.record_fault(e);
                    cursor
                }
                Err(_) => {
                    control.record_fault(Error::InvalidState("producer thread panicked".to_string()));
                    0
                }
            },
            Err(e) => {
                control.record_fault(Error::InvalidState(format!(
                    "failed to spawn producer thread: {}",
                    e
                )));
                0
            }
        };

        // Draining
        control.set_state(SessionState::Draining)?;
        pool.shutdown();
        info!("Draining {} buffer(s) in flight", pool.stats().in_flight);
        let drained = pool.wait_drained(config.drain_timeout);

        // Stopped
        match drained {
            Ok(()) => {
                if let Err(e) = pool.unprepare_all(device.as_ref()) {
                    warn!("Failed to release descriptors: {}", e);
                }
                if let Err(e) = device.close() {
                    warn!("Failed to close device '{}': {}", device.name(), e);
                }
            }
            Err(e) => {
                // Blocks are still with the device, so neither the
                // descriptors nor the device are released here. Dropping
                // the last handle tears the device down.
                warn!(
                    "Device '{}' still holds buffers {:?}; leaving it open",
                    device.name(),
                    pool.in_flight_sequences()
                );
                control.record_fault(e);
            }
        }
        if let Some(stop) = monitor_stop {
            stop.store(true, Ordering::Relaxed);
        }
        control.set_state(SessionState::Stopped)?;

        let report = SessionReport {
            final_state: control.state(),
            device: device.name(),
            samples_synthesized,
            pool: pool.stats(),
            monitor: monitor.stats(),
            fault: control.take_fault(),
        };

        if let Some(fault) = report.fault.as_ref() {
            error!("Playback fault: {}", fault);
        }

        info!(
            "Session stopped: {} buffers submitted, {} completed, {} rejected, {} samples, {} underruns",
            report.pool.submitted_total,
            report.pool.completed_total,
            report.pool.rejected_total,
            report.samples_synthesized,
            report.monitor.underrun_count
        );

        Ok(report)
    }

    /// Fail a session that never reached Running
    fn abort_idle(control: &SessionControl, e: Error) -> Error {
        error!("Session failed to start: {}", e);
        if let Err(state_err) = control.set_state(SessionState::Stopped) {
            warn!("{}", state_err);
        }
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Running));
        assert!(Running.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Stopped));
        assert!(Idle.can_transition_to(Stopped));

        assert!(!Running.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Draining.can_transition_to(Running));
    }

    #[test]
    fn test_shutdown_before_pool_reaches_pool_on_attach() {
        let control = SessionControl::new();
        control.request_shutdown();

        let pool = Arc::new(BufferPool::new(2, 4).unwrap());
        control.attach_pool(Arc::clone(&pool));
        assert!(pool.is_shutdown());
    }

    #[test]
    fn test_first_fault_wins() {
        let control = SessionControl::new();
        control.record_fault(Error::Io("rejected".to_string()));
        control.record_fault(Error::Protocol("late".to_string()));

        assert!(control.is_shutdown_requested());
        assert!(matches!(control.take_fault(), Some(Error::Io(_))));
        assert!(control.take_fault().is_none());
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fault_path_does_not_log() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();

        let control = SessionControl::new();
        let pool = Arc::new(BufferPool::new(2, 4).unwrap());
        control.attach_pool(Arc::clone(&pool));

        tracing::subscriber::with_default(subscriber, || {
            control.record_fault(Error::Protocol("out of order".to_string()));
            control.record_fault(Error::Protocol("again".to_string()));
        });

        assert!(pool.is_shutdown());
        assert!(control.has_fault());
        assert!(log.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_report_serializes_fault_as_text() {
        let report = SessionReport {
            final_state: SessionState::Stopped,
            device: "test".to_string(),
            samples_synthesized: 0,
            pool: BufferPool::new(1, 1).unwrap().stats(),
            monitor: MonitorStats::default(),
            fault: Some(Error::Io("queue full".to_string())),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["final_state"], "stopped");
        assert_eq!(json["fault"], "Device I/O error: queue full");
    }
}
