//! Device completion path
//!
//! The device calls back into the core through a [`CompletionHandler`], from
//! whatever thread its notification mechanism uses (possibly its own
//! real-time thread, possibly from inside a `submit` call). The handler only
//! moves the finished buffer back to the free collection; refilling is left to
//! the producer.

use crate::error::{Error, Result};
use crate::playback::monitor::CompletionMonitor;
use crate::playback::pool::{BufferPool, CompletedBuffer};
use crate::playback::session::SessionControl;
use std::sync::Arc;

/// Handle given to the device at open time.
#[derive(Clone)]
pub struct CompletionHandler {
    pool: Arc<BufferPool>,
    control: Arc<SessionControl>,
    monitor: Arc<CompletionMonitor>,
}

impl CompletionHandler {
    pub fn new(
        pool: Arc<BufferPool>,
        control: Arc<SessionControl>,
        monitor: Arc<CompletionMonitor>,
    ) -> Self {
        Self {
            pool,
            control,
            monitor,
        }
    }

    /// The device finished playing the block submitted with `token`.
    ///
    /// Completions must arrive in submission order. A completion with nothing
    /// in flight, or for a block other than the oldest one, is recorded as the
    /// session fault and stops playback. The error is also returned so the
    /// device may log it, but devices are free to ignore it.
    pub fn on_complete(&self, token: u64) -> Result<CompletedBuffer> {
        self.monitor.record_completion();

        match self.pool.complete_oldest() {
            Ok(done) if done.sequence == token => Ok(done),
            Ok(done) => {
                let message = format!(
                    "device completed buffer #{} but the oldest in flight was #{}",
                    token, done.sequence
                );
                self.control.record_fault(Error::Protocol(message.clone()));
                Err(Error::Protocol(message))
            }
            Err(e) => {
                let message = format!("completion for buffer #{}: {}", token, e);
                self.control.record_fault(Error::Protocol(message.clone()));
                Err(Error::Protocol(message))
            }
        }
    }

    /// The device had nothing queued when it needed samples.
    ///
    /// Once shutdown is requested the queue is expected to run dry, so
    /// nothing is counted.
    pub fn record_underrun(&self) {
        if self.control.is_shutdown_requested() {
            return;
        }
        self.monitor.record_underrun();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(capacity: usize) -> (CompletionHandler, Arc<BufferPool>, Arc<SessionControl>) {
        let pool = Arc::new(BufferPool::new(capacity, 8).unwrap());
        let control = Arc::new(SessionControl::new());
        control.attach_pool(Arc::clone(&pool));
        let monitor = Arc::new(CompletionMonitor::new(None));
        (
            CompletionHandler::new(Arc::clone(&pool), Arc::clone(&control), monitor),
            pool,
            control,
        )
    }

    #[test]
    fn test_matching_token_frees_buffer() {
        let (handler, pool, control) = handler(2);
        let buffer = pool.acquire_free().unwrap();
        let block = pool.mark_submitted(buffer).unwrap();
        let token = block.sequence();
        drop(block);

        let done = handler.on_complete(token).unwrap();
        assert_eq!(done.sequence, token);
        assert_eq!(pool.stats().free, 2);
        assert!(!control.has_fault());
    }

    #[test]
    fn test_completion_without_submission_is_fault() {
        let (handler, pool, control) = handler(2);

        let err = handler.on_complete(0).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(control.has_fault());
        assert!(pool.is_shutdown());
    }

    #[test]
    fn test_out_of_order_token_is_fault() {
        let (handler, pool, control) = handler(2);
        for _ in 0..2 {
            let buffer = pool.acquire_free().unwrap();
            drop(pool.mark_submitted(buffer).unwrap());
        }

        let err = handler.on_complete(1).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(matches!(control.take_fault(), Some(Error::Protocol(_))));
    }

    #[test]
    fn test_underrun_after_shutdown_not_counted() {
        let pool = Arc::new(BufferPool::new(2, 8).unwrap());
        let control = Arc::new(SessionControl::new());
        control.attach_pool(Arc::clone(&pool));
        let monitor = Arc::new(CompletionMonitor::new(None));
        let handler = CompletionHandler::new(pool, Arc::clone(&control), Arc::clone(&monitor));

        handler.record_underrun();
        control.request_shutdown();
        handler.record_underrun();

        assert_eq!(monitor.stats().underrun_count, 1);
    }
}
