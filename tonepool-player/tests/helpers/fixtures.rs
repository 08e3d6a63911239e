//! Pool, control and handler wiring without a session

use std::sync::Arc;

use tonepool_player::playback::monitor::CompletionMonitor;
use tonepool_player::playback::{BufferPool, CompletionHandler, SessionControl};

pub struct WiredPool {
    pub pool: Arc<BufferPool>,
    pub control: Arc<SessionControl>,
    pub handler: CompletionHandler,
}

/// Pool with a control and completion handler attached, as a session would set up
pub fn wired_pool(capacity: usize, buffer_len: usize) -> WiredPool {
    let pool = Arc::new(BufferPool::new(capacity, buffer_len).expect("pool"));
    let control = Arc::new(SessionControl::new());
    control.attach_pool(Arc::clone(&pool));
    let handler = handler_for(&pool, &control);
    WiredPool {
        pool,
        control,
        handler,
    }
}

pub fn handler_for(pool: &Arc<BufferPool>, control: &Arc<SessionControl>) -> CompletionHandler {
    CompletionHandler::new(
        Arc::clone(pool),
        Arc::clone(control),
        Arc::new(CompletionMonitor::new(None)),
    )
}
