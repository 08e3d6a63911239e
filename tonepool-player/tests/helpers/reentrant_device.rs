//! Device that completes each block from inside `submit`
//!
//! Models a driver whose completion notification runs on the submitting
//! thread, before `submit` returns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tonepool_player::audio::{AudioFormat, Device};
use tonepool_player::playback::{CompletionHandler, SampleBlock};
use tonepool_player::Result;

pub struct ReentrantDevice {
    handler: CompletionHandler,
    completed: Arc<AtomicUsize>,
}

impl ReentrantDevice {
    /// Opener for `Session::run`; `completed` counts completions issued
    pub fn opener(
        completed: Arc<AtomicUsize>,
    ) -> impl FnOnce(&AudioFormat, CompletionHandler) -> Result<Box<dyn Device>> {
        move |_format: &AudioFormat, handler: CompletionHandler| {
            Ok(Box::new(ReentrantDevice { handler, completed }) as Box<dyn Device>)
        }
    }
}

impl Device for ReentrantDevice {
    fn name(&self) -> String {
        "reentrant".to_string()
    }

    fn submit(&self, block: SampleBlock) -> Result<()> {
        let token = block.sequence();
        drop(block);
        self.handler.on_complete(token)?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
