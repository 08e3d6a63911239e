//! Playback core
//!
//! The fixed buffer pool, the producer loop that fills it, the completion
//! path the device reports through, and the session that ties them together.

pub mod buffer;
pub mod completion;
pub mod monitor;
pub mod pool;
pub mod producer;
pub mod session;

pub use buffer::{Buffer, BufferState, SampleBlock, TransferDescriptor};
pub use completion::CompletionHandler;
pub use pool::{BufferPool, CompletedBuffer, PoolStats};
pub use producer::Producer;
pub use session::{Session, SessionConfig, SessionControl, SessionReport, SessionState};
