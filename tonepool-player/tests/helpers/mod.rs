//! Test helpers for tonepool-player integration tests
//!
//! - ManualDevice: a device whose completions are driven by the test
//! - ReentrantDevice: completes each block before `submit` returns
//! - fixtures: pool/handler wiring shared by several test files

#![allow(dead_code)]

pub mod fixtures;
pub mod manual_device;
pub mod reentrant_device;

pub use fixtures::{handler_for, wired_pool, WiredPool};
pub use manual_device::{ManualDevice, ManualDeviceState};
pub use reentrant_device::ReentrantDevice;
