//! Audio subsystem
//!
//! Sample format, tone synthesis and the output devices.

pub mod device;
pub mod output;
pub mod synth;
pub mod types;
pub mod virtual_device;

pub use device::Device;
pub use output::CpalDevice;
pub use synth::{Partial, Signal, ToneMix};
pub use types::{AudioFormat, Sample};
pub use virtual_device::{Pacing, VirtualDevice, VirtualDeviceOptions};

use crate::config::{DeviceKind, PlayerConfig};
use crate::error::Result;
use crate::playback::completion::CompletionHandler;

/// Open the output device selected by `config`.
///
/// The device queue holds as many blocks as the pool, so a submission is only
/// rejected if the device stops consuming.
pub fn open_device(
    config: &PlayerConfig,
    format: &AudioFormat,
    handler: CompletionHandler,
) -> Result<Box<dyn Device>> {
    match config.device {
        DeviceKind::Cpal => {
            let device = CpalDevice::open(
                config.device_name.as_deref(),
                format,
                handler,
                config.pool_capacity,
            )?;
            Ok(Box::new(device))
        }
        DeviceKind::Virtual => {
            let options = VirtualDeviceOptions {
                pacing: config.pacing,
                wav_path: config.wav_output.clone(),
                queue_capacity: config.pool_capacity,
            };
            Ok(Box::new(VirtualDevice::open(format, handler, options)?))
        }
    }
}
