//! Software output device
//!
//! Plays submitted blocks on a worker thread without touching audio
//! hardware. With [`Pacing::Realtime`] each block is held for its playback
//! duration, so completions arrive at the same cadence as a sound card's.
//! [`Pacing::Unpaced`] completes blocks as fast as the worker can take them,
//! which is what tests and offline rendering want. Optionally every played
//! sample is appended to a WAV file.

use crate::audio::device::Device;
use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use crate::playback::buffer::SampleBlock;
use crate::playback::completion::CompletionHandler;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How the virtual device schedules completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    /// Complete each block after its playback duration
    #[default]
    Realtime,
    /// Complete blocks immediately
    Unpaced,
}

#[derive(Debug, Clone)]
pub struct VirtualDeviceOptions {
    pub pacing: Pacing,
    /// Write everything played to this WAV file
    pub wav_path: Option<PathBuf>,
    /// Blocks the device accepts before rejecting submissions
    pub queue_capacity: usize,
}

impl Default for VirtualDeviceOptions {
    fn default() -> Self {
        Self {
            pacing: Pacing::Realtime,
            wav_path: None,
            queue_capacity: 16,
        }
    }
}

type WavSink = hound::WavWriter<BufWriter<File>>;

pub struct VirtualDevice {
    name: String,
    sender: Mutex<Option<SyncSender<SampleBlock>>>,
    worker: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl VirtualDevice {
    pub fn open(format: &AudioFormat, handler: CompletionHandler, options: VirtualDeviceOptions) -> Result<Self> {
        if format.channels != 1 || format.bits_per_sample != 16 {
            return Err(Error::UnsupportedFormat(format!(
                "virtual device plays mono 16-bit only, got {}",
                format
            )));
        }

        let sink = match options.wav_path.as_ref() {
            Some(path) => {
                let spec = hound::WavSpec {
                    channels: format.channels,
                    sample_rate: format.sample_rate,
                    bits_per_sample: format.bits_per_sample,
                    sample_format: hound::SampleFormat::Int,
                };
                let writer = hound::WavWriter::create(path, spec)?;
                info!("Rendering output to {}", path.display());
                Some(writer)
            }
            None => None,
        };

        let name = match options.pacing {
            Pacing::Realtime => "virtual (realtime)".to_string(),
            Pacing::Unpaced => "virtual (unpaced)".to_string(),
        };

        let (sender, receiver) = mpsc::sync_channel(options.queue_capacity.max(1));
        let worker_format = *format;
        let pacing = options.pacing;

        let worker = thread::Builder::new()
            .name("tonepool-virtual-device".to_string())
            .spawn(move || play_blocks(receiver, handler, worker_format, pacing, sink))
            .map_err(|e| Error::DeviceUnavailable(format!("failed to spawn device thread: {}", e)))?;

        debug!("Virtual device opened: {}, pacing {:?}", format, pacing);

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

fn play_blocks(
    receiver: Receiver<SampleBlock>,
    handler: CompletionHandler,
    format: AudioFormat,
    pacing: Pacing,
    mut sink: Option<WavSink>,
) -> Result<()> {
    let mut started: Option<Instant> = None;
    let mut played: usize = 0;
    let mut write_error: Option<hound::Error> = None;

    while let Ok(block) = receiver.recv() {
        if let (Some(writer), None) = (sink.as_mut(), write_error.as_ref()) {
            for &sample in block.samples() {
                if let Err(e) = writer.write_sample(sample) {
                    error!("WAV write failed, disabling output file: {}", e);
                    write_error = Some(e);
                    break;
                }
            }
        }

        played += block.len();
        if pacing == Pacing::Realtime {
            let start = *started.get_or_insert_with(Instant::now);
            let due = start + format.duration_of(played);
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            } else if due + Duration::from_millis(50) < now {
                handler.record_underrun();
            }
        }

        let token = block.sequence();
        drop(block);
        // Faults are recorded by the handler itself
        let _ = handler.on_complete(token);
    }

    debug!("Virtual device worker exiting after {} samples", played);

    if let Some(e) = write_error {
        return Err(Error::Wav(e));
    }
    if let Some(writer) = sink {
        writer.finalize()?;
    }
    Ok(())
}

impl Device for VirtualDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn submit(&self, block: SampleBlock) -> Result<()> {
        let sequence = block.sequence();
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err(Error::Io(format!("device closed, buffer #{} rejected", sequence)));
        };

        sender.try_send(block).map_err(|e| match e {
            TrySendError::Full(_) => Error::Io(format!("device queue full, buffer #{} rejected", sequence)),
            TrySendError::Disconnected(_) => {
                Error::Io(format!("device worker stopped, buffer #{} rejected", sequence))
            }
        })
    }

    /// Stops accepting blocks, lets the worker finish the queue and waits for it.
    ///
    /// A failure writing or finalizing the WAV file is returned here.
    fn close(&self) -> Result<()> {
        drop(self.sender.lock().unwrap_or_else(PoisonError::into_inner).take());

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = worker {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Virtual device worker panicked");
                    return Err(Error::InvalidState("virtual device worker panicked".to_string()));
                }
            }
            debug!("Virtual device '{}' closed", self.name);
        }
        Ok(())
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing virtual device during drop: {}", e);
        }
    }
}
