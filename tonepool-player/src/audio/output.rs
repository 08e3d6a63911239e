//! Audio output using cpal
//!
//! Submitted blocks travel to the stream callback through a lock-free SPSC
//! queue. The callback plays them back to back, duplicating the mono signal
//! across however many channels the device opened with, and reports each
//! block to the [`CompletionHandler`] once its last sample has been written.

use crate::audio::device::Device;
use crate::audio::types::{AudioFormat, Sample};
use crate::error::{Error, Result};
use crate::playback::buffer::SampleBlock;
use crate::playback::completion::CompletionHandler;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedStreamConfigRange};
use ringbuf::traits::{Consumer, Producer as _, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// cpal streams are not `Send` on every backend. The stream is only created,
/// paused and dropped under the owning mutex, never used from the callback.
struct StreamHandle(Stream);

unsafe impl Send for StreamHandle {}

/// Output device backed by the host's default audio API.
pub struct CpalDevice {
    name: String,
    queue: Mutex<HeapProd<SampleBlock>>,
    stream: Mutex<Option<StreamHandle>>,
    /// Stream errors reported by the backend
    error_count: Arc<AtomicU32>,
}

impl CpalDevice {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::DeviceUnavailable(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device and start its stream.
    ///
    /// `device_name` selects a device by name; if it is not found the default
    /// device is used instead. `queue_capacity` bounds how many blocks may be
    /// queued at once and should be at least the pool capacity.
    ///
    /// # Errors
    /// - `DeviceUnavailable` if there is no output device or the stream cannot start
    /// - `UnsupportedFormat` if the device cannot run at the format's sample rate
    pub fn open(
        device_name: Option<&str>,
        format: &AudioFormat,
        handler: CompletionHandler,
        queue_capacity: usize,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = Self::find_device(&host, device_name)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (config, sample_format) = Self::select_config(&device, format)?;
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        let (producer, consumer) = HeapRb::<SampleBlock>::new(queue_capacity.max(1)).split();
        let player = BlockPlayer::new(consumer, handler, config.channels as usize);
        let error_count = Arc::new(AtomicU32::new(0));

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, player, &error_count)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, player, &error_count)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, player, &error_count)?,
            other => {
                return Err(Error::UnsupportedFormat(format!(
                    "device sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(format!("Failed to start stream: {}", e)))?;

        info!("Audio stream started on '{}'", name);

        Ok(Self {
            name,
            queue: Mutex::new(producer),
            stream: Mutex::new(Some(StreamHandle(stream))),
            error_count,
        })
    }

    fn find_device(host: &cpal::Host, device_name: Option<&str>) -> Result<cpal::Device> {
        if let Some(name) = device_name {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::DeviceUnavailable(format!("Failed to enumerate devices: {}", e)))?;

            if let Some(dev) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                info!("Found requested audio device: {}", name);
                return Ok(dev);
            }

            warn!("Requested device '{}' not found, falling back to default device", name);
        }

        let dev = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("No default output device found".to_string()))?;
        info!(
            "Using default audio device: {}",
            dev.name().unwrap_or_else(|_| "Unknown".to_string())
        );
        Ok(dev)
    }

    /// Pick a stream config that runs at the requested rate.
    ///
    /// Prefers the fewest channels, then native i16 over converted formats.
    fn select_config(device: &cpal::Device, format: &AudioFormat) -> Result<(StreamConfig, SampleFormat)> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::DeviceUnavailable(format!("Failed to get device configs: {}", e)))?;

        let best = pick_config(supported, format.sample_rate).ok_or_else(|| {
            Error::UnsupportedFormat(format!("no output config supports {}", format))
        })?;

        let sample_format = best.sample_format();
        let config = best.with_sample_rate(cpal::SampleRate(format.sample_rate)).config();
        Ok((config, sample_format))
    }

    /// Stream errors reported by the backend since open
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }
}

fn pick_config(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .filter(|c| c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate)
        .filter(|c| {
            matches!(
                c.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .min_by_key(|c| (c.channels(), c.sample_format() != SampleFormat::I16))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut player: BlockPlayer,
    error_count: &Arc<AtomicU32>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<Sample>,
{
    let error_count = Arc::clone(error_count);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                player.render(data);
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_count.fetch_add(1, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::StreamConfigNotSupported => {
                Error::UnsupportedFormat(format!("Failed to build stream: {}", e))
            }
            other => Error::DeviceUnavailable(format!("Failed to build stream: {}", other)),
        })
}

/// Callback-side state: the queue consumer and the block being played.
struct BlockPlayer {
    queue: HeapCons<SampleBlock>,
    handler: CompletionHandler,
    channels: usize,
    current: Option<SampleBlock>,
    position: usize,
    /// Set once the first block arrives; an empty queue before then is startup, not an underrun
    started: bool,
    /// Set after an underrun is recorded, cleared once samples flow again
    starved: bool,
}

impl BlockPlayer {
    fn new(queue: HeapCons<SampleBlock>, handler: CompletionHandler, channels: usize) -> Self {
        Self {
            queue,
            handler,
            channels: channels.max(1),
            current: None,
            position: 0,
            started: false,
            starved: false,
        }
    }

    fn render<T: SizedSample + FromSample<Sample>>(&mut self, data: &mut [T]) {
        for frame in data.chunks_mut(self.channels) {
            let value = match self.next_sample() {
                Some(sample) => T::from_sample(sample),
                None => T::EQUILIBRIUM,
            };
            frame.fill(value);
        }
    }

    fn next_sample(&mut self) -> Option<Sample> {
        loop {
            if let Some(block) = self.current.as_ref() {
                if let Some(&sample) = block.samples().get(self.position) {
                    self.position += 1;
                    return Some(sample);
                }
                self.finish_current();
                continue;
            }

            match self.queue.try_pop() {
                Some(block) => {
                    self.current = Some(block);
                    self.position = 0;
                    self.started = true;
                    self.starved = false;
                }
                None => {
                    if self.started && !self.starved {
                        self.starved = true;
                        self.handler.record_underrun();
                    }
                    return None;
                }
            }
        }
    }

    /// Release the finished block, then report it.
    fn finish_current(&mut self) {
        if let Some(block) = self.current.take() {
            let token = block.sequence();
            drop(block);
            // Faults are recorded by the handler itself
            let _ = self.handler.on_complete(token);
        }
        self.position = 0;
    }
}

impl Device for CpalDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn submit(&self, block: SampleBlock) -> Result<()> {
        let sequence = block.sequence();
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue
            .try_push(block)
            .map_err(|_| Error::Io(format!("output queue full, buffer #{} rejected", sequence)))
    }

    fn close(&self) -> Result<()> {
        info!("Stopping audio stream on '{}'", self.name);

        let handle = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(StreamHandle(stream)) = handle {
            stream
                .pause()
                .map_err(|e| Error::DeviceUnavailable(format!("Failed to pause stream: {}", e)))?;
            drop(stream);
        }

        let errors = self.error_count();
        if errors > 0 {
            warn!("Audio stream on '{}' reported {} error(s)", self.name, errors);
        }
        Ok(())
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error stopping audio stream during drop: {}", e);
        }
    }
}
