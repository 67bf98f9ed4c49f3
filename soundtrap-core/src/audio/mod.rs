//! Microphone sample source via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** block, allocate, log or perform I/O, so it only downmixes
//! into a preallocated buffer and pushes into an SPSC ring buffer producer
//! (`push_slice` is lock-free). Ring overflow and stream errors are recorded
//! in [`StreamHealth`] atomics; the drain thread reports them. A stream error
//! closes the source, so the pipeline sees the block channel disconnect.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `CpalSource` therefore opens the stream on its own worker thread,
//! which also drains the ring into fixed-size [`SampleBlock`]s and drops the
//! stream when stopped. A sync oneshot channel carries the open result back
//! to `start()`.

pub mod device;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{info, warn};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};

use crate::{
    buffering::{create_audio_ring, AudioConsumer, BlockAssembler, Consumer, SampleBlock},
    clock::{Clock, SystemClock},
    error::{Result, SoundtrapError},
    source::SampleSource,
};
#[cfg(feature = "audio-cpal")]
use crate::buffering::{AudioProducer, Producer};

/// Samples drained from the ring per iteration.
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const DRAIN_IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Blocks buffered between the source thread and the pipeline.
const BLOCK_CHANNEL_CAP: usize = 512;

/// Mono frames mixed per ring push inside the callback.
#[cfg(feature = "audio-cpal")]
const MIX_BUF_FRAMES: usize = 4096;

/// Callback-side failure and overflow flags, read by the drain thread.
#[derive(Debug, Default)]
pub struct StreamHealth {
    failed: AtomicBool,
    overflowed_frames: AtomicUsize,
}

impl StreamHealth {
    /// Mark the stream dead and stop the source.
    pub fn record_error(&self, running: &AtomicBool) {
        self.failed.store(true, Ordering::SeqCst);
        running.store(false, Ordering::SeqCst);
    }

    pub fn record_overflow(&self, frames: usize) {
        self.overflowed_frames.fetch_add(frames, Ordering::Relaxed);
    }

    /// Frames dropped since the last call.
    pub fn take_overflow(&self) -> usize {
        self.overflowed_frames.swap(0, Ordering::Relaxed)
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Settings for the microphone source.
#[derive(Debug, Clone)]
pub struct CpalSourceConfig {
    /// Input device name; falls back to the default device, then the first one.
    pub preferred_device: Option<String>,
    /// Block length in milliseconds. Default: 20.
    pub block_ms: u32,
}

impl Default for CpalSourceConfig {
    fn default() -> Self {
        Self {
            preferred_device: None,
            block_ms: 20,
        }
    }
}

/// Microphone-backed [`SampleSource`].
pub struct CpalSource {
    config: CpalSourceConfig,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CpalSource {
    pub fn new(config: CpalSourceConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CpalSourceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl SampleSource for CpalSource {
    fn start(&mut self) -> Result<Receiver<SampleBlock>> {
        if self.worker.is_some() {
            return Err(SoundtrapError::SourceUnavailable(
                "microphone source already started".into(),
            ));
        }

        self.running.store(true, Ordering::SeqCst);
        let (block_tx, block_rx) = crossbeam_channel::bounded(BLOCK_CHANNEL_CAP);
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let running = Arc::clone(&self.running);
        let clock = Arc::clone(&self.clock);
        let config = self.config.clone();

        let worker = std::thread::Builder::new()
            .name("soundtrap-capture".into())
            .spawn(move || {
                let (producer, consumer) = create_audio_ring();
                let health = Arc::new(StreamHealth::default());
                // ── Open device (must happen on THIS thread: cpal::Stream is !Send) ──
                let stream = match InputStream::open(
                    producer,
                    Arc::clone(&running),
                    Arc::clone(&health),
                    config.preferred_device.as_deref(),
                ) {
                    Ok(s) => {
                        let _ = open_tx.send(Ok(s.sample_rate));
                        s
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                let block_len = BlockAssembler::block_len_for(stream.sample_rate, config.block_ms);
                let assembler = BlockAssembler::new(clock.now(), stream.sample_rate, block_len);
                drain_blocks(consumer, assembler, &block_tx, &running, &health);

                // Stream drops here, releasing the device on this thread.
                drop(stream);
                info!("microphone source released");
            })
            .map_err(|e| SoundtrapError::SourceUnavailable(e.to_string()))?;

        match open_rx.recv() {
            Ok(Ok(sample_rate)) => {
                info!(sample_rate, block_ms = self.config.block_ms, "microphone source started");
                self.worker = Some(worker);
                Ok(block_rx)
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                Err(SoundtrapError::SourceUnavailable(e.to_string()))
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                Err(SoundtrapError::SourceUnavailable(
                    "capture thread died before opening the device".into(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain_blocks(
    mut consumer: AudioConsumer,
    mut assembler: BlockAssembler,
    block_tx: &Sender<SampleBlock>,
    running: &AtomicBool,
    health: &StreamHealth,
) {
    let mut scratch = vec![0f32; DRAIN_CHUNK];
    let mut dropped_blocks = 0u64;

    while running.load(Ordering::Relaxed) {
        let overflowed = health.take_overflow();
        if overflowed > 0 {
            warn!(overflowed, "ring buffer full: input frames dropped");
        }

        let n = consumer.pop_slice(&mut scratch);
        if n == 0 {
            std::thread::sleep(DRAIN_IDLE_SLEEP);
            continue;
        }

        assembler.push(&scratch[..n], |block| match block_tx.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped_blocks += 1;
                if dropped_blocks % 50 == 1 {
                    warn!(dropped_blocks, "block channel full: pipeline cannot keep up");
                }
            }
            Err(TrySendError::Disconnected(_)) => running.store(false, Ordering::Relaxed),
        });
    }

    if health.failed() {
        warn!("input stream failed, closing sample source");
    }
}

/// Live cpal input stream feeding the ring producer.
///
/// **Not `Send`**: bound to its creation thread on Windows/macOS.
struct InputStream {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl InputStream {
    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the first available device.
    fn open(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        health: Arc<StreamHealth>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });
                    if selected_device.is_none() {
                        warn!(preferred_name, "preferred input device not found, falling back");
                    }
                }
                Err(e) => warn!("failed to list input devices: {e}"),
            }
        }

        let device = match selected_device.or_else(|| host.default_input_device()) {
            Some(device) => device,
            None => {
                let mut devices = host
                    .input_devices()
                    .map_err(|e| SoundtrapError::AudioDevice(e.to_string()))?;
                let fallback = devices.next().ok_or(SoundtrapError::NoDefaultInputDevice)?;
                warn!("no default input device, falling back to first available input");
                fallback
            }
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| SoundtrapError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_mono_stream::<f32>(&device, &config, producer, running, health),
            SampleFormat::I16 => build_mono_stream::<i16>(&device, &config, producer, running, health),
            SampleFormat::U16 => build_mono_stream::<u16>(&device, &config, producer, running, health),
            SampleFormat::U8 => build_mono_stream::<u8>(&device, &config, producer, running, health),
            fmt => {
                return Err(SoundtrapError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| SoundtrapError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }
}

/// Build an input stream that downmixes interleaved frames to mono f32.
#[cfg(feature = "audio-cpal")]
fn build_mono_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
    health: Arc<StreamHealth>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = config.channels.max(1) as usize;
    let mut mix_buf = vec![0f32; MIX_BUF_FRAMES];
    let error_health = Arc::clone(&health);
    let error_running = Arc::clone(&running);

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if running.load(Ordering::Relaxed) {
                    push_mono(data, ch, &mut mix_buf, &mut producer, &health);
                }
            },
            move |err| {
                tracing::error!("audio stream error: {err}");
                error_health.record_error(&error_running);
            },
            None,
        )
        .map_err(|e| SoundtrapError::AudioStream(e.to_string()))
}

/// Downmix interleaved frames into `mix_buf` and push them to the ring.
/// Frames the ring cannot take are counted in `health`.
#[cfg(feature = "audio-cpal")]
fn push_mono<T>(
    data: &[T],
    channels: usize,
    mix_buf: &mut [f32],
    producer: &mut AudioProducer,
    health: &StreamHealth,
) where
    T: Sample,
    f32: FromSample<T>,
{
    let channels = channels.max(1);
    let frames_per_pass = mix_buf.len().max(1);
    for chunk in data.chunks(frames_per_pass * channels) {
        let mut frames = 0;
        for (slot, frame) in mix_buf.iter_mut().zip(chunk.chunks_exact(channels)) {
            let sum: f32 = frame.iter().map(|s| f32::from_sample(*s)).sum();
            *slot = sum / channels as f32;
            frames += 1;
        }
        let written = producer.push_slice(&mix_buf[..frames]);
        if written < frames {
            health.record_overflow(frames - written);
        }
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl InputStream {
    fn open(
        _producer: crate::buffering::AudioProducer,
        _running: Arc<AtomicBool>,
        _health: Arc<StreamHealth>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(SoundtrapError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
