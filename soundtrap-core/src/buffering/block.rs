//! Typed sample block flowing from the sample source through the pipeline.

use std::time::{Duration, Instant};

/// A contiguous block of mono PCM samples captured at `timestamp`.
///
/// Immutable once produced; the pipeline stage processing it owns it transiently.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
    /// Capture instant of the first sample.
    pub timestamp: Instant,
}

impl SampleBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32, timestamp: Instant) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp,
        }
    }

    /// Duration covered by the samples in this block.
    pub fn duration(&self) -> Duration {
        frames_to_duration(self.samples.len() as u64, self.sample_rate)
    }

    /// Instant just past the last sample.
    pub fn end(&self) -> Instant {
        self.timestamp + self.duration()
    }

    /// Returns true if the block contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Exact duration of `frames` samples at `sample_rate` (nanosecond resolution).
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}
