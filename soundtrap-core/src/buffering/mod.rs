//! Sample transport between the audio callback and the pipeline.
//!
//! The real-time callback pushes raw f32 samples into a lock-free
//! `ringbuf::HeapRb<f32>`; the source thread drains it into timestamped
//! [`SampleBlock`]s.

pub mod block;

pub use block::{frames_to_duration, SampleBlock};

use std::time::Instant;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Type alias for the producer half, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half, held by the block drain loop.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    create_audio_ring_with_capacity(RING_CAPACITY)
}

pub fn create_audio_ring_with_capacity(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}

/// Slices a continuous sample stream into fixed-size blocks whose timestamps
/// are derived from the running sample count, so consecutive blocks are
/// strictly increasing and gap-free.
#[derive(Debug)]
pub struct BlockAssembler {
    origin: Instant,
    sample_rate: u32,
    block_len: usize,
    pending: Vec<f32>,
    emitted_frames: u64,
}

impl BlockAssembler {
    pub fn new(origin: Instant, sample_rate: u32, block_len: usize) -> Self {
        let block_len = block_len.max(1);
        Self {
            origin,
            sample_rate,
            block_len,
            pending: Vec::with_capacity(block_len),
            emitted_frames: 0,
        }
    }

    /// Block length in samples for `block_ms` at `sample_rate`.
    pub fn block_len_for(sample_rate: u32, block_ms: u32) -> usize {
        ((sample_rate as u64 * block_ms as u64) / 1000).max(1) as usize
    }

    /// Feed samples; every completed block is passed to `emit`.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(SampleBlock)) {
        while !samples.is_empty() {
            let room = self.block_len - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_len {
                let block =
                    std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_len));
                emit(self.stamp(block));
            }
        }
    }

    fn stamp(&mut self, samples: Vec<f32>) -> SampleBlock {
        let offset = frames_to_duration(self.emitted_frames, self.sample_rate);
        self.emitted_frames += samples.len() as u64;
        SampleBlock::new(samples, self.sample_rate, self.origin + offset)
    }
}
