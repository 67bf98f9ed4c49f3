//! Rolling pre-roll buffer and trigger-centred segment cutting.
//!
//! ## Lifecycle
//!
//! ```text
//! ingest(block)*           → pre-roll buffer keeps the last `pre_roll` of audio
//! on_trigger(t)            → snapshot pre-roll as segment head, deadline = t + post_roll
//! ingest(block)*           → blocks starting at or before the deadline join the tail
//! poll(now) / finalize()   → head ++ tail handed out as one Segment, capturer re-armed
//! ```
//!
//! Only one capture is in flight at a time: a trigger arriving while a
//! capture is active is ignored until that capture finalizes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::{
    buffering::SampleBlock,
    error::{Result, SoundtrapError},
};

/// One finalized, trigger-centred span of captured audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Sequential id, unique per capturer.
    pub id: u64,
    /// Instant the trigger fired.
    pub trigger_at: Instant,
    pub sample_rate: u32,
    /// Ordered, gap-free blocks from `trigger_at - pre_roll` to `trigger_at + post_roll`.
    pub blocks: Vec<SampleBlock>,
}

impl Segment {
    /// All samples in order.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.blocks.iter().flat_map(|b| b.samples.iter().copied())
    }

    pub fn to_samples(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.sample_count());
        out.extend(self.samples());
        out
    }

    pub fn sample_count(&self) -> usize {
        self.blocks.iter().map(SampleBlock::len).sum()
    }

    /// Timestamp of the first block, or the trigger instant when empty.
    pub fn start(&self) -> Instant {
        self.blocks
            .first()
            .map(|b| b.timestamp)
            .unwrap_or(self.trigger_at)
    }

    /// End of the last block, or the trigger instant when empty.
    pub fn end(&self) -> Instant {
        self.blocks.last().map(SampleBlock::end).unwrap_or(self.trigger_at)
    }

    pub fn duration(&self) -> Duration {
        self.end().saturating_duration_since(self.start())
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }
}

#[derive(Debug)]
struct ActiveCapture {
    id: u64,
    trigger_at: Instant,
    deadline: Instant,
    head: Vec<SampleBlock>,
    tail: Vec<SampleBlock>,
}

#[derive(Debug)]
pub struct SegmentCapturer {
    pre_roll: Duration,
    post_roll: Duration,
    buffer: VecDeque<SampleBlock>,
    /// Timestamp of the newest accepted block.
    newest: Option<Instant>,
    /// Timestamp of the first accepted block; error offsets are relative to it.
    origin: Option<Instant>,
    active: Option<ActiveCapture>,
    next_id: u64,
}

impl SegmentCapturer {
    pub fn new(pre_roll: Duration, post_roll: Duration) -> Self {
        Self {
            pre_roll,
            post_roll,
            buffer: VecDeque::new(),
            newest: None,
            origin: None,
            active: None,
            next_id: 0,
        }
    }

    pub fn pre_roll(&self) -> Duration {
        self.pre_roll
    }

    pub fn post_roll(&self) -> Duration {
        self.post_roll
    }

    /// Whether `block` would be accepted by [`ingest`](Self::ingest), without
    /// touching any state.
    ///
    /// # Errors
    /// `SoundtrapError::OutOfOrderSample` when the block does not start after
    /// the newest accepted block.
    pub fn check_order(&self, block: &SampleBlock) -> Result<()> {
        match self.newest {
            Some(newest) if block.timestamp <= newest => {
                let origin = self.origin.unwrap_or(newest);
                Err(SoundtrapError::OutOfOrderSample {
                    newest: newest.saturating_duration_since(origin),
                    received: block.timestamp.saturating_duration_since(origin),
                })
            }
            _ => Ok(()),
        }
    }

    /// Timestamp of the newest accepted block.
    pub fn newest(&self) -> Option<Instant> {
        self.newest
    }

    /// Append a block to the pre-roll buffer (and the active tail, if any).
    ///
    /// # Errors
    /// `SoundtrapError::OutOfOrderSample` when the block does not start after
    /// the newest accepted block. The block is dropped; state is unchanged.
    pub fn ingest(&mut self, block: SampleBlock) -> Result<()> {
        self.check_order(&block)?;

        if block.is_empty() {
            return Ok(());
        }

        self.newest = Some(block.timestamp);
        self.origin.get_or_insert(block.timestamp);

        if let Some(active) = self.active.as_mut() {
            if block.timestamp <= active.deadline {
                active.tail.push(block.clone());
            }
        }

        let newest = block.timestamp;
        self.buffer.push_back(block);
        while let Some(front) = self.buffer.front() {
            if newest.saturating_duration_since(front.timestamp) > self.pre_roll {
                self.buffer.pop_front();
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Start a capture around `trigger_at`.
    ///
    /// Returns `false` when a capture is already in flight; the trigger is ignored.
    pub fn on_trigger(&mut self, trigger_at: Instant) -> bool {
        if let Some(active) = &self.active {
            debug!(
                segment_id = active.id,
                "trigger ignored, capture already in flight"
            );
            return false;
        }

        let head: Vec<SampleBlock> = self
            .buffer
            .iter()
            .filter(|b| trigger_at.saturating_duration_since(b.timestamp) <= self.pre_roll)
            .cloned()
            .collect();

        let id = self.next_id;
        self.next_id += 1;
        info!(
            segment_id = id,
            head_blocks = head.len(),
            post_roll_ms = self.post_roll.as_millis() as u64,
            "capture armed"
        );
        self.active = Some(ActiveCapture {
            id,
            trigger_at,
            deadline: trigger_at + self.post_roll,
            head,
            tail: Vec::new(),
        });
        true
    }

    pub fn is_capturing(&self) -> bool {
        self.active.is_some()
    }

    /// Instant at which the in-flight capture is due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|a| a.deadline)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }

    /// Finalize the in-flight capture if its post-roll has elapsed at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<Segment> {
        if self.is_due(now) {
            self.finalize()
        } else {
            None
        }
    }

    /// Concatenate head and tail of the in-flight capture and re-arm.
    ///
    /// Returns `None` when nothing is being captured.
    pub fn finalize(&mut self) -> Option<Segment> {
        let ActiveCapture {
            id,
            trigger_at,
            head,
            tail,
            ..
        } = self.active.take()?;

        let mut blocks = head;
        blocks.extend(tail);
        let sample_rate = blocks.first().map(|b| b.sample_rate).unwrap_or(0);
        let segment = Segment {
            id,
            trigger_at,
            sample_rate,
            blocks,
        };
        info!(
            segment_id = id,
            blocks = segment.blocks.len(),
            samples = segment.sample_count(),
            duration_ms = segment.duration().as_millis() as u64,
            "segment finalized"
        );
        Some(segment)
    }

    /// Drop the in-flight capture without producing a segment.
    ///
    /// Returns `true` if a capture was discarded.
    pub fn discard(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                info!(segment_id = active.id, "in-flight capture discarded");
                true
            }
            None => false,
        }
    }

    /// Discard the in-flight capture and all buffered audio.
    pub fn clear(&mut self) {
        self.active = None;
        self.buffer.clear();
        self.newest = None;
        self.origin = None;
    }

    /// Audio currently held in the pre-roll buffer.
    pub fn buffered_duration(&self) -> Duration {
        match (self.buffer.front(), self.buffer.back()) {
            (Some(first), Some(last)) => last.end().saturating_duration_since(first.timestamp),
            _ => Duration::ZERO,
        }
    }

    pub fn buffered_blocks(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 100;

    fn secs(t0: Instant, s: u64) -> Instant {
        t0 + Duration::from_secs(s)
    }

    /// One-second block at `t0 + s` whose samples all equal `s`.
    fn block_at(t0: Instant, s: u64) -> SampleBlock {
        SampleBlock::new(vec![s as f32; RATE as usize], RATE, secs(t0, s))
    }

    fn block_offsets(t0: Instant, segment: &Segment) -> Vec<u64> {
        segment
            .blocks
            .iter()
            .map(|b| b.timestamp.duration_since(t0).as_secs())
            .collect()
    }

    /// Ingest ten one-second blocks, triggering at each second in `triggers`
    /// and polling after every block.
    fn run_ten_seconds(triggers: &[u64]) -> (Instant, Vec<Segment>, Vec<bool>) {
        let t0 = Instant::now();
        let mut capturer = SegmentCapturer::new(Duration::from_secs(3), Duration::from_secs(3));
        let mut segments = Vec::new();
        let mut accepted = Vec::new();

        for s in 0..10 {
            capturer.ingest(block_at(t0, s)).unwrap();
            if triggers.contains(&s) {
                accepted.push(capturer.on_trigger(secs(t0, s)));
            }
            if let Some(segment) = capturer.poll(secs(t0, s)) {
                segments.push(segment);
            }
        }
        (t0, segments, accepted)
    }

    #[test]
    fn segment_spans_pre_and_post_roll() {
        let (t0, segments, _) = run_ten_seconds(&[5]);
        assert_eq!(segments.len(), 1);
        assert_eq!(block_offsets(t0, &segments[0]), vec![2, 3, 4, 5, 6, 7, 8]);

        let samples = segments[0].to_samples();
        assert_eq!(samples.len(), 7 * RATE as usize);
        assert_eq!(samples.first().copied(), Some(2.0));
        assert_eq!(samples.last().copied(), Some(8.0));
    }

    #[test]
    fn retrigger_during_capture_is_ignored() {
        let (t0, segments, accepted) = run_ten_seconds(&[5, 6]);
        assert_eq!(accepted, vec![true, false]);
        assert_eq!(segments.len(), 1);
        assert_eq!(block_offsets(t0, &segments[0]), vec![2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn trigger_after_finalize_starts_new_segment() {
        let (t0, segments, accepted) = run_ten_seconds(&[2, 6]);
        assert_eq!(accepted, vec![true, true]);
        assert_eq!(segments.len(), 2);
        assert_eq!(block_offsets(t0, &segments[0]), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(block_offsets(t0, &segments[1]), vec![3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(segments[1].id, segments[0].id + 1);
    }

    #[test]
    fn pre_roll_buffer_evicts_old_blocks() {
        let t0 = Instant::now();
        let mut capturer = SegmentCapturer::new(Duration::from_secs(3), Duration::from_secs(3));
        for s in 0..10 {
            capturer.ingest(block_at(t0, s)).unwrap();
        }
        assert_eq!(capturer.buffered_blocks(), 4);
        assert_eq!(capturer.buffered_duration(), Duration::from_secs(4));
    }

    #[test]
    fn out_of_order_block_is_rejected() {
        let t0 = Instant::now();
        let mut capturer = SegmentCapturer::new(Duration::from_secs(3), Duration::from_secs(3));
        capturer.ingest(block_at(t0, 0)).unwrap();
        capturer.ingest(block_at(t0, 4)).unwrap();

        let err = capturer.ingest(block_at(t0, 2)).unwrap_err();
        match err {
            SoundtrapError::OutOfOrderSample { newest, received } => {
                assert_eq!(newest, Duration::from_secs(4));
                assert_eq!(received, Duration::from_secs(2));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            capturer.ingest(block_at(t0, 4)),
            Err(SoundtrapError::OutOfOrderSample { .. })
        ));
        assert_eq!(capturer.buffered_blocks(), 2);
    }

    #[test]
    fn check_order_matches_ingest_without_mutating() {
        let t0 = Instant::now();
        let mut capturer = SegmentCapturer::new(Duration::from_secs(3), Duration::from_secs(3));
        assert!(capturer.check_order(&block_at(t0, 3)).is_ok());
        assert_eq!(capturer.newest(), None);

        capturer.ingest(block_at(t0, 3)).unwrap();
        assert!(capturer.check_order(&block_at(t0, 3)).is_err());
        assert!(capturer.check_order(&block_at(t0, 1)).is_err());
        assert!(capturer.check_order(&block_at(t0, 4)).is_ok());
        assert_eq!(capturer.newest(), Some(secs(t0, 3)));
        assert_eq!(capturer.buffered_blocks(), 1);
    }

    #[test]
    fn poll_before_deadline_keeps_capturing() {
        let t0 = Instant::now();
        let mut capturer = SegmentCapturer::new(Duration::from_secs(1), Duration::from_secs(2));
        capturer.ingest(block_at(t0, 0)).unwrap();
        assert!(capturer.on_trigger(t0));
        assert!(capturer.poll(secs(t0, 1)).is_none());
        assert!(capturer.is_capturing());
        assert_eq!(capturer.deadline(), Some(secs(t0, 2)));
    }

    #[test]
    fn finalize_without_trigger_is_none() {
        let mut capturer = SegmentCapturer::new(Duration::from_secs(1), Duration::from_secs(1));
        assert!(capturer.finalize().is_none());
    }

    #[test]
    fn early_finalize_returns_partial_tail() {
        let t0 = Instant::now();
        let mut capturer = SegmentCapturer::new(Duration::from_secs(1), Duration::from_secs(5));
        capturer.ingest(block_at(t0, 0)).unwrap();
        capturer.ingest(block_at(t0, 1)).unwrap();
        capturer.on_trigger(secs(t0, 1));
        capturer.ingest(block_at(t0, 2)).unwrap();

        let segment = capturer.finalize().unwrap();
        assert_eq!(block_offsets(t0, &segment), vec![0, 1, 2]);
        assert!(!capturer.is_capturing());
    }

    #[test]
    fn discard_drops_capture_and_clear_drops_buffer() {
        let t0 = Instant::now();
        let mut capturer = SegmentCapturer::new(Duration::from_secs(1), Duration::from_secs(1));
        capturer.ingest(block_at(t0, 0)).unwrap();
        capturer.on_trigger(t0);
        assert!(capturer.discard());
        assert!(!capturer.discard());
        assert_eq!(capturer.buffered_blocks(), 1);

        capturer.clear();
        assert_eq!(capturer.buffered_blocks(), 0);
        // After clear, an earlier timestamp is accepted again.
        capturer.ingest(block_at(t0, 0)).unwrap();
    }
}
