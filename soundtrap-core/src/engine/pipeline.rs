//! Blocking pipeline loop.
//!
//! ## Pipeline stages (per block)
//!
//! ```text
//! 1. Receive SampleBlock from the source channel
//! 2. Order check (out-of-order blocks are dropped and counted, never metered)
//! 3. Monitoring level: analyser spectrum → MONITOR meter (0–130)
//! 4. Trigger level: raw samples → TRIGGER meter (dBFS)
//! 5. SegmentCapturer::ingest
//! 6. TriggerDetector::evaluate → SegmentCapturer::on_trigger
//! 7. Broadcast LevelEvent
//! 8. SegmentCapturer::poll(block time) → queue finalized segment for delivery
//! ```
//!
//! Segments finalize on block time. The stall timer only covers a source
//! that stops producing: it fires once the block-time remainder of the
//! post-roll (plus `finalize_grace`) has passed on the clock since the last
//! block arrived. Blocks already queued when it fires are processed first.
//! Stop requests arrive on a third channel.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    buffering::SampleBlock,
    capture::{Segment, SegmentCapturer},
    clock::Clock,
    engine::{delivery::DeliveryWorker, EngineConfig, StopBehavior},
    error::SoundtrapError,
    ipc::events::{EngineStatus, EngineStatusEvent, LevelEvent, SegmentEvent},
    meter::{LevelMeter, SpectrumAnalyser},
    sink::SegmentDelivery,
    trigger::TriggerDetector,
};

pub struct PipelineDiagnostics {
    pub blocks_in: AtomicUsize,
    pub empty_blocks: AtomicUsize,
    pub out_of_order_dropped: AtomicUsize,
    pub triggers_fired: AtomicUsize,
    pub triggers_ignored: AtomicUsize,
    pub segments_finalized: AtomicUsize,
    pub segments_discarded: AtomicUsize,
    pub segments_delivered: AtomicUsize,
    pub encode_failures: AtomicUsize,
    pub transport_failures: AtomicUsize,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            blocks_in: AtomicUsize::new(0),
            empty_blocks: AtomicUsize::new(0),
            out_of_order_dropped: AtomicUsize::new(0),
            triggers_fired: AtomicUsize::new(0),
            triggers_ignored: AtomicUsize::new(0),
            segments_finalized: AtomicUsize::new(0),
            segments_discarded: AtomicUsize::new(0),
            segments_delivered: AtomicUsize::new(0),
            encode_failures: AtomicUsize::new(0),
            transport_failures: AtomicUsize::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.blocks_in.store(0, Ordering::Relaxed);
        self.empty_blocks.store(0, Ordering::Relaxed);
        self.out_of_order_dropped.store(0, Ordering::Relaxed);
        self.triggers_fired.store(0, Ordering::Relaxed);
        self.triggers_ignored.store(0, Ordering::Relaxed);
        self.segments_finalized.store(0, Ordering::Relaxed);
        self.segments_discarded.store(0, Ordering::Relaxed);
        self.segments_delivered.store(0, Ordering::Relaxed);
        self.encode_failures.store(0, Ordering::Relaxed);
        self.transport_failures.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_in: self.blocks_in.load(Ordering::Relaxed),
            empty_blocks: self.empty_blocks.load(Ordering::Relaxed),
            out_of_order_dropped: self.out_of_order_dropped.load(Ordering::Relaxed),
            triggers_fired: self.triggers_fired.load(Ordering::Relaxed),
            triggers_ignored: self.triggers_ignored.load(Ordering::Relaxed),
            segments_finalized: self.segments_finalized.load(Ordering::Relaxed),
            segments_discarded: self.segments_discarded.load(Ordering::Relaxed),
            segments_delivered: self.segments_delivered.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub blocks_in: usize,
    pub empty_blocks: usize,
    pub out_of_order_dropped: usize,
    pub triggers_fired: usize,
    pub triggers_ignored: usize,
    pub segments_finalized: usize,
    pub segments_discarded: usize,
    pub segments_delivered: usize,
    pub encode_failures: usize,
    pub transport_failures: usize,
}

/// All context the pipeline needs, passed as one struct so the thread closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub blocks: Receiver<SampleBlock>,
    /// Any message or disconnect stops the pipeline.
    pub stop: Receiver<()>,
    pub clock: Arc<dyn Clock>,
    pub delivery: SegmentDelivery,
    pub level_tx: broadcast::Sender<LevelEvent>,
    pub segment_tx: broadcast::Sender<SegmentEvent>,
    pub status_tx: broadcast::Sender<EngineStatusEvent>,
    pub status: Arc<Mutex<EngineStatus>>,
    /// Cleared when the pipeline exits on its own (source disconnected).
    pub running: Arc<AtomicBool>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Per-run processing state, owned by the pipeline thread.
struct Stages {
    monitor: LevelMeter,
    trigger_meter: LevelMeter,
    analyser: SpectrumAnalyser,
    detector: TriggerDetector,
    capturer: SegmentCapturer,
    delivery: DeliveryWorker,
    level_seq: u64,
    block_count: u64,
    /// Clock reading when the newest accepted block arrived.
    last_block_received: Option<Instant>,
}

impl Stages {
    fn new(config: &EngineConfig, delivery: DeliveryWorker) -> Self {
        Self {
            monitor: LevelMeter::new(config.monitor_profile),
            trigger_meter: LevelMeter::new(config.trigger_profile),
            analyser: SpectrumAnalyser::new(config.spectrum),
            detector: TriggerDetector::new(config.threshold_dbfs, config.min_retrigger_interval),
            capturer: SegmentCapturer::new(config.pre_roll, config.post_roll),
            delivery,
            level_seq: 0,
            block_count: 0,
            last_block_received: None,
        }
    }

    /// Clock instant after which a stalled source no longer delays the
    /// in-flight capture: arrival of the newest block plus the block time
    /// still missing up to the deadline.
    fn stall_deadline(&self, grace: Duration) -> Option<Instant> {
        let deadline = self.capturer.deadline()?;
        let newest = self.capturer.newest()?;
        let received = self.last_block_received?;
        Some(received + deadline.saturating_duration_since(newest) + grace)
    }
}

enum Exit {
    Stopped,
    SourceEnded,
}

/// Run the blocking pipeline until a stop request or until the source disconnects.
pub fn run(ctx: PipelineContext) {
    info!(
        threshold_dbfs = ctx.config.threshold_dbfs,
        min_retrigger_ms = ctx.config.min_retrigger_interval.as_millis() as u64,
        pre_roll_ms = ctx.config.pre_roll.as_millis() as u64,
        post_roll_ms = ctx.config.post_roll.as_millis() as u64,
        "pipeline started"
    );

    let delivery = match DeliveryWorker::spawn(
        ctx.delivery.clone(),
        ctx.segment_tx.clone(),
        Arc::clone(&ctx.diagnostics),
    ) {
        Ok(worker) => worker,
        Err(e) => {
            error!("failed to spawn delivery thread: {e}");
            ctx.running.store(false, Ordering::SeqCst);
            set_status(&ctx, EngineStatus::Error, Some(format!("delivery thread: {e}")));
            return;
        }
    };
    let mut stages = Stages::new(&ctx.config, delivery);

    let exit = loop {
        let timer = match stages.stall_deadline(ctx.config.finalize_grace) {
            Some(due) => crossbeam_channel::after(due.saturating_duration_since(ctx.clock.now())),
            None => crossbeam_channel::never(),
        };

        select! {
            recv(ctx.stop) -> _ => break Exit::Stopped,
            recv(ctx.blocks) -> msg => match msg {
                Ok(block) => process_block(&ctx, &mut stages, block),
                Err(_) => break Exit::SourceEnded,
            },
            recv(timer) -> _ => on_stall_timer(&ctx, &mut stages),
        }
    };

    match &exit {
        Exit::Stopped => match ctx.config.stop_behavior {
            StopBehavior::Discard => {
                if stages.capturer.discard() {
                    ctx.diagnostics
                        .segments_discarded
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            StopBehavior::FinalizeEarly => {
                if let Some(segment) = stages.capturer.finalize() {
                    info!(segment_id = segment.id, "stop requested, finalizing early");
                    finish_segment(&ctx, &mut stages, segment);
                }
            }
        },
        Exit::SourceEnded => {
            warn!("sample source disconnected, pipeline ending");
            // No more audio can arrive, so the tail is as complete as it will get.
            if let Some(segment) = stages.capturer.finalize() {
                finish_segment(&ctx, &mut stages, segment);
            }
        }
    }
    stages.capturer.clear();
    // Every queued segment is attempted before the pipeline reports itself done.
    stages.delivery.shutdown();

    if matches!(exit, Exit::SourceEnded) {
        ctx.running.store(false, Ordering::SeqCst);
        set_status(&ctx, EngineStatus::Stopped, Some("sample source ended".into()));
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        blocks_in = snap.blocks_in,
        empty_blocks = snap.empty_blocks,
        out_of_order_dropped = snap.out_of_order_dropped,
        triggers_fired = snap.triggers_fired,
        triggers_ignored = snap.triggers_ignored,
        segments_finalized = snap.segments_finalized,
        segments_discarded = snap.segments_discarded,
        segments_delivered = snap.segments_delivered,
        encode_failures = snap.encode_failures,
        transport_failures = snap.transport_failures,
        "pipeline stopped"
    );
}

/// Blocks that were already queued when the timer fired still belong to the
/// segment, so they are processed before the stall check.
fn on_stall_timer(ctx: &PipelineContext, stages: &mut Stages) {
    let queued = ctx.blocks.len();
    for block in ctx.blocks.try_iter().take(queued) {
        process_block(ctx, stages, block);
    }

    let stalled = stages
        .stall_deadline(ctx.config.finalize_grace)
        .is_some_and(|due| ctx.clock.now() >= due);
    if stalled {
        if let Some(segment) = stages.capturer.finalize() {
            debug!(segment_id = segment.id, "source stalled, finalizing segment");
            finish_segment(ctx, stages, segment);
        }
    }
}

fn process_block(ctx: &PipelineContext, stages: &mut Stages, block: SampleBlock) {
    ctx.diagnostics.blocks_in.fetch_add(1, Ordering::Relaxed);
    let now = block.timestamp;

    if block.is_empty() {
        ctx.diagnostics.empty_blocks.fetch_add(1, Ordering::Relaxed);
        debug!(error = %SoundtrapError::EmptyBlock, "reading clamps to meter minimum");
    }

    if let Err(e) = stages.capturer.check_order(&block) {
        ctx.diagnostics
            .out_of_order_dropped
            .fetch_add(1, Ordering::Relaxed);
        warn!(error = %e, "sample block dropped");
        return;
    }

    let monitor_level = stages
        .monitor
        .compute_samples(stages.analyser.process(&block.samples));
    let trigger_db = stages.trigger_meter.compute(&block);

    if let Err(e) = stages.capturer.ingest(block) {
        ctx.diagnostics
            .out_of_order_dropped
            .fetch_add(1, Ordering::Relaxed);
        warn!(error = %e, "sample block dropped");
        return;
    }
    stages.last_block_received = Some(ctx.clock.now());

    let triggered = stages.detector.evaluate(trigger_db, now);
    if triggered {
        ctx.diagnostics
            .triggers_fired
            .fetch_add(1, Ordering::Relaxed);
        info!(trigger_db, monitor_level, "loud event detected");
        if stages.capturer.on_trigger(now) {
            set_status(ctx, EngineStatus::Capturing, None);
        } else {
            ctx.diagnostics
                .triggers_ignored
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    stages.block_count += 1;
    let every = u64::from(ctx.config.level_event_every.max(1));
    if triggered || stages.block_count % every == 0 {
        let event = LevelEvent {
            seq: stages.level_seq,
            monitor_level,
            trigger_db,
            triggered,
            phase: stages.detector.phase(now),
        };
        stages.level_seq = stages.level_seq.saturating_add(1);
        let _ = ctx.level_tx.send(event);
    }

    if stages.block_count % 250 == 0 {
        debug!(
            monitor_level = format_args!("{:.1}", monitor_level),
            trigger_db = format_args!("{:.1}", trigger_db),
            buffered_ms = stages.capturer.buffered_duration().as_millis() as u64,
            capturing = stages.capturer.is_capturing(),
            "audio level check"
        );
    }

    if let Some(segment) = stages.capturer.poll(now) {
        finish_segment(ctx, stages, segment);
    }
}

/// Hand a finalized segment to the delivery thread and resume listening.
fn finish_segment(ctx: &PipelineContext, stages: &mut Stages, segment: Segment) {
    let span = info_span!("segment", segment_id = segment.id);
    let _enter = span.enter();

    ctx.diagnostics
        .segments_finalized
        .fetch_add(1, Ordering::Relaxed);
    debug!(
        sample_count = segment.sample_count(),
        duration_ms = segment.duration().as_millis() as u64,
        "segment finalized"
    );
    stages.delivery.submit(segment);

    set_status(ctx, EngineStatus::Listening, None);
}

fn set_status(ctx: &PipelineContext, new_status: EngineStatus, detail: Option<String>) {
    {
        let mut status = ctx.status.lock();
        if *status == new_status && detail.is_none() {
            return;
        }
        *status = new_status;
    }
    let _ = ctx.status_tx.send(EngineStatusEvent {
        status: new_status,
        detail,
    });
}
