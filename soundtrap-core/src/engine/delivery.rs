//! Segment delivery worker.
//!
//! Encoding and transport can block for seconds (an HTTP upload has a 20 s
//! timeout), so finalized segments are queued to a dedicated thread and the
//! pipeline keeps metering while they are sent. Each segment is attempted
//! exactly once, in finalize order.

use std::sync::{atomic::Ordering, Arc};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tokio::sync::broadcast;
use tracing::{debug, info_span, warn};

use crate::{
    capture::Segment,
    engine::pipeline::PipelineDiagnostics,
    ipc::events::{DeliveryOutcome, SegmentEvent},
    sink::SegmentDelivery,
};

pub(crate) struct DeliveryWorker {
    tx: Option<Sender<Segment>>,
    handle: Option<JoinHandle<()>>,
}

impl DeliveryWorker {
    pub(crate) fn spawn(
        delivery: SegmentDelivery,
        segment_tx: broadcast::Sender<SegmentEvent>,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Segment>();
        let handle = std::thread::Builder::new()
            .name("soundtrap-delivery".into())
            .spawn(move || {
                let mut seq = 0u64;
                for segment in rx {
                    let span = info_span!("segment", segment_id = segment.id);
                    let _enter = span.enter();

                    let outcome = delivery.deliver(&segment);
                    match outcome {
                        DeliveryOutcome::Delivered => &diagnostics.segments_delivered,
                        DeliveryOutcome::EncodeFailed => &diagnostics.encode_failures,
                        DeliveryOutcome::TransportFailed => &diagnostics.transport_failures,
                    }
                    .fetch_add(1, Ordering::Relaxed);

                    let event = SegmentEvent {
                        seq,
                        segment_id: segment.id,
                        duration_ms: segment.duration().as_millis() as u64,
                        sample_count: segment.sample_count(),
                        sample_rate: segment.sample_rate,
                        outcome,
                    };
                    seq = seq.saturating_add(1);
                    let emitted = segment_tx.send(event).is_ok();
                    debug!(emitted, ?outcome, "segment event broadcast");
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue a finalized segment. Never blocks.
    pub(crate) fn submit(&self, segment: Segment) {
        let Some(tx) = self.tx.as_ref() else {
            warn!(segment_id = segment.id, "delivery worker already shut down");
            return;
        };
        let segment_id = segment.id;
        if tx.send(segment).is_err() {
            warn!(segment_id, "delivery worker gone, segment dropped");
            return;
        }
        debug!(segment_id, queued = tx.len(), "segment queued for delivery");
    }

    /// Close the queue and wait for every queued segment to be attempted.
    pub(crate) fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("delivery thread panicked");
            }
        }
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
