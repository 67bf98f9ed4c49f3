//! Segment delivery: encoding and transport.
//!
//! ```text
//! Segment ──EncoderSink::encode──► EncodedSegment ──TransportSink::send──► (disk, HTTP, ...)
//! ```
//!
//! Both stages are synchronous and run on the pipeline thread. Each segment
//! gets exactly one attempt per transport; failures are reported to the
//! caller and never retried or re-queued.

pub mod dir;
#[cfg(feature = "upload")]
pub mod http;
pub mod wav;

pub use dir::DirectorySink;
#[cfg(feature = "upload")]
pub use http::{HttpUploader, HttpUploaderConfig};
pub use wav::{WavEncoder, WavFormat};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::{
    capture::Segment,
    error::{Result, SoundtrapError},
    ipc::events::DeliveryOutcome,
};

/// Opaque encoded payload for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSegment {
    pub segment_id: u64,
    pub bytes: Vec<u8>,
    /// MIME type, e.g. `audio/wav`.
    pub content_type: &'static str,
    /// File extension without the dot, e.g. `wav`.
    pub extension: &'static str,
}

/// Turns a segment into a storable byte payload.
pub trait EncoderSink: Send + 'static {
    fn encode(&mut self, segment: &Segment) -> Result<EncodedSegment>;
}

/// Moves an encoded segment somewhere (disk, network, ...).
pub trait TransportSink: Send + 'static {
    fn send(&mut self, encoded: &EncodedSegment) -> Result<()>;
}

/// Thread-safe handle to an encoder + transport pair.
///
/// Shared between the engine (which outlives pipeline runs) and the pipeline
/// thread. `parking_lot::Mutex` serialises access; only the pipeline thread
/// delivers in practice.
#[derive(Clone)]
pub struct SegmentDelivery {
    encoder: Arc<Mutex<dyn EncoderSink>>,
    transport: Arc<Mutex<dyn TransportSink>>,
}

impl SegmentDelivery {
    pub fn new<E: EncoderSink, T: TransportSink>(encoder: E, transport: T) -> Self {
        Self {
            encoder: Arc::new(Mutex::new(encoder)),
            transport: Arc::new(Mutex::new(transport)),
        }
    }

    /// Encode and send `segment` once. Failures are logged, never retried.
    pub fn deliver(&self, segment: &Segment) -> DeliveryOutcome {
        let encoded = match self.encoder.lock().encode(segment) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(segment_id = segment.id, error = %e, "segment encode failed");
                return DeliveryOutcome::EncodeFailed;
            }
        };

        match self.transport.lock().send(&encoded) {
            Ok(()) => {
                info!(
                    segment_id = segment.id,
                    bytes = encoded.bytes.len(),
                    "segment delivered"
                );
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                warn!(
                    segment_id = segment.id,
                    error = %e,
                    "segment transport failed"
                );
                DeliveryOutcome::TransportFailed
            }
        }
    }
}

impl std::fmt::Debug for SegmentDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentDelivery").finish_non_exhaustive()
    }
}

/// Transport that accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl TransportSink for NullTransport {
    fn send(&mut self, _encoded: &EncodedSegment) -> Result<()> {
        Ok(())
    }
}

/// Sends to every inner transport once, in order.
///
/// All transports are attempted even if an earlier one fails; the first
/// failure is returned.
#[derive(Default)]
pub struct TransportChain {
    sinks: Vec<Box<dyn TransportSink>>,
}

impl TransportChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl TransportSink) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn TransportSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TransportSink for TransportChain {
    fn send(&mut self, encoded: &EncodedSegment) -> Result<()> {
        let mut first_err: Option<SoundtrapError> = None;
        for (idx, sink) in self.sinks.iter_mut().enumerate() {
            if let Err(e) = sink.send(encoded) {
                warn!(
                    segment_id = encoded.segment_id,
                    transport = idx,
                    error = %e,
                    "transport failed"
                );
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for TransportChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChain")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording {
        seen: Arc<Mutex<Vec<u64>>>,
        fail: bool,
    }

    impl TransportSink for Recording {
        fn send(&mut self, encoded: &EncodedSegment) -> Result<()> {
            self.seen.lock().push(encoded.segment_id);
            if self.fail {
                Err(SoundtrapError::Transport("offline".into()))
            } else {
                Ok(())
            }
        }
    }

    fn payload(id: u64) -> EncodedSegment {
        EncodedSegment {
            segment_id: id,
            bytes: vec![1, 2, 3],
            content_type: "audio/wav",
            extension: "wav",
        }
    }

    #[test]
    fn chain_attempts_every_transport_once() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let mut chain = TransportChain::new()
            .with(Recording {
                seen: Arc::clone(&first),
                fail: true,
            })
            .with(Recording {
                seen: Arc::clone(&second),
                fail: false,
            });

        let err = chain.send(&payload(7)).unwrap_err();
        assert!(err.is_sink_failure());
        assert_eq!(&*first.lock(), &vec![7]);
        assert_eq!(&*second.lock(), &vec![7]);
    }

    struct FailingEncoder;

    impl EncoderSink for FailingEncoder {
        fn encode(&mut self, segment: &Segment) -> Result<EncodedSegment> {
            Err(SoundtrapError::Encode(format!("segment {}", segment.id)))
        }
    }

    fn empty_segment() -> Segment {
        Segment {
            id: 2,
            trigger_at: std::time::Instant::now(),
            sample_rate: 8_000,
            blocks: vec![],
        }
    }

    #[test]
    fn delivery_reports_each_stage() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ok = SegmentDelivery::new(
            WavEncoder::default(),
            Recording {
                seen: Arc::clone(&seen),
                fail: false,
            },
        );
        assert_eq!(ok.deliver(&empty_segment()), DeliveryOutcome::Delivered);
        assert_eq!(&*seen.lock(), &vec![2]);

        let failing_transport = SegmentDelivery::new(
            WavEncoder::default(),
            Recording {
                seen: Arc::clone(&seen),
                fail: true,
            },
        );
        assert_eq!(
            failing_transport.deliver(&empty_segment()),
            DeliveryOutcome::TransportFailed
        );

        let failing_encoder = SegmentDelivery::new(FailingEncoder, NullTransport);
        assert_eq!(
            failing_encoder.deliver(&empty_segment()),
            DeliveryOutcome::EncodeFailed
        );
    }

    #[test]
    fn empty_chain_succeeds() {
        let mut chain = TransportChain::new();
        assert!(chain.is_empty());
        assert!(chain.send(&payload(1)).is_ok());
    }
}
