//! # soundtrap-core
//!
//! Live loudness metering with triggered audio capture.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CpalSource → SPSC RingBuffer → BlockAssembler ─┐
//!                                                             │ SampleBlock channel
//!                                                 Pipeline(std::thread)
//!                                                             │
//!                          LevelMeter (monitor + trigger) ── TriggerDetector
//!                                                             │
//!                                               SegmentCapturer (pre/post roll)
//!                                                             │ Segment channel
//!                                                 Delivery(std::thread)
//!                                                             │
//!                                    EncoderSink → TransportSink (dir, HTTP)
//!                                                             │
//!                        broadcast::Sender<LevelEvent / SegmentEvent / EngineStatusEvent>
//! ```
//!
//! The audio callback neither allocates nor logs: it mixes into a buffer
//! allocated when the stream is built. Ring overflow and stream errors are
//! counted in atomics and reported by the drain thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod clock;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod meter;
pub mod sink;
pub mod source;
pub mod trigger;

// Convenience re-exports for downstream crates
pub use audio::{CpalSource, CpalSourceConfig};
pub use buffering::SampleBlock;
pub use capture::{Segment, SegmentCapturer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineConfig, SoundtrapEngine, StopBehavior};
pub use error::SoundtrapError;
pub use ipc::events::{
    DeliveryOutcome, EngineStatus, EngineStatusEvent, LevelEvent, SegmentEvent,
};
pub use meter::{LevelMeter, MeterProfile};
pub use sink::{
    DirectorySink, EncodedSegment, EncoderSink, NullTransport, SegmentDelivery, TransportChain,
    TransportSink, WavEncoder,
};
pub use source::{ChannelSource, SampleSource};
pub use trigger::{TriggerDetector, TriggerPhase};

#[cfg(feature = "upload")]
pub use sink::{HttpUploader, HttpUploaderConfig};
