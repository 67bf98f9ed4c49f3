//! `SoundtrapEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! SoundtrapEngine::new()         → status = Idle
//!     └─► start()                → source started, pipeline spawned, status = Listening
//!         ├─► (trigger)          → status = Capturing → Listening once the segment is finalized
//!         └─► stop()             → source stopped, pipeline joined, status = Stopped
//! ```
//!
//! `start()`/`stop()` are idempotent: calling them in the wrong state returns
//! an error rather than panicking. A stopped engine may be started again.
//!
//! ## Threading
//!
//! The source owns its own capture thread (`cpal::Stream` is `!Send` on some
//! platforms). The engine only sees the block channel it returns and runs
//! the pipeline on a dedicated `std::thread`, joined on `stop()`. Finalized
//! segments are encoded and sent on a separate delivery thread owned by the
//! pipeline, so a slow upload never stalls level events. `stop()` returns
//! once every queued segment has been attempted.

mod delivery;
pub mod pipeline;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    clock::{Clock, SystemClock},
    error::{Result, SoundtrapError},
    ipc::events::{EngineStatus, EngineStatusEvent, LevelEvent, SegmentEvent},
    meter::{MeterProfile, SpectrumConfig},
    sink::SegmentDelivery,
    source::SampleSource,
    trigger::{DEFAULT_MIN_RETRIGGER_INTERVAL, DEFAULT_THRESHOLD_DBFS},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// What happens to an in-flight capture when `stop()` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopBehavior {
    /// Drop the partial segment.
    #[default]
    Discard,
    /// Deliver whatever head and tail were captured so far.
    FinalizeEarly,
}

/// Configuration for `SoundtrapEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Meter driving `LevelEvent::monitor_level`. Default: `MeterProfile::MONITOR`.
    pub monitor_profile: MeterProfile,
    /// Meter feeding the trigger. Default: `MeterProfile::TRIGGER`.
    pub trigger_profile: MeterProfile,
    /// Trigger fires strictly above this reading. Default: −30 dBFS.
    pub threshold_dbfs: f32,
    /// Default: 1000 ms.
    pub min_retrigger_interval: Duration,
    /// Audio kept before the trigger. Default: 3 s.
    pub pre_roll: Duration,
    /// Audio kept after the trigger. Default: 3 s.
    pub post_roll: Duration,
    /// Slack past the post-roll deadline before a stalled capture is
    /// finalized from the timer instead of an incoming block. Default: 250 ms.
    pub finalize_grace: Duration,
    pub spectrum: SpectrumConfig,
    pub stop_behavior: StopBehavior,
    /// Emit one `LevelEvent` every N blocks (blocks that fire always emit).
    /// Default: 1.
    pub level_event_every: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            monitor_profile: MeterProfile::MONITOR,
            trigger_profile: MeterProfile::TRIGGER,
            threshold_dbfs: DEFAULT_THRESHOLD_DBFS,
            min_retrigger_interval: DEFAULT_MIN_RETRIGGER_INTERVAL,
            pre_roll: Duration::from_secs(3),
            post_roll: Duration::from_secs(3),
            finalize_grace: Duration::from_millis(250),
            spectrum: SpectrumConfig::default(),
            stop_behavior: StopBehavior::Discard,
            level_event_every: 1,
        }
    }
}

/// The top-level engine handle.
///
/// `SoundtrapEngine` is `Send + Sync`; all fields use interior mutability.
/// Wrap in `Arc<SoundtrapEngine>` to share with event-forwarding tasks.
pub struct SoundtrapEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    source: Mutex<Box<dyn SampleSource>>,
    delivery: SegmentDelivery,
    /// `true` while source + pipeline are active.
    running: Arc<AtomicBool>,
    stop_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Canonical status (written via Mutex, read from any thread).
    status: Arc<Mutex<EngineStatus>>,
    level_tx: broadcast::Sender<LevelEvent>,
    segment_tx: broadcast::Sender<SegmentEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
}

impl SoundtrapEngine {
    /// Create a new engine on the system clock. Does not start monitoring.
    pub fn new(
        config: EngineConfig,
        source: impl SampleSource,
        delivery: SegmentDelivery,
    ) -> Self {
        Self::with_clock(config, source, delivery, Arc::new(SystemClock))
    }

    /// Create an engine driven by `clock` (used for the post-roll timer).
    pub fn with_clock(
        config: EngineConfig,
        source: impl SampleSource,
        delivery: SegmentDelivery,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (level_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (segment_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            clock,
            source: Mutex::new(Box::new(source)),
            delivery,
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: Mutex::new(None),
            worker: Mutex::new(None),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            level_tx,
            segment_tx,
            status_tx,
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start the sample source and the pipeline.
    ///
    /// Blocks until the source confirms it is delivering (or fails), then returns.
    ///
    /// # Errors
    /// - `SoundtrapError::AlreadyRunning` if already started.
    /// - `SoundtrapError::SourceUnavailable` when the source cannot be opened;
    ///   status becomes `Error` and nothing is retried.
    pub fn start(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SoundtrapError::AlreadyRunning);
        }
        // A pipeline that ended on its own (source disconnect) is reaped here.
        self.join_worker();

        let blocks = match self.source.lock().start() {
            Ok(rx) => rx,
            Err(e) => {
                let e = match e {
                    e @ SoundtrapError::SourceUnavailable(_) => e,
                    other => SoundtrapError::SourceUnavailable(other.to_string()),
                };
                warn!(error = %e, "sample source failed to start");
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                return Err(e);
            }
        };

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);
        self.set_status(EngineStatus::Listening, None);

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let ctx = pipeline::PipelineContext {
            config: self.config.clone(),
            blocks,
            stop: stop_rx,
            clock: Arc::clone(&self.clock),
            delivery: self.delivery.clone(),
            level_tx: self.level_tx.clone(),
            segment_tx: self.segment_tx.clone(),
            status_tx: self.status_tx.clone(),
            status: Arc::clone(&self.status),
            running: Arc::clone(&self.running),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        let spawned = std::thread::Builder::new()
            .name("soundtrap-pipeline".into())
            .spawn(move || pipeline::run(ctx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.source.lock().stop();
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                return Err(SoundtrapError::Io(e));
            }
        };

        *self.stop_tx.lock() = Some(stop_tx);
        *self.worker.lock() = Some(handle);
        info!("engine started, listening");
        Ok(())
    }

    /// Stop the pipeline and release the source.
    ///
    /// An in-flight capture is handled per `EngineConfig::stop_behavior`.
    ///
    /// # Errors
    /// - `SoundtrapError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(SoundtrapError::NotRunning);
        }

        info!("engine stop requested");
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.try_send(());
        }
        self.join_worker();
        self.source.lock().stop();
        self.set_status(EngineStatus::Stopped, None);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to live level events (monitor level + trigger reading).
    pub fn subscribe_levels(&self) -> broadcast::Receiver<LevelEvent> {
        self.level_tx.subscribe()
    }

    /// Subscribe to finalized-segment events.
    pub fn subscribe_segments(&self) -> broadcast::Receiver<SegmentEvent> {
        self.segment_tx.subscribe()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn pipeline_diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn join_worker(&self) {
        self.stop_tx.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("pipeline thread panicked");
            }
        }
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for SoundtrapEngine {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        } else {
            self.join_worker();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::sink::{NullTransport, WavEncoder};
    use crate::source::ChannelSource;

    fn delivery() -> SegmentDelivery {
        SegmentDelivery::new(WavEncoder::default(), NullTransport)
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.threshold_dbfs, -30.0);
        assert_eq!(config.min_retrigger_interval, Duration::from_millis(1000));
        assert_eq!(config.pre_roll, Duration::from_secs(3));
        assert_eq!(config.post_roll, Duration::from_secs(3));
        assert_eq!(config.stop_behavior, StopBehavior::Discard);
        assert_eq!(config.monitor_profile, MeterProfile::MONITOR);
        assert_eq!(config.trigger_profile, MeterProfile::TRIGGER);
    }

    #[test]
    fn start_stop_round_trip_updates_status() {
        let (source, _tx) = ChannelSource::new();
        let engine = SoundtrapEngine::new(EngineConfig::default(), source, delivery());
        assert_eq!(engine.status(), EngineStatus::Idle);

        engine.start().expect("start");
        assert!(engine.is_running());
        assert_eq!(engine.status(), EngineStatus::Listening);
        assert!(matches!(engine.start(), Err(SoundtrapError::AlreadyRunning)));

        engine.stop().expect("stop");
        assert!(!engine.is_running());
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert!(matches!(engine.stop(), Err(SoundtrapError::NotRunning)));
    }

    #[test]
    fn unavailable_source_sets_error_status() {
        let engine = SoundtrapEngine::new(
            EngineConfig::default(),
            ChannelSource::unavailable("microphone permission denied"),
            delivery(),
        );
        let mut status_rx = engine.subscribe_status();

        let err = engine.start().unwrap_err();
        assert!(matches!(err, SoundtrapError::SourceUnavailable(ref m) if m.contains("permission")));
        assert!(!engine.is_running());
        assert_eq!(engine.status(), EngineStatus::Error);

        let event = status_rx.try_recv().expect("status event");
        assert_eq!(event.status, EngineStatus::Error);
        assert!(event.detail.is_some());
    }

    #[test]
    fn stop_behavior_serializes_camel_case() {
        let json = serde_json::to_string(&StopBehavior::FinalizeEarly).unwrap();
        assert_eq!(json, r#""finalizeEarly""#);
        let back: StopBehavior = serde_json::from_str(r#""discard""#).unwrap();
        assert_eq!(back, StopBehavior::Discard);
    }
}
