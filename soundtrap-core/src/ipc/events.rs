//! Event types broadcast by the engine.
//!
//! | Event | Subscribe via |
//! |-------|---------------|
//! | `LevelEvent` | `SoundtrapEngine::subscribe_levels` |
//! | `SegmentEvent` | `SoundtrapEngine::subscribe_segments` |
//! | `EngineStatusEvent` | `SoundtrapEngine::subscribe_status` |

use serde::{Deserialize, Serialize};

use crate::trigger::TriggerPhase;

// ---------------------------------------------------------------------------
// Level events
// ---------------------------------------------------------------------------

/// Emitted for processed sample blocks (decimated by `level_event_every`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Monitoring meter reading in [0, 130].
    pub monitor_level: f32,
    /// Trigger meter reading in dBFS, [-100, 0].
    pub trigger_db: f32,
    /// Whether this block fired the trigger.
    pub triggered: bool,
    pub phase: TriggerPhase,
}

// ---------------------------------------------------------------------------
// Segment events
// ---------------------------------------------------------------------------

/// Emitted once per finalized segment, after delivery was attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentEvent {
    pub seq: u64,
    pub segment_id: u64,
    pub duration_ms: u64,
    pub sample_count: usize,
    pub sample_rate: u32,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryOutcome {
    Delivered,
    EncodeFailed,
    TransportFailed,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Monitoring levels, waiting for a trigger.
    Listening,
    /// A segment capture is in flight.
    Capturing,
    /// Monitoring stopped; engine may be restarted.
    Stopped,
    /// Source failed to start.
    Error,
}
