//! Threshold + minimum-retrigger gate over loudness readings.
//!
//! A reading fires when it is strictly above the threshold **and** strictly
//! more than `min_retrigger_interval` has passed since the previous fire.
//! Without the interval a sustained loud signal would fire on every tick.
//!
//! There is no timer: the `Idle`/`Cooldown` phase is recomputed from the
//! clock delta on every evaluation.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default trigger threshold in dBFS.
pub const DEFAULT_THRESHOLD_DBFS: f32 = -30.0;

/// Default minimum interval between two fires.
pub const DEFAULT_MIN_RETRIGGER_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPhase {
    Idle,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerState {
    /// Instant of the most recent fire; `None` until the first one.
    pub last_trigger: Option<Instant>,
    pub threshold: f32,
    pub min_retrigger_interval: Duration,
}

impl TriggerState {
    pub fn new(threshold: f32, min_retrigger_interval: Duration) -> Self {
        Self {
            last_trigger: None,
            threshold,
            min_retrigger_interval,
        }
    }

    pub fn phase(&self, now: Instant) -> TriggerPhase {
        match self.last_trigger {
            Some(last) if now.saturating_duration_since(last) <= self.min_retrigger_interval => {
                TriggerPhase::Cooldown
            }
            _ => TriggerPhase::Idle,
        }
    }
}

impl Default for TriggerState {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_DBFS, DEFAULT_MIN_RETRIGGER_INTERVAL)
    }
}

/// Evaluate one reading against `state`.
///
/// Returns whether it fired and the successor state. `last_trigger` only
/// ever moves forward.
pub fn evaluate(reading: f32, now: Instant, state: TriggerState) -> (bool, TriggerState) {
    if reading.is_nan() || reading <= state.threshold {
        return (false, state);
    }

    let cooled_down = match state.last_trigger {
        None => true,
        Some(last) => now.saturating_duration_since(last) > state.min_retrigger_interval,
    };
    if !cooled_down {
        return (false, state);
    }

    (
        true,
        TriggerState {
            last_trigger: Some(now),
            ..state
        },
    )
}

/// Stateful wrapper holding a [`TriggerState`] for the pipeline.
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    state: TriggerState,
}

impl TriggerDetector {
    pub fn new(threshold: f32, min_retrigger_interval: Duration) -> Self {
        Self {
            state: TriggerState::new(threshold, min_retrigger_interval),
        }
    }

    /// Returns `true` when `reading` at `now` fires.
    pub fn evaluate(&mut self, reading: f32, now: Instant) -> bool {
        let (fired, next) = evaluate(reading, now, self.state);
        if fired {
            debug!(reading, threshold = self.state.threshold, "trigger fired");
        }
        self.state = next;
        fired
    }

    pub fn phase(&self, now: Instant) -> TriggerPhase {
        self.state.phase(now)
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    /// Forget the last fire so the next loud reading fires immediately.
    pub fn reset(&mut self) {
        self.state.last_trigger = None;
    }
}

impl Default for TriggerDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_DBFS, DEFAULT_MIN_RETRIGGER_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(t0: Instant, millis: u64) -> Instant {
        t0 + Duration::from_millis(millis)
    }

    #[test]
    fn loud_readings_respect_retrigger_interval() {
        let t0 = Instant::now();
        let state = TriggerState::new(-30.0, Duration::from_millis(1000));

        let (fired, state) = evaluate(-20.0, ms(t0, 0), state);
        assert!(fired);
        let (fired, state) = evaluate(-20.0, ms(t0, 500), state);
        assert!(!fired);
        let (fired, state) = evaluate(-20.0, ms(t0, 1001), state);
        assert!(fired);
        assert_eq!(state.last_trigger, Some(ms(t0, 1001)));
    }

    #[test]
    fn exactly_one_interval_does_not_refire() {
        let t0 = Instant::now();
        let state = TriggerState::new(-30.0, Duration::from_millis(1000));
        let (_, state) = evaluate(-20.0, t0, state);
        let (fired, _) = evaluate(-20.0, ms(t0, 1000), state);
        assert!(!fired);
    }

    #[test]
    fn quiet_reading_never_fires() {
        let t0 = Instant::now();
        let mut state = TriggerState::default();
        for millis in [0, 1_500, 10_000, 3_600_000] {
            let (fired, next) = evaluate(-40.0, ms(t0, millis), state);
            assert!(!fired);
            state = next;
        }
        assert_eq!(state.last_trigger, None);
    }

    #[test]
    fn reading_equal_to_threshold_does_not_fire() {
        let (fired, _) = evaluate(-30.0, Instant::now(), TriggerState::default());
        assert!(!fired);
    }

    #[test]
    fn last_trigger_never_moves_backwards() {
        let t0 = Instant::now();
        let state = TriggerState::new(-30.0, Duration::from_millis(100));
        let (_, state) = evaluate(-10.0, ms(t0, 5_000), state);
        // A stale `now` cannot look cooled down.
        let (fired, state) = evaluate(-10.0, ms(t0, 1_000), state);
        assert!(!fired);
        assert_eq!(state.last_trigger, Some(ms(t0, 5_000)));
    }

    #[test]
    fn phase_tracks_cooldown_from_clock_delta() {
        let t0 = Instant::now();
        let mut detector = TriggerDetector::new(-30.0, Duration::from_millis(1000));
        assert_eq!(detector.phase(t0), TriggerPhase::Idle);
        assert!(detector.evaluate(-5.0, t0));
        assert_eq!(detector.phase(ms(t0, 999)), TriggerPhase::Cooldown);
        assert_eq!(detector.phase(ms(t0, 1001)), TriggerPhase::Idle);
    }

    #[test]
    fn reset_allows_immediate_refire() {
        let t0 = Instant::now();
        let mut detector = TriggerDetector::default();
        assert!(detector.evaluate(-10.0, t0));
        detector.reset();
        assert!(detector.evaluate(-10.0, ms(t0, 10)));
    }
}
