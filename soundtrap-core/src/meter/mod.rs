//! RMS level metering.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the block: `sqrt(mean(sample²))`.
//! 2. Map RMS onto the profile's scale:
//!    - `Linear`: `rms * (max - min) + min`
//!    - `Decibel`: `20 * log10(rms)` (dBFS)
//! 3. Add the profile's calibration offset.
//! 4. Clamp to `[min, max]`.
//!
//! Silence (no samples, or RMS of exactly zero) reads as `min`.
//!
//! Two profiles share this core: [`MeterProfile::MONITOR`] for display
//! (0–130 over analyser bins, +60 calibration) and [`MeterProfile::TRIGGER`]
//! for threshold decisions (−100–0 dBFS over raw samples).

pub mod spectrum;

pub use spectrum::{SpectrumAnalyser, SpectrumConfig};

use serde::{Deserialize, Serialize};

use crate::buffering::SampleBlock;

/// How RMS is mapped before calibration and clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelScale {
    /// Proportional mapping of RMS in [0, 1] onto `[min, max]`.
    Linear,
    /// `20 * log10(rms)`, i.e. dB relative to full scale.
    Decibel,
}

/// Scale, bounds and calibration for one meter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterProfile {
    pub min: f32,
    pub max: f32,
    /// Constant added after mapping, before clamping.
    pub calibration: f32,
    pub scale: LevelScale,
}

impl MeterProfile {
    /// Display meter: analyser bins mapped into 0–130 with a +60 offset.
    pub const MONITOR: MeterProfile = MeterProfile {
        min: 0.0,
        max: 130.0,
        calibration: 60.0,
        scale: LevelScale::Linear,
    };

    /// Trigger meter: dBFS in −100–0.
    pub const TRIGGER: MeterProfile = MeterProfile {
        min: -100.0,
        max: 0.0,
        calibration: 0.0,
        scale: LevelScale::Decibel,
    };

    /// Midpoint of the range shifted by the calibration offset.
    pub fn calibrated_midpoint(&self) -> f32 {
        (self.min + self.max) / 2.0 + self.calibration
    }

    fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// A stateless loudness meter bound to one [`MeterProfile`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelMeter {
    profile: MeterProfile,
}

impl LevelMeter {
    pub fn new(profile: MeterProfile) -> Self {
        Self { profile }
    }

    pub fn monitor() -> Self {
        Self::new(MeterProfile::MONITOR)
    }

    pub fn trigger() -> Self {
        Self::new(MeterProfile::TRIGGER)
    }

    pub fn profile(&self) -> &MeterProfile {
        &self.profile
    }

    /// Loudness reading for a sample block.
    pub fn compute(&self, block: &SampleBlock) -> f32 {
        self.compute_samples(&block.samples)
    }

    /// Loudness reading for a raw slice (samples or normalized analyser bins).
    pub fn compute_samples(&self, samples: &[f32]) -> f32 {
        let profile = &self.profile;
        let rms = rms(samples);
        if rms.is_nan() || rms <= 0.0 {
            return profile.min;
        }

        let mapped = match profile.scale {
            LevelScale::Linear => rms * (profile.max - profile.min) + profile.min,
            LevelScale::Decibel => 20.0 * rms.log10(),
        };
        let value = mapped + profile.calibration;
        if value.is_nan() {
            return profile.min;
        }
        profile.clamp(value)
    }
}

/// Root-mean-square of a sample slice. Empty input yields `0.0`.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::time::Instant;

    fn block(samples: Vec<f32>) -> SampleBlock {
        SampleBlock::new(samples, 16_000, Instant::now())
    }

    fn profiles() -> [MeterProfile; 2] {
        [MeterProfile::MONITOR, MeterProfile::TRIGGER]
    }

    #[test]
    fn silence_reads_minimum() {
        for profile in profiles() {
            let meter = LevelMeter::new(profile);
            assert_eq!(meter.compute(&block(vec![0.0; 512])), profile.min);
        }
    }

    #[test]
    fn empty_block_reads_minimum() {
        for profile in profiles() {
            let meter = LevelMeter::new(profile);
            assert_eq!(meter.compute(&block(vec![])), profile.min);
        }
    }

    #[test]
    fn full_scale_reaches_calibrated_midpoint_without_exceeding_max() {
        for profile in profiles() {
            let meter = LevelMeter::new(profile);
            let square: Vec<f32> = (0..512)
                .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
                .collect();
            let reading = meter.compute(&block(square));
            assert!(reading >= profile.calibrated_midpoint().min(profile.max));
            assert!(reading <= profile.max);
        }
    }

    #[test]
    fn readings_stay_clamped() {
        let inputs: Vec<Vec<f32>> = vec![
            vec![4.0; 64],
            vec![1e-9; 64],
            vec![0.5, -0.25, 0.125],
            vec![f32::MAX; 4],
            vec![f32::NAN; 4],
        ];
        for profile in profiles() {
            let meter = LevelMeter::new(profile);
            for input in &inputs {
                let reading = meter.compute_samples(input);
                assert!(
                    (profile.min..=profile.max).contains(&reading),
                    "reading {reading} outside [{}, {}]",
                    profile.min,
                    profile.max
                );
            }
        }
    }

    #[test]
    fn trigger_profile_reports_dbfs() {
        let meter = LevelMeter::trigger();
        // Constant 0.1 amplitude → RMS 0.1 → −20 dBFS.
        assert_abs_diff_eq!(meter.compute_samples(&[0.1; 256]), -20.0, epsilon = 1e-3);
        assert_abs_diff_eq!(meter.compute_samples(&[1.0; 256]), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn monitor_profile_is_linear_plus_calibration() {
        let meter = LevelMeter::monitor();
        // RMS 0.25 → 32.5 + 60.
        assert_abs_diff_eq!(meter.compute_samples(&[0.25; 128]), 92.5, epsilon = 1e-3);
    }

    #[test]
    fn compute_is_idempotent() {
        let meter = LevelMeter::trigger();
        let b = block((0..480).map(|i| ((i as f32) * 0.05).sin() * 0.3).collect());
        assert_eq!(meter.compute(&b), meter.compute(&b));
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert_abs_diff_eq!(rms(&samples), 0.5, epsilon = 1e-5);
    }
}
