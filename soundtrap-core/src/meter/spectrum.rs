//! Analyser spectrum feeding the monitoring meter.
//!
//! Produces `fft_size / 2` magnitude bins normalized to [0, 1], the same
//! shape a browser `AnalyserNode` hands out from `getByteFrequencyData`
//! (divided by 255):
//!
//! ```text
//! last fft_size samples → Blackman window → FFT → |X|/N
//!     → temporal smoothing → dB → (dB - min_db) / (max_db - min_db) → clamp [0, 1]
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumConfig {
    /// FFT window length in samples. Rounded up to a power of two, minimum 32.
    pub fft_size: usize,
    /// dB value mapped to 0.0.
    pub min_decibels: f32,
    /// dB value mapped to 1.0.
    pub max_decibels: f32,
    /// Weight of the previous frame in [0, 1).
    pub smoothing: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            min_decibels: -100.0,
            max_decibels: -30.0,
            smoothing: 0.8,
        }
    }
}

pub struct SpectrumAnalyser {
    config: SpectrumConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    history: VecDeque<f32>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bins: Vec<f32>,
}

impl SpectrumAnalyser {
    pub fn new(mut config: SpectrumConfig) -> Self {
        config.fft_size = config.fft_size.max(32).next_power_of_two();
        config.smoothing = config.smoothing.clamp(0.0, 0.99);
        if config.max_decibels <= config.min_decibels {
            config.max_decibels = config.min_decibels + 1.0;
        }

        let n = config.fft_size;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
        Self {
            config,
            fft,
            window: build_blackman_window(n),
            history: VecDeque::from(vec![0.0; n]),
            scratch: vec![Complex::new(0.0, 0.0); n],
            smoothed: vec![0.0; n / 2],
            bins: vec![0.0; n / 2],
        }
    }

    pub fn config(&self) -> &SpectrumConfig {
        &self.config
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Push new samples and recompute the normalized bins.
    pub fn process(&mut self, samples: &[f32]) -> &[f32] {
        let n = self.config.fft_size;
        let incoming = if samples.len() > n {
            &samples[samples.len() - n..]
        } else {
            samples
        };
        self.history.drain(..incoming.len());
        self.history.extend(incoming.iter().copied());

        for (i, (slot, s)) in self.scratch.iter_mut().zip(self.history.iter()).enumerate() {
            *slot = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let tau = self.config.smoothing;
        let range = self.config.max_decibels - self.config.min_decibels;
        let scale = 1.0 / n as f32;
        for k in 0..n / 2 {
            let magnitude = self.scratch[k].norm() * scale;
            let smoothed = tau * self.smoothed[k] + (1.0 - tau) * magnitude;
            self.smoothed[k] = smoothed;

            let db = if smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };
            self.bins[k] = ((db - self.config.min_decibels) / range).clamp(0.0, 1.0);
        }
        &self.bins
    }

    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
        self.bins.iter_mut().for_each(|s| *s = 0.0);
    }
}

impl std::fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn build_blackman_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    let alpha = 0.16f32;
    let a0 = 0.5 * (1.0 - alpha);
    let a1 = 0.5;
    let a2 = 0.5 * alpha;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}
