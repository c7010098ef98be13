//! Frequency-domain energy analyser for a playing chunk.
//!
//! Produces magnitudes on the 0..255 byte scale: Blackman-windowed FFT,
//! exponential smoothing between frames, then a linear map of
//! `[min_decibels, max_decibels]` onto `[0, 255]`. The compositor's
//! trigger thresholds are expressed on that scale.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::config::PlaybackConfig;

/// Per-tick analysis sample of a playing chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnalysisFrame {
    /// Average of the byte-scaled magnitude vector (0..255).
    pub mean_energy: f32,
    /// Maximum of the byte-scaled magnitude vector (0..255).
    pub peak_energy: f32,
    /// Ticks since the chunk started playing.
    pub frame_count: u64,
}

/// Mean and peak of one spectrum read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Energy {
    pub mean: f32,
    pub peak: f32,
}

/// One analyser node per chunk; holds smoothing state between reads.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
}

impl SpectrumAnalyzer {
    pub fn new(config: &PlaybackConfig) -> Self {
        let size = config.fft_size.max(2);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        Self {
            fft,
            window: blackman(size),
            smoothed: vec![0.0; size / 2],
            scratch: vec![Complex::new(0.0, 0.0); size],
            smoothing: config.smoothing_time_constant.clamp(0.0, 0.999),
            min_db: config.min_decibels,
            max_db: config.max_decibels,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Analyse the window of samples ending at `position`.
    ///
    /// Samples before the start of the clip (or past its end) read as silence.
    pub fn analyze(&mut self, samples: &[f32], position: usize) -> Energy {
        let size = self.window.len();
        let start = position as isize - size as isize;

        for (n, slot) in self.scratch.iter_mut().enumerate() {
            let idx = start + n as isize;
            let s = if idx >= 0 {
                samples.get(idx as usize).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            *slot = Complex::new(s * self.window[n], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 255.0 / (self.max_db - self.min_db);
        let mut sum = 0.0f32;
        let mut peak = 0.0f32;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.scratch[k].norm() / size as f32;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;

            let db = 20.0 * smoothed.log10();
            let byte = if db.is_finite() {
                ((db - self.min_db) * scale).clamp(0.0, 255.0).floor()
            } else {
                0.0
            };
            sum += byte;
            peak = peak.max(byte);
        }

        Energy {
            mean: sum / self.smoothed.len().max(1) as f32,
            peak,
        }
    }
}

fn blackman(size: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    (0..size)
        .map(|n| {
            let x = 2.0 * std::f32::consts::PI * n as f32 / size as f32;
            a0 - a1 * x.cos() + a2 * (2.0 * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * n as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn silence_reads_zero() {
        let mut analyzer = SpectrumAnalyzer::new(&PlaybackConfig::default());
        let silent = vec![0.0; 48_000];
        for position in [0, 1024, 4096, 48_000] {
            let energy = analyzer.analyze(&silent, position);
            assert_eq!(energy.mean, 0.0);
            assert_eq!(energy.peak, 0.0);
        }
    }

    #[test]
    fn tone_raises_energy_above_triggers() {
        let mut analyzer = SpectrumAnalyzer::new(&PlaybackConfig::default());
        let tone = sine(440.0, 0.5, 24_000, 24_000);
        let mut energy = Energy::default();
        // Several reads let the smoothing settle.
        for step in 1..=10 {
            energy = analyzer.analyze(&tone, 2048 * step);
        }
        assert!(energy.peak > 200.0, "peak {}", energy.peak);
        assert!(energy.mean > 0.08, "mean {}", energy.mean);
        assert!(energy.peak <= 255.0);
    }

    #[test]
    fn smoothing_lets_energy_fall_gradually() {
        let mut analyzer = SpectrumAnalyzer::new(&PlaybackConfig::default());
        let mut clip = sine(300.0, 0.8, 24_000, 8192);
        clip.extend(std::iter::repeat_n(0.0, 8192));

        let loud = analyzer.analyze(&clip, 8192);
        let after = analyzer.analyze(&clip, 8192 + 4096);
        assert!(loud.peak > 0.0);
        // Smoothed magnitude is 0.8 of the previous frame, so the tail still reads.
        assert!(after.peak > 0.0);
        assert!(after.peak <= loud.peak);
    }

    #[test]
    fn reads_before_start_are_zero_padded() {
        let mut analyzer = SpectrumAnalyzer::new(&PlaybackConfig::default());
        let tone = sine(440.0, 0.5, 24_000, 4096);
        let energy = analyzer.analyze(&tone, 0);
        assert_eq!(energy.peak, 0.0);
    }
}
