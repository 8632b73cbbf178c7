//! Analyser node - byte frequency data over a sliding window of input.
//!
//! Mirrors the platform analyser readout: the last `fftSize` samples are
//! Blackman-windowed, transformed, smoothed against the previous frame,
//! and mapped from decibels into bytes.

use std::sync::Arc;

use num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

/// Magnitudes at or below this level read as byte 0.
pub const MIN_DECIBELS: f32 = -100.0;
/// Magnitudes at or above this level read as byte 255.
pub const MAX_DECIBELS: f32 = -30.0;
/// Default smoothing time constant.
pub const DEFAULT_SMOOTHING: f32 = 0.1;

/// Window lengths the analyser accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FftSize {
    Size32,
    Size64,
    Size128,
    Size256,
    Size512,
    Size1024,
}

impl FftSize {
    /// Window length in samples.
    pub fn samples(self) -> usize {
        match self {
            FftSize::Size32 => 32,
            FftSize::Size64 => 64,
            FftSize::Size128 => 128,
            FftSize::Size256 => 256,
            FftSize::Size512 => 512,
            FftSize::Size1024 => 1024,
        }
    }

    /// Number of frequency bins in a readout, half the window length.
    pub fn bin_count(self) -> usize {
        self.samples() / 2
    }
}

impl Default for FftSize {
    fn default() -> Self {
        FftSize::Size32
    }
}

impl TryFrom<u32> for FftSize {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            32 => Ok(FftSize::Size32),
            64 => Ok(FftSize::Size64),
            128 => Ok(FftSize::Size128),
            256 => Ok(FftSize::Size256),
            512 => Ok(FftSize::Size512),
            1024 => Ok(FftSize::Size1024),
            other => Err(format!(
                "unsupported fft size: {other} (expected 32, 64, 128, 256, 512, or 1024)"
            )),
        }
    }
}

impl From<FftSize> for u32 {
    fn from(size: FftSize) -> u32 {
        size.samples() as u32
    }
}

/// A monitoring tap that accumulates input and answers spectrum queries.
/// Polling cadence lives with the caller; the node only remembers the most
/// recent window of samples and the smoothed spectrum.
pub struct Analyser {
    fft_size: FftSize,
    smoothing: f32,
    ring: Vec<f32>,
    ring_pos: usize,
    smoothed: Vec<f32>,
    window: Vec<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
}

impl Analyser {
    pub fn new(fft_size: FftSize, smoothing: f32) -> Self {
        let n = fft_size.samples();
        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(n);
        let spectrum = fft.make_output_vec();
        Analyser {
            fft_size,
            smoothing: smoothing.clamp(0.0, 1.0),
            ring: vec![0.0; n],
            ring_pos: 0,
            smoothed: vec![0.0; fft_size.bin_count()],
            window: blackman(n),
            fft,
            scratch: vec![0.0; n],
            spectrum,
        }
    }

    pub fn fft_size(&self) -> FftSize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size.bin_count()
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// Set the smoothing time constant, clamped to [0, 1]. Returns the
    /// effective value.
    pub fn set_smoothing(&mut self, smoothing: f32) -> f32 {
        self.smoothing = smoothing.clamp(0.0, 1.0);
        self.smoothing
    }

    /// Switch the window length. Accumulated samples and the smoothed
    /// spectrum are dropped; the next readout starts fresh.
    pub fn set_fft_size(&mut self, fft_size: FftSize) {
        if fft_size == self.fft_size {
            return;
        }
        let n = fft_size.samples();
        let mut planner = RealFftPlanner::new();
        self.fft = planner.plan_fft_forward(n);
        self.spectrum = self.fft.make_output_vec();
        self.fft_size = fft_size;
        self.ring = vec![0.0; n];
        self.ring_pos = 0;
        self.smoothed = vec![0.0; fft_size.bin_count()];
        self.window = blackman(n);
        self.scratch = vec![0.0; n];
    }

    /// Clear accumulated samples and the smoothed spectrum.
    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.ring_pos = 0;
        self.smoothed.fill(0.0);
    }

    /// Feed one block, downmixed to mono.
    pub fn push_block(&mut self, left: &[f32], right: &[f32]) {
        let n = self.ring.len();
        for (&l, &r) in left.iter().zip(right) {
            self.ring[self.ring_pos] = 0.5 * (l + r);
            self.ring_pos = (self.ring_pos + 1) % n;
        }
    }

    /// Compute the current byte frequency frame. Each bin is the smoothed,
    /// windowed magnitude mapped from [MIN_DECIBELS, MAX_DECIBELS] onto
    /// [0, 255].
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let n = self.ring.len();
        for i in 0..n {
            self.scratch[i] = self.ring[(self.ring_pos + i) % n] * self.window[i];
        }
        self.fft.process(&mut self.scratch, &mut self.spectrum).unwrap();

        let tau = self.smoothing;
        let span = MAX_DECIBELS - MIN_DECIBELS;
        let mut out = Vec::with_capacity(self.smoothed.len());
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum[k].norm() / n as f32;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
            let db = 20.0 * smoothed.log10();
            let byte = ((db - MIN_DECIBELS) / span * 255.0).round().clamp(0.0, 255.0);
            out.push(byte as u8);
        }
        out
    }
}

/// Blackman window, the shape the platform analyser applies before its
/// transform.
fn blackman(n: usize) -> Vec<f32> {
    let alpha = 0.16f64;
    let a0 = (1.0 - alpha) / 2.0;
    let a1 = 0.5;
    let a2 = alpha / 2.0;
    (0..n)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
            (a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_sine(analyser: &mut Analyser, bin: usize, n: usize, amplitude: f32) {
        let samples: Vec<f32> = (0..n)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / n as f32).sin()
            })
            .collect();
        for chunk in samples.chunks(128) {
            analyser.push_block(chunk, chunk);
        }
    }

    #[test]
    fn bin_count_is_half_the_window() {
        for (size, bins) in [
            (FftSize::Size32, 16),
            (FftSize::Size64, 32),
            (FftSize::Size128, 64),
            (FftSize::Size256, 128),
            (FftSize::Size512, 256),
            (FftSize::Size1024, 512),
        ] {
            assert_eq!(size.bin_count(), bins);
            assert_eq!(Analyser::new(size, 0.0).frequency_bin_count(), bins);
        }
    }

    #[test]
    fn frame_length_matches_bin_count() {
        let mut a = Analyser::new(FftSize::Size256, 0.0);
        a.push_block(&[0.5; 128], &[0.5; 128]);
        assert_eq!(a.byte_frequency_data().len(), 128);
    }

    #[test]
    fn silence_reads_all_zero() {
        let mut a = Analyser::new(FftSize::Size64, 0.0);
        let frame = a.byte_frequency_data();
        assert!(frame.iter().all(|&b| b == 0), "silence should map to 0");
    }

    #[test]
    fn sine_peak_lands_in_its_bin() {
        let mut a = Analyser::new(FftSize::Size1024, 0.0);
        feed_sine(&mut a, 100, 1024, 0.02);
        let frame = a.byte_frequency_data();
        let peak = frame
            .iter()
            .enumerate()
            .max_by_key(|&(_, &b)| b)
            .map(|(k, _)| k)
            .unwrap();
        assert!(
            (99..=101).contains(&peak),
            "peak should land near bin 100, got {peak}"
        );
        assert!(frame[100] > 120, "peak bin too quiet: {}", frame[100]);
        assert_eq!(frame[400], 0, "far bins should stay silent");
    }

    #[test]
    fn smoothing_carries_the_previous_frame() {
        let mut a = Analyser::new(FftSize::Size1024, 0.8);
        feed_sine(&mut a, 100, 1024, 0.02);
        let loud = a.byte_frequency_data()[100];
        a.push_block(&[0.0; 1024], &[0.0; 1024]);
        let faded = a.byte_frequency_data()[100];
        assert!(loud > 0);
        assert!(faded > 0, "smoothing should hold energy across a frame");
        assert!(faded < loud, "held energy must still decay: {faded} vs {loud}");
    }

    #[test]
    fn zero_smoothing_forgets_immediately() {
        let mut a = Analyser::new(FftSize::Size256, 0.0);
        feed_sine(&mut a, 20, 256, 0.5);
        assert!(a.byte_frequency_data()[20] > 0);
        a.push_block(&[0.0; 256], &[0.0; 256]);
        assert_eq!(a.byte_frequency_data()[20], 0);
    }

    #[test]
    fn smoothing_is_clamped() {
        let mut a = Analyser::new(FftSize::Size32, 0.0);
        assert_eq!(a.set_smoothing(1.5), 1.0);
        assert_eq!(a.set_smoothing(-0.5), 0.0);
        assert_eq!(a.set_smoothing(0.3), 0.3);
    }

    #[test]
    fn resizing_resets_accumulated_state() {
        let mut a = Analyser::new(FftSize::Size1024, 0.9);
        feed_sine(&mut a, 100, 1024, 0.5);
        a.byte_frequency_data();
        a.set_fft_size(FftSize::Size128);
        assert_eq!(a.frequency_bin_count(), 64);
        let frame = a.byte_frequency_data();
        assert_eq!(frame.len(), 64);
        assert!(frame.iter().all(|&b| b == 0), "resize should start fresh");
    }

    #[test]
    fn fft_size_parses_only_the_supported_set() {
        assert_eq!(FftSize::try_from(256), Ok(FftSize::Size256));
        assert!(FftSize::try_from(48).is_err());
        assert!(FftSize::try_from(2048).is_err());
        assert_eq!(u32::from(FftSize::Size512), 512);
    }
}
