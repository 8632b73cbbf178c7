//! Impulse response synthesis - decaying white noise convolution kernels.
//!
//! The kernel is two channels of uniform noise shaped by the envelope
//! `(1 - n/length)^decay`, optionally reversed so the tail swells instead
//! of fading. Generation is randomized; tests assert shape and statistics,
//! not exact samples.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::buffer::SampleBuffer;

/// Kernel duration in seconds when the caller leaves it unset.
pub const DEFAULT_DURATION: f64 = 0.2;
/// Envelope exponent applied when decay is zero or unset. A decay of zero
/// would leave the noise unattenuated.
pub const DEFAULT_DECAY: f64 = 2.0;
/// Floor substituted for a zero duration so the kernel is never empty.
pub const MIN_DURATION: f64 = 0.01;

/// User-tunable kernel parameters. A value type: any field change means a
/// new buffer is derived, compared field-wise against the last applied set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImpulseParameters {
    /// Kernel length in seconds. Zero is floored to [`MIN_DURATION`].
    pub duration: f64,
    /// Envelope exponent, non-negative. Zero falls back to [`DEFAULT_DECAY`].
    pub decay: f64,
    /// Reverse the envelope so the kernel swells toward its end.
    pub reverse: bool,
}

impl Default for ImpulseParameters {
    fn default() -> Self {
        ImpulseParameters {
            duration: DEFAULT_DURATION,
            decay: DEFAULT_DECAY,
            reverse: false,
        }
    }
}

/// A generated convolution kernel: two equal-length channels of samples in
/// [-1, 1]. Never mutated once built; consumers swap whole buffers.
#[derive(Debug, Clone)]
pub struct ImpulseBuffer {
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: u32,
}

impl ImpulseBuffer {
    /// Number of channels. Kernels are always stereo.
    pub const CHANNELS: usize = 2;

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }

    /// Interleave both channels, left first. Handy at the wasm boundary.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len() * 2);
        for i in 0..self.len() {
            out.push(self.left[i]);
            out.push(self.right[i]);
        }
        out
    }

    /// Use decoded file audio as a kernel. Mono files drive both channels.
    pub fn from_sample_buffer(buffer: &SampleBuffer) -> ImpulseBuffer {
        let left = buffer.channel(0).to_vec();
        let right = if buffer.channel_count() > 1 {
            buffer.channel(1).to_vec()
        } else {
            left.clone()
        };
        ImpulseBuffer {
            left,
            right,
            sample_rate: buffer.sample_rate(),
        }
    }
}

/// Noise source for kernel generation. Entropy-seeded by default; the
/// seeded constructor pins the stream for reproducible tests.
#[derive(Debug)]
pub struct ImpulseGenerator {
    rng: StdRng,
}

impl ImpulseGenerator {
    pub fn new() -> Self {
        ImpulseGenerator {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        ImpulseGenerator {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate a kernel from `params` at the given rate.
    ///
    /// Pure over its inputs plus the generator's random stream: no other
    /// state is read or written.
    pub fn generate(&mut self, params: &ImpulseParameters, sample_rate: u32) -> ImpulseBuffer {
        let duration = if params.duration > 0.0 {
            params.duration
        } else {
            MIN_DURATION
        };
        // At least one sample even for sub-sample durations.
        let length = ((sample_rate as f64 * duration).round() as usize).max(1);
        let decay = if params.decay > 0.0 {
            params.decay
        } else {
            DEFAULT_DECAY
        };

        let mut left = Vec::with_capacity(length);
        let mut right = Vec::with_capacity(length);
        for channel in [&mut left, &mut right] {
            for i in 0..length {
                let n = if params.reverse { length - i } else { i };
                let envelope = (1.0 - n as f64 / length as f64).powf(decay);
                let noise: f64 = self.rng.gen_range(-1.0..=1.0);
                channel.push((noise * envelope) as f32);
            }
        }

        ImpulseBuffer {
            left,
            right,
            sample_rate,
        }
    }
}

impl Default for ImpulseGenerator {
    fn default() -> Self {
        Self::new()
    }
}
