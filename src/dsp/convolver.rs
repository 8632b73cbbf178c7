//! Convolver node - FFT convolution against a swappable impulse response.
//!
//! Uses uniformly partitioned overlap-add: the kernel is split into
//! block-sized partitions whose spectra are precomputed, and each input
//! block's spectrum is held in a frequency-domain delay line so one inverse
//! FFT per block covers the whole kernel. Left and right channels convolve
//! against their own kernel channel.

use std::sync::Arc;

use num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use super::impulse::ImpulseBuffer;

// Kernel normalization constants from the Web Audio convolver algorithm:
// output level is calibrated against kernel RMS power so loud and quiet
// kernels produce comparable wet levels.
const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
const MIN_POWER: f32 = 0.000125;

/// Precomputed kernel spectra, one partition list per channel.
struct Kernel {
    left: Vec<Vec<Complex<f32>>>,
    right: Vec<Vec<Complex<f32>>>,
    len: usize,
}

/// Per-channel streaming state: the input-spectrum delay line, the
/// overlap tail, and FFT scratch.
struct ChannelState {
    fdl: Vec<Vec<Complex<f32>>>,
    pos: usize,
    overlap: Vec<f32>,
    padded: Vec<f32>,
    acc: Vec<Complex<f32>>,
    time_out: Vec<f32>,
}

impl ChannelState {
    fn new(block_size: usize, fft_size: usize, spectrum_len: usize) -> Self {
        ChannelState {
            fdl: vec![vec![Complex::new(0.0, 0.0); spectrum_len]; 1],
            pos: 0,
            overlap: vec![0.0; block_size],
            padded: vec![0.0; fft_size],
            acc: vec![Complex::new(0.0, 0.0); spectrum_len],
            time_out: vec![0.0; fft_size],
        }
    }

    /// Resize the delay line for a new partition count and drop all tail
    /// state from the previous kernel.
    fn reset_for(&mut self, partitions: usize) {
        self.fdl = vec![vec![Complex::new(0.0, 0.0); self.acc.len()]; partitions.max(1)];
        self.pos = 0;
        self.overlap.fill(0.0);
    }

    fn process(
        &mut self,
        fft: &dyn RealToComplex<f32>,
        ifft: &dyn ComplexToReal<f32>,
        partitions: &[Vec<Complex<f32>>],
        input: &[f32],
        output: &mut [f32],
    ) {
        let block = self.overlap.len();
        let fft_size = self.padded.len();
        let count = partitions.len();
        debug_assert_eq!(input.len(), block);
        debug_assert_eq!(self.fdl.len(), count);

        // Newest input spectrum replaces the oldest slot.
        self.pos = (self.pos + 1) % count;
        self.padded[..block].copy_from_slice(input);
        self.padded[block..].fill(0.0);
        fft.process(&mut self.padded, &mut self.fdl[self.pos]).unwrap();

        // Partition p pairs with the input block from p blocks ago.
        self.acc.fill(Complex::new(0.0, 0.0));
        for (p, partition) in partitions.iter().enumerate() {
            let spectrum = &self.fdl[(self.pos + count - p) % count];
            for i in 0..self.acc.len() {
                self.acc[i] += spectrum[i] * partition[i];
            }
        }

        ifft.process(&mut self.acc, &mut self.time_out).unwrap();

        // realfft's inverse is unscaled.
        let scale = 1.0 / fft_size as f32;
        for i in 0..block {
            output[i] = self.time_out[i] * scale + self.overlap[i];
            self.overlap[i] = self.time_out[block + i] * scale;
        }
    }
}

/// A processing node that applies an impulse response to its input. The
/// kernel is replaced whole; swapping drops the previous kernel's tail.
pub struct Convolver {
    block_size: usize,
    fft_size: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    ifft: Arc<dyn ComplexToReal<f32>>,
    normalize: bool,
    kernel: Option<Kernel>,
    left: ChannelState,
    right: ChannelState,
}

impl Convolver {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        // Block-length partitions convolved in 2x-size FFTs stay linear.
        let fft_size = block_size * 2;
        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);
        let spectrum_len = fft_size / 2 + 1;
        Convolver {
            block_size,
            fft_size,
            fft,
            ifft,
            normalize: true,
            kernel: None,
            left: ChannelState::new(block_size, fft_size, spectrum_len),
            right: ChannelState::new(block_size, fft_size, spectrum_len),
        }
    }

    pub fn has_kernel(&self) -> bool {
        self.kernel.is_some()
    }

    /// Current kernel length in samples, zero when unset.
    pub fn kernel_len(&self) -> usize {
        self.kernel.as_ref().map_or(0, |k| k.len)
    }

    pub fn normalize(&self) -> bool {
        self.normalize
    }

    /// Toggle RMS normalization. Takes effect on the next kernel swap.
    pub fn set_normalize(&mut self, normalize: bool) {
        self.normalize = normalize;
    }

    /// Replace the impulse response. The new kernel takes over atomically
    /// at the next processed block; the old tail is dropped.
    pub fn set_kernel(&mut self, kernel: &ImpulseBuffer) {
        if kernel.is_empty() {
            self.kernel = None;
            self.left.reset_for(1);
            self.right.reset_for(1);
            return;
        }
        let scale = if self.normalize {
            normalization_scale(kernel)
        } else {
            1.0
        };
        let count = kernel.len().div_ceil(self.block_size);
        self.kernel = Some(Kernel {
            left: self.partition(kernel.left(), scale, count),
            right: self.partition(kernel.right(), scale, count),
            len: kernel.len(),
        });
        self.left.reset_for(count);
        self.right.reset_for(count);
    }

    /// Drop the kernel; the node outputs silence until a new one is set.
    pub fn clear_kernel(&mut self) {
        self.kernel = None;
        self.left.reset_for(1);
        self.right.reset_for(1);
    }

    /// Clear streaming state without touching the kernel.
    pub fn reset(&mut self) {
        let count = self.kernel.as_ref().map_or(1, |k| k.left.len());
        self.left.reset_for(count);
        self.right.reset_for(count);
    }

    /// Convolve one block. Without a kernel the output is silence.
    pub fn process_block(
        &mut self,
        in_left: &[f32],
        in_right: &[f32],
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) {
        let Convolver {
            kernel,
            left,
            right,
            fft,
            ifft,
            ..
        } = self;
        match kernel {
            None => {
                out_left.fill(0.0);
                out_right.fill(0.0);
            }
            Some(k) => {
                left.process(fft.as_ref(), ifft.as_ref(), &k.left, in_left, out_left);
                right.process(fft.as_ref(), ifft.as_ref(), &k.right, in_right, out_right);
            }
        }
    }

    fn partition(&self, samples: &[f32], scale: f32, count: usize) -> Vec<Vec<Complex<f32>>> {
        let mut parts = Vec::with_capacity(count);
        let mut padded = vec![0.0f32; self.fft_size];
        for p in 0..count {
            let start = p * self.block_size;
            let end = (start + self.block_size).min(samples.len());
            padded.fill(0.0);
            for (dst, &src) in padded.iter_mut().zip(&samples[start..end]) {
                *dst = src * scale;
            }
            let mut spectrum = self.fft.make_output_vec();
            self.fft.process(&mut padded, &mut spectrum).unwrap();
            parts.push(spectrum);
        }
        parts
    }
}

/// RMS-power normalization scale for a kernel, calibrated so wet level is
/// comparable across kernels of different loudness and length.
fn normalization_scale(kernel: &ImpulseBuffer) -> f32 {
    let mut power = 0.0f64;
    for &s in kernel.left().iter().chain(kernel.right()) {
        power += s as f64 * s as f64;
    }
    let frames = (kernel.len() * ImpulseBuffer::CHANNELS) as f64;
    let mut rms = (power / frames).sqrt() as f32;
    if !rms.is_normal() || rms < MIN_POWER {
        rms = MIN_POWER;
    }
    GAIN_CALIBRATION / rms * (GAIN_CALIBRATION_SAMPLE_RATE / kernel.sample_rate() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::buffer::SampleBuffer;
    use crate::dsp::impulse::{ImpulseGenerator, ImpulseParameters};

    const BLOCK: usize = 128;

    fn kernel_from(samples: Vec<f32>) -> ImpulseBuffer {
        ImpulseBuffer::from_sample_buffer(&SampleBuffer::mono(samples, 44100))
    }

    /// Direct O(n*m) convolution as the reference.
    fn naive_convolve(input: &[f32], kernel: &[f32], len: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; len];
        for (i, o) in out.iter_mut().enumerate() {
            let mut acc = 0.0f64;
            for (j, &k) in kernel.iter().enumerate() {
                if i >= j && i - j < input.len() {
                    acc += input[i - j] as f64 * k as f64;
                }
            }
            *o = acc as f32;
        }
        out
    }

    fn run_blocks(convolver: &mut Convolver, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        let mut out_l = vec![0.0f32; BLOCK];
        let mut out_r = vec![0.0f32; BLOCK];
        for chunk in input.chunks(BLOCK) {
            let mut block = vec![0.0f32; BLOCK];
            block[..chunk.len()].copy_from_slice(chunk);
            convolver.process_block(&block, &block, &mut out_l, &mut out_r);
            out.extend_from_slice(&out_l);
        }
        out
    }

    #[test]
    fn test_silence_without_kernel() {
        let mut c = Convolver::new(BLOCK);
        let input = vec![1.0f32; BLOCK];
        let mut out_l = vec![9.0f32; BLOCK];
        let mut out_r = vec![9.0f32; BLOCK];
        c.process_block(&input, &input, &mut out_l, &mut out_r);
        assert!(out_l.iter().all(|&s| s == 0.0));
        assert!(out_r.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_dirac_kernel_is_identity() {
        let mut c = Convolver::new(BLOCK);
        c.set_normalize(false);
        c.set_kernel(&kernel_from(vec![1.0]));
        let input: Vec<f32> = (0..BLOCK).map(|i| (i as f32 / 64.0).sin()).collect();
        let out = run_blocks(&mut c, &input);
        for (i, (&a, &b)) in input.iter().zip(&out).enumerate() {
            assert!((a - b).abs() < 1e-4, "sample {i}: expected {a}, got {b}");
        }
    }

    #[test]
    fn test_delayed_dirac_shifts_across_partitions() {
        // A unit tap at offset 260 lands in the third partition, so the
        // frequency-domain delay line has to carry blocks that far.
        let delay = 260;
        let mut kernel = vec![0.0f32; 300];
        kernel[delay] = 1.0;
        let mut c = Convolver::new(BLOCK);
        c.set_normalize(false);
        c.set_kernel(&kernel_from(kernel));

        let mut input = vec![0.0f32; BLOCK * 4];
        input[3] = 1.0;
        let out = run_blocks(&mut c, &input);
        for (i, &s) in out.iter().enumerate() {
            if i == 3 + delay {
                assert!((s - 1.0).abs() < 1e-3, "tap should arrive at {i}, got {s}");
            } else {
                assert!(s.abs() < 1e-3, "unexpected energy at {i}: {s}");
            }
        }
    }

    #[test]
    fn test_matches_naive_convolution() {
        let mut generator = ImpulseGenerator::with_seed(42);
        let noise = generator.generate(
            &ImpulseParameters {
                duration: 50.0 / 44100.0,
                decay: 1.0,
                reverse: false,
            },
            44100,
        );
        let kernel: Vec<f32> = noise.left().to_vec();
        let input: Vec<f32> = (0..BLOCK * 3)
            .map(|i| ((i * 7919) % 101) as f32 / 101.0 - 0.5)
            .collect();

        let mut c = Convolver::new(BLOCK);
        c.set_normalize(false);
        c.set_kernel(&kernel_from(kernel.clone()));
        let out = run_blocks(&mut c, &input);
        let expected = naive_convolve(&input, &kernel, out.len());
        for (i, (&a, &b)) in expected.iter().zip(&out).enumerate() {
            assert!(
                (a - b).abs() < 1e-3,
                "sample {i}: naive {a}, partitioned {b}"
            );
        }
    }

    #[test]
    fn test_kernel_swap_drops_old_tail() {
        let mut c = Convolver::new(BLOCK);
        c.set_normalize(false);
        // Long constant kernel builds a tail well past the first block.
        c.set_kernel(&kernel_from(vec![0.5f32; BLOCK * 3]));
        let mut impulse = vec![0.0f32; BLOCK];
        impulse[0] = 1.0;
        let mut out_l = vec![0.0f32; BLOCK];
        let mut out_r = vec![0.0f32; BLOCK];
        c.process_block(&impulse, &impulse, &mut out_l, &mut out_r);
        assert!(out_l.iter().any(|&s| s.abs() > 0.1));

        c.set_kernel(&kernel_from(vec![1.0]));
        let silence = vec![0.0f32; BLOCK];
        c.process_block(&silence, &silence, &mut out_l, &mut out_r);
        assert!(
            out_l.iter().all(|&s| s.abs() < 1e-6),
            "old kernel's tail must not survive a swap"
        );
    }

    #[test]
    fn test_normalization_levels_kernel_amplitude() {
        let mut generator = ImpulseGenerator::with_seed(11);
        let kernel = generator.generate(
            &ImpulseParameters {
                duration: 0.01,
                decay: 2.0,
                reverse: false,
            },
            44100,
        );
        let louder = ImpulseBuffer::from_sample_buffer(&SampleBuffer::stereo(
            kernel.left().iter().map(|s| s * 8.0).collect(),
            kernel.right().iter().map(|s| s * 8.0).collect(),
            44100,
        ));

        let input: Vec<f32> = (0..BLOCK * 2).map(|i| (i as f32 * 0.1).sin()).collect();
        let mut a = Convolver::new(BLOCK);
        a.set_kernel(&kernel);
        let mut b = Convolver::new(BLOCK);
        b.set_kernel(&louder);
        let out_a = run_blocks(&mut a, &input);
        let out_b = run_blocks(&mut b, &input);
        for (i, (&x, &y)) in out_a.iter().zip(&out_b).enumerate() {
            assert!(
                (x - y).abs() < 1e-5,
                "normalized outputs should match at {i}: {x} vs {y}"
            );
        }
    }

    #[test]
    fn test_normalization_caps_quiet_kernels() {
        // An RMS below the floor clamps to MIN_POWER, capping the scale at
        // GAIN_CALIBRATION / MIN_POWER = 10 at the calibration rate.
        let mut c = Convolver::new(BLOCK);
        c.set_kernel(&kernel_from(vec![1e-5]));
        let mut input = vec![0.0f32; BLOCK];
        input[0] = 1.0;
        let mut out_l = vec![0.0f32; BLOCK];
        let mut out_r = vec![0.0f32; BLOCK];
        c.process_block(&input, &input, &mut out_l, &mut out_r);
        assert!(
            (out_l[0] - 1e-4).abs() < 1e-6,
            "quiet kernel should get the floor's 10x scale, got {}",
            out_l[0]
        );
        assert!(
            out_l[1..].iter().all(|&s| s.abs() < 1e-6),
            "single-tap kernel should leave later samples silent"
        );
    }

    #[test]
    fn test_channels_convolve_independently() {
        let silent_right = ImpulseBuffer::from_sample_buffer(&SampleBuffer::stereo(
            vec![1.0],
            vec![0.0],
            44100,
        ));
        let mut c = Convolver::new(BLOCK);
        c.set_normalize(false);
        c.set_kernel(&silent_right);
        let input = vec![0.25f32; BLOCK];
        let mut out_l = vec![0.0f32; BLOCK];
        let mut out_r = vec![0.0f32; BLOCK];
        c.process_block(&input, &input, &mut out_l, &mut out_r);
        assert!(out_l.iter().all(|&s| (s - 0.25).abs() < 1e-4));
        assert!(out_r.iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn test_empty_kernel_clears() {
        let mut c = Convolver::new(BLOCK);
        c.set_kernel(&kernel_from(vec![1.0, 0.5]));
        assert!(c.has_kernel());
        assert_eq!(c.kernel_len(), 2);
        c.set_kernel(&kernel_from(vec![]));
        assert!(!c.has_kernel());
        assert_eq!(c.kernel_len(), 0);
    }
}
