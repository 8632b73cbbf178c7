//! Decoded audio buffers - the in-memory form of a loaded file.

/// PCM audio decoded from a user-supplied file: one or two channels of
/// `f32` samples plus the rate they were recorded at. Channels always have
/// equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Build a buffer from per-channel sample data. Channels beyond the
    /// first two are dropped; unequal channel lengths are truncated to the
    /// shortest.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        channels.truncate(2);
        if channels.is_empty() {
            channels.push(Vec::new());
        }
        let len = channels.iter().map(Vec::len).min().unwrap_or(0);
        for ch in &mut channels {
            ch.truncate(len);
        }
        SampleBuffer {
            channels,
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn stereo(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![left, right], sample_rate)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds at the buffer's own sample rate.
    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Read one frame as a stereo pair. Mono buffers play on both sides.
    #[inline]
    pub fn frame(&self, index: usize) -> (f32, f32) {
        if index >= self.len() {
            return (0.0, 0.0);
        }
        let left = self.channels[0][index];
        let right = if self.channels.len() > 1 {
            self.channels[1][index]
        } else {
            left
        };
        (left, right)
    }

    /// Convert to another sample rate by linear interpolation. Returns a
    /// clone when the rate already matches.
    pub fn resampled_to(&self, target_rate: u32) -> SampleBuffer {
        let target_rate = target_rate.max(1);
        if target_rate == self.sample_rate || self.is_empty() {
            let mut out = self.clone();
            out.sample_rate = target_rate;
            return out;
        }
        let step = self.sample_rate as f64 / target_rate as f64;
        let out_len = (self.len() as f64 / step).round().max(1.0) as usize;
        let channels = self
            .channels
            .iter()
            .map(|ch| {
                let last = ch.len() - 1;
                (0..out_len)
                    .map(|i| {
                        let pos = i as f64 * step;
                        let i0 = (pos as usize).min(last);
                        let i1 = (i0 + 1).min(last);
                        let frac = (pos - i0 as f64) as f32;
                        ch[i0] + (ch[i1] - ch[i0]) * frac
                    })
                    .collect()
            })
            .collect();
        SampleBuffer {
            channels,
            sample_rate: target_rate,
        }
    }
}
