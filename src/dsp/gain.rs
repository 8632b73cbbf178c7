//! Gain node - scalar amplitude scaling with a declared range.

/// Scales signal amplitude by a scalar factor. Values are clamped to the
/// node's declared [min, max] before being applied.
#[derive(Debug, Clone)]
pub struct Gain {
    value: f32,
    min: f32,
    max: f32,
}

impl Gain {
    /// Node over the default [0, 1] range, starting at the midpoint.
    pub fn new() -> Self {
        Self::with_range(0.0, 1.0, 0.5)
    }

    /// Declare a range and starting value. A reversed range is normalized
    /// and the value clamped into it.
    pub fn with_range(min: f32, max: f32, value: f32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Gain {
            value: value.clamp(min, max),
            min,
            max,
        }
    }

    /// Clamp `value` into the declared range and apply it. Returns the
    /// effective value.
    pub fn set(&mut self, value: f32) -> f32 {
        self.value = value.clamp(self.min, self.max);
        self.value
    }

    /// Re-declare the range, clamping the current value into it.
    pub fn set_range(&mut self, min: f32, max: f32) {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.min = min;
        self.max = max;
        self.value = self.value.clamp(min, max);
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    /// Scale a stereo block in place.
    #[inline]
    pub fn apply(&self, left: &mut [f32], right: &mut [f32]) {
        for s in left.iter_mut() {
            *s *= self.value;
        }
        for s in right.iter_mut() {
            *s *= self.value;
        }
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_above_max() {
        let mut g = Gain::with_range(0.0, 1.0, 0.5);
        assert_eq!(g.set(5.0), 1.0);
        assert_eq!(g.value(), 1.0);
    }

    #[test]
    fn clamps_below_min() {
        let mut g = Gain::with_range(0.0, 1.0, 0.5);
        assert_eq!(g.set(-1.0), 0.0);
    }

    #[test]
    fn in_range_value_passes_through() {
        let mut g = Gain::with_range(0.0, 2.0, 1.0);
        assert_eq!(g.set(1.5), 1.5);
    }

    #[test]
    fn reversed_range_is_normalized() {
        let g = Gain::with_range(1.0, 0.0, 0.7);
        assert_eq!(g.min(), 0.0);
        assert_eq!(g.max(), 1.0);
        assert_eq!(g.value(), 0.7);
    }

    #[test]
    fn narrowing_range_reclamps_value() {
        let mut g = Gain::with_range(0.0, 2.0, 1.8);
        g.set_range(0.0, 1.0);
        assert_eq!(g.value(), 1.0);
    }

    #[test]
    fn apply_scales_block() {
        let g = Gain::with_range(0.0, 1.0, 0.25);
        let mut left = vec![1.0, -1.0, 0.5];
        let mut right = vec![0.8, 0.0, -0.4];
        g.apply(&mut left, &mut right);
        assert_eq!(left, vec![0.25, -0.25, 0.125]);
        assert_eq!(right, vec![0.2, 0.0, -0.1]);
    }
}
