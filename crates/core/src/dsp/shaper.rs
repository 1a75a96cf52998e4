//! Soft-clip transfer curve for the harmonic exciter branch.

use crate::StereoFrame;

const CURVE_POINTS: usize = 1_025;

/// Table-driven wave shaper. Inputs outside [-1, 1] clamp to the curve ends.
#[derive(Debug, Clone)]
pub struct WaveShaper {
    curve: Vec<f32>,
    excitement: f32,
}

impl WaveShaper {
    pub fn new(excitement: f32) -> Self {
        let mut shaper = Self {
            curve: Vec::with_capacity(CURVE_POINTS),
            excitement: f32::NAN,
        };
        shaper.set_excitement(excitement);
        shaper
    }

    pub fn excitement(&self) -> f32 {
        self.excitement
    }

    /// Regenerates the curve. The swap is immediate: curve shapes are not
    /// interpolated.
    pub fn set_excitement(&mut self, excitement: f32) {
        let excitement = excitement.clamp(0.0, 1.0);
        if excitement == self.excitement {
            return;
        }
        self.excitement = excitement;

        let drive = 1.0 + excitement * 9.0;
        let norm = drive.tanh();
        self.curve.clear();
        self.curve.extend((0..CURVE_POINTS).map(|index| {
            let x = index as f32 / (CURVE_POINTS - 1) as f32 * 2.0 - 1.0;
            (drive * x).tanh() / norm
        }));
    }

    #[inline]
    pub fn shape(&self, input: f32) -> f32 {
        let position = (input.clamp(-1.0, 1.0) + 1.0) * 0.5 * (CURVE_POINTS - 1) as f32;
        let index = (position.floor() as usize).min(CURVE_POINTS - 2);
        let fraction = position - index as f32;
        self.curve[index] * (1.0 - fraction) + self.curve[index + 1] * fraction
    }

    /// Writes the shaped version of `input` into `output`.
    pub fn process(&self, input: &[StereoFrame], output: &mut [StereoFrame]) {
        for (out, frame) in output.iter_mut().zip(input) {
            out.left = self.shape(frame.left);
            out.right = self.shape(frame.right);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_is_odd_and_bounded() {
        let shaper = WaveShaper::new(0.6);
        for x in [-2.0, -0.7, -0.1, 0.0, 0.1, 0.7, 2.0] {
            let y = shaper.shape(x);
            assert!(y.abs() <= 1.0 + 1e-6);
            assert!((y + shaper.shape(-x)).abs() < 1e-4);
        }
        assert!((shaper.shape(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn more_excitement_saturates_harder() {
        let gentle = WaveShaper::new(0.0);
        let hot = WaveShaper::new(1.0);
        assert!(hot.shape(0.2) > gentle.shape(0.2));
    }
}
