//! Shelving and peaking equaliser bands (RBJ audio EQ cookbook).

use std::f32::consts::PI;

use crate::StereoFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowShelf,
    Peaking,
    HighShelf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };
}

/// Stereo second-order filter in transposed direct form II.
#[derive(Debug, Clone)]
pub struct Biquad {
    kind: FilterKind,
    sample_rate: f32,
    coefficients: Coefficients,
    /// Last (frequency, q, gain) the coefficients were computed for.
    design: Option<(f32, f32, f32)>,
    z1: [f32; 2],
    z2: [f32; 2],
}

impl Biquad {
    pub fn new(kind: FilterKind, sample_rate: u32) -> Self {
        Self {
            kind,
            sample_rate: sample_rate as f32,
            coefficients: Coefficients::IDENTITY,
            design: None,
            z1: [0.0; 2],
            z2: [0.0; 2],
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Recomputes coefficients when any design parameter changed. `q` is
    /// ignored by the shelving kinds, which use a unit slope.
    pub fn set_params(&mut self, frequency: f32, q: f32, gain_db: f32) {
        let nyquist = self.sample_rate * 0.5;
        // `clamp` would panic when the Nyquist limit falls below the floor.
        let frequency = frequency.min(nyquist * 0.99).max(10.0);
        let q = q.clamp(0.05, 30.0);
        let design = (frequency, q, gain_db);
        if self.design == Some(design) {
            return;
        }
        self.design = Some(design);

        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * frequency / self.sample_rate;
        let (sin, cos) = w0.sin_cos();

        let (b0, b1, b2, a0, a1, a2) = match self.kind {
            FilterKind::Peaking => {
                let alpha = sin / (2.0 * q);
                (
                    1.0 + alpha * a,
                    -2.0 * cos,
                    1.0 - alpha * a,
                    1.0 + alpha / a,
                    -2.0 * cos,
                    1.0 - alpha / a,
                )
            }
            FilterKind::LowShelf => {
                let shelf = 2.0 * a.sqrt() * sin / 2.0 * std::f32::consts::SQRT_2;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos + shelf),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
                    a * ((a + 1.0) - (a - 1.0) * cos - shelf),
                    (a + 1.0) + (a - 1.0) * cos + shelf,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos),
                    (a + 1.0) + (a - 1.0) * cos - shelf,
                )
            }
            FilterKind::HighShelf => {
                let shelf = 2.0 * a.sqrt() * sin / 2.0 * std::f32::consts::SQRT_2;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos + shelf),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
                    a * ((a + 1.0) + (a - 1.0) * cos - shelf),
                    (a + 1.0) - (a - 1.0) * cos + shelf,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos),
                    (a + 1.0) - (a - 1.0) * cos - shelf,
                )
            }
        };

        self.coefficients = Coefficients {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        };
    }

    #[inline]
    fn tick(&mut self, channel: usize, input: f32) -> f32 {
        let c = self.coefficients;
        let output = c.b0 * input + self.z1[channel];
        self.z1[channel] = c.b1 * input - c.a1 * output + self.z2[channel];
        self.z2[channel] = c.b2 * input - c.a2 * output;
        output
    }

    pub fn process(&mut self, buffer: &mut [StereoFrame]) {
        for frame in buffer.iter_mut() {
            frame.left = self.tick(0, frame.left);
            frame.right = self.tick(1, frame.right);
        }
    }

    /// Magnitude response in dB at `frequency`.
    pub fn response_db(&self, frequency: f32) -> f32 {
        let c = self.coefficients;
        let w = 2.0 * PI * frequency / self.sample_rate;
        let (s1, c1) = w.sin_cos();
        let (s2, c2) = (2.0 * w).sin_cos();
        let num_re = c.b0 + c.b1 * c1 + c.b2 * c2;
        let num_im = -(c.b1 * s1 + c.b2 * s2);
        let den_re = 1.0 + c.a1 * c1 + c.a2 * c2;
        let den_im = -(c.a1 * s1 + c.a2 * s2);
        let num = (num_re * num_re + num_im * num_im).sqrt();
        let den = (den_re * den_re + den_im * den_im).sqrt();
        20.0 * (num / den).log10()
    }

    pub fn reset(&mut self) {
        self.z1 = [0.0; 2];
        self.z2 = [0.0; 2];
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn low_shelf_boosts_below_cutoff_only() {
        let mut filter = Biquad::new(FilterKind::LowShelf, 48_000);
        filter.set_params(100.0, 1.0, 6.0);

        assert_abs_diff_eq!(filter.response_db(20.0), 6.0, epsilon = 0.3);
        assert_abs_diff_eq!(filter.response_db(10_000.0), 0.0, epsilon = 0.1);
    }

    #[test]
    fn high_shelf_boosts_above_cutoff_only() {
        let mut filter = Biquad::new(FilterKind::HighShelf, 48_000);
        filter.set_params(4_000.0, 1.0, -4.0);

        assert_abs_diff_eq!(filter.response_db(18_000.0), -4.0, epsilon = 0.3);
        assert_abs_diff_eq!(filter.response_db(50.0), 0.0, epsilon = 0.1);
    }

    #[test]
    fn peaking_band_hits_gain_at_center() {
        let mut filter = Biquad::new(FilterKind::Peaking, 48_000);
        filter.set_params(1_000.0, 1.0, 3.0);
        assert_abs_diff_eq!(filter.response_db(1_000.0), 3.0, epsilon = 0.01);
    }

    #[test]
    fn very_low_sample_rate_does_not_panic() {
        let mut filter = Biquad::new(FilterKind::HighShelf, 8);
        filter.set_params(8_000.0, 1.0, 2.0);

        let mut buffer = vec![StereoFrame::mono(0.5); 4];
        filter.process(&mut buffer);
    }

    #[test]
    fn flat_design_passes_dc_unchanged() {
        let mut filter = Biquad::new(FilterKind::Peaking, 48_000);
        filter.set_params(1_000.0, 1.0, 0.0);

        let mut buffer = vec![StereoFrame::mono(0.5); 256];
        filter.process(&mut buffer);
        assert_abs_diff_eq!(buffer[255].left, 0.5, epsilon = 1e-4);
    }
}
