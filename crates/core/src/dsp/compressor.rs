//! Feed-forward dynamics compressor with a soft knee.

use crate::StereoFrame;

const THRESHOLD_DB: f32 = -24.0;
const KNEE_DB: f32 = 30.0;
/// Levels below this are treated as silence.
const FLOOR_DB: f32 = -120.0;

/// Stereo-linked compressor. The detector follows the louder channel and
/// the gain reduction envelope is shared by both channels.
#[derive(Debug, Clone)]
pub struct Compressor {
    sample_rate: f32,
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current gain reduction in dB (zero or negative).
    envelope_db: f32,
}

impl Compressor {
    pub fn new(sample_rate: u32) -> Self {
        let mut compressor = Self {
            sample_rate: sample_rate as f32,
            threshold_db: THRESHOLD_DB,
            knee_db: KNEE_DB,
            ratio: 1.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope_db: 0.0,
        };
        compressor.set_params(1.0, 0.003, 0.25);
        compressor
    }

    pub fn set_params(&mut self, ratio: f32, attack: f32, release: f32) {
        self.ratio = ratio.clamp(1.0, 20.0);
        self.attack_coeff = time_coefficient(attack, self.sample_rate);
        self.release_coeff = time_coefficient(release, self.sample_rate);
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Static curve: output level in dB for an input level in dB.
    pub fn curve(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold_db;
        let half_knee = self.knee_db * 0.5;
        if over <= -half_knee {
            level_db
        } else if over < half_knee {
            let x = over + half_knee;
            level_db + (1.0 / self.ratio - 1.0) * x * x / (2.0 * self.knee_db)
        } else {
            self.threshold_db + over / self.ratio
        }
    }

    /// Current gain reduction in dB.
    pub fn reduction_db(&self) -> f32 {
        self.envelope_db
    }

    pub fn process(&mut self, buffer: &mut [StereoFrame]) {
        for frame in buffer.iter_mut() {
            let peak = frame.left.abs().max(frame.right.abs());
            let level_db = if peak > 0.0 {
                (20.0 * peak.log10()).max(FLOOR_DB)
            } else {
                FLOOR_DB
            };
            let target = self.curve(level_db) - level_db;

            let coeff = if target < self.envelope_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope_db = coeff * self.envelope_db + (1.0 - coeff) * target;

            let gain = 10.0_f32.powf(self.envelope_db / 20.0);
            frame.left *= gain;
            frame.right *= gain;
        }
    }

    pub fn reset(&mut self) {
        self.envelope_db = 0.0;
    }
}

fn time_coefficient(seconds: f32, sample_rate: f32) -> f32 {
    if seconds <= 0.0 {
        0.0
    } else {
        (-1.0 / (seconds * sample_rate)).exp()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn curve_is_transparent_below_the_knee() {
        let mut compressor = Compressor::new(48_000);
        compressor.set_params(4.0, 0.003, 0.25);
        assert_eq!(compressor.curve(-60.0), -60.0);
    }

    #[test]
    fn curve_applies_ratio_above_the_knee() {
        let mut compressor = Compressor::new(48_000);
        compressor.set_params(4.0, 0.003, 0.25);
        assert_abs_diff_eq!(compressor.curve(0.0), -24.0 + 24.0 / 4.0, epsilon = 1e-5);
    }

    #[test]
    fn unity_ratio_never_reduces_gain() {
        let mut compressor = Compressor::new(48_000);
        let mut buffer = vec![StereoFrame::mono(0.9); 4_800];
        compressor.process(&mut buffer);
        assert_abs_diff_eq!(buffer[4_799].left, 0.9, epsilon = 1e-5);
    }

    #[test]
    fn loud_signal_is_attenuated() {
        let mut compressor = Compressor::new(48_000);
        compressor.set_params(6.0, 0.001, 0.1);
        let mut buffer = vec![StereoFrame::mono(1.0); 4_800];
        compressor.process(&mut buffer);

        assert!(compressor.reduction_db() < -10.0);
        assert!(buffer[4_799].left < 0.3);
    }
}
