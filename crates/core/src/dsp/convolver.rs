//! Early-reflection stage: FFT overlap-add convolution with a short
//! synthesised impulse.

use std::{fmt, sync::Arc};

use rand::{rngs::StdRng, Rng, SeedableRng};
use realfft::{num_complex::Complex32, ComplexToReal, RealFftPlanner, RealToComplex};

use crate::{EngineError, Result, StereoFrame};

/// Length of the synthesised impulse.
pub const IMPULSE_SECONDS: f32 = 0.15;
/// Exponent of the `(1 - t)^n` decay envelope.
const IMPULSE_DECAY: f32 = 2.0;

/// Builds a decaying stereo noise burst, normalised to unit energy per
/// channel. The same seed always yields the same impulse.
pub fn synthesize_impulse(sample_rate: u32, seconds: f32, seed: u64) -> [Vec<f32>; 2] {
    let len = ((sample_rate as f32 * seconds).round() as usize).max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut channels = [vec![0.0; len], vec![0.0; len]];

    for channel in channels.iter_mut() {
        for (index, sample) in channel.iter_mut().enumerate() {
            let t = index as f32 / len as f32;
            *sample = rng.random_range(-1.0_f32..1.0) * (1.0 - t).powf(IMPULSE_DECAY);
        }

        let energy: f32 = channel.iter().map(|value| value * value).sum();
        if energy > 0.0 {
            let scale = energy.sqrt().recip();
            channel.iter_mut().for_each(|value| *value *= scale);
        }
    }

    channels
}

struct ChannelState {
    kernel: Vec<Complex32>,
    overlap: Vec<f32>,
}

/// Stereo convolver: left input with the left impulse, right with right.
pub struct Convolver {
    max_block: usize,
    fft_size: usize,
    impulse_len: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    channels: [ChannelState; 2],
    time: Vec<f32>,
    spectrum: Vec<Complex32>,
    forward_scratch: Vec<Complex32>,
    inverse_scratch: Vec<Complex32>,
}

impl Convolver {
    /// Prepares the kernels for blocks of up to `max_block` frames.
    pub fn new(impulse: [Vec<f32>; 2], max_block: usize) -> Result<Self> {
        if max_block == 0 {
            return Err(EngineError::InvalidInput("convolver block size must be positive"));
        }
        let impulse_len = impulse[0].len().max(impulse[1].len()).max(1);
        let fft_size = (max_block + impulse_len - 1).next_power_of_two();

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let mut time = forward.make_input_vec();
        let mut spectrum = forward.make_output_vec();
        let mut forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = inverse.make_scratch_vec();

        let mut build_channel = |samples: &[f32]| -> Result<ChannelState> {
            time.fill(0.0);
            time[..samples.len()].copy_from_slice(samples);
            forward.process_with_scratch(&mut time, &mut spectrum, &mut forward_scratch)?;
            Ok(ChannelState {
                kernel: spectrum.clone(),
                overlap: vec![0.0; fft_size],
            })
        };
        let [left, right] = impulse;
        let channels = [build_channel(&left)?, build_channel(&right)?];

        Ok(Self {
            max_block,
            fft_size,
            impulse_len,
            forward,
            inverse,
            channels,
            time,
            spectrum,
            forward_scratch,
            inverse_scratch,
        })
    }

    pub fn impulse_len(&self) -> usize {
        self.impulse_len
    }

    /// Writes the wet signal for `input` into `output`. Both slices must have
    /// the same length; any length is accepted and split internally.
    pub fn process(&mut self, input: &[StereoFrame], output: &mut [StereoFrame]) -> Result<()> {
        if input.len() != output.len() {
            return Err(EngineError::InvalidInput("convolver buffers differ in length"));
        }

        let scale = (self.fft_size as f32).recip();
        let last = self.spectrum.len() - 1;

        for start in (0..input.len()).step_by(self.max_block) {
            let end = (start + self.max_block).min(input.len());
            let frames = end - start;

            for (channel, state) in self.channels.iter_mut().enumerate() {
                self.time.fill(0.0);
                for (slot, frame) in self.time.iter_mut().zip(&input[start..end]) {
                    *slot = if channel == 0 { frame.left } else { frame.right };
                }

                self.forward.process_with_scratch(
                    &mut self.time,
                    &mut self.spectrum,
                    &mut self.forward_scratch,
                )?;
                for (bin, kernel) in self.spectrum.iter_mut().zip(&state.kernel) {
                    *bin *= *kernel;
                }
                self.spectrum[0].im = 0.0;
                self.spectrum[last].im = 0.0;
                self.inverse.process_with_scratch(
                    &mut self.spectrum,
                    &mut self.time,
                    &mut self.inverse_scratch,
                )?;

                for (acc, value) in state.overlap.iter_mut().zip(&self.time) {
                    *acc += value * scale;
                }
                for (frame, value) in output[start..end].iter_mut().zip(&state.overlap) {
                    if channel == 0 {
                        frame.left = *value;
                    } else {
                        frame.right = *value;
                    }
                }
                state.overlap.copy_within(frames.., 0);
                let tail = self.fft_size - frames;
                state.overlap[tail..].fill(0.0);
            }
        }

        Ok(())
    }

    pub fn reset(&mut self) {
        for state in &mut self.channels {
            state.overlap.fill(0.0);
        }
    }
}

impl fmt::Debug for Convolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Convolver")
            .field("max_block", &self.max_block)
            .field("fft_size", &self.fft_size)
            .field("impulse_len", &self.impulse_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn impulse_is_deterministic_and_decays() {
        let a = synthesize_impulse(48_000, IMPULSE_SECONDS, 7);
        let b = synthesize_impulse(48_000, IMPULSE_SECONDS, 7);
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 7_200);

        let head: f32 = a[0][..720].iter().map(|v| v * v).sum();
        let tail: f32 = a[0][6_480..].iter().map(|v| v * v).sum();
        assert!(head > tail * 10.0);

        let energy: f32 = a[1].iter().map(|v| v * v).sum();
        assert_abs_diff_eq!(energy, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn tail_carries_across_block_boundaries() {
        let impulse = vec![0.5, 0.25, 0.125, 0.0625, 0.031_25];
        let mut convolver = Convolver::new([impulse.clone(), impulse.clone()], 4).unwrap();

        let mut collected = Vec::new();
        for block in 0..3 {
            let mut input = vec![StereoFrame::SILENCE; 4];
            if block == 0 {
                input[0] = StereoFrame::mono(1.0);
            }
            let mut output = vec![StereoFrame::SILENCE; 4];
            convolver.process(&input, &mut output).unwrap();
            collected.extend(output.iter().map(|frame| frame.left));
        }

        for (index, expected) in impulse.iter().enumerate() {
            assert_abs_diff_eq!(collected[index], *expected, epsilon = 1e-5);
        }
        assert!(collected[5..].iter().all(|value| value.abs() < 1e-5));
    }

    #[test]
    fn oversized_blocks_are_split() {
        let mut convolver = Convolver::new([vec![1.0], vec![-1.0]], 3).unwrap();
        let input: Vec<_> = (0..10).map(|i| StereoFrame::mono(i as f32)).collect();
        let mut output = vec![StereoFrame::SILENCE; 10];
        convolver.process(&input, &mut output).unwrap();

        for (index, frame) in output.iter().enumerate() {
            assert_abs_diff_eq!(frame.left, index as f32, epsilon = 1e-4);
            assert_abs_diff_eq!(frame.right, -(index as f32), epsilon = 1e-4);
        }
    }

    #[test]
    fn mismatched_buffers_are_rejected() {
        let mut convolver = Convolver::new([vec![1.0], vec![1.0]], 4).unwrap();
        let mut output = vec![StereoFrame::SILENCE; 3];
        assert!(convolver
            .process(&[StereoFrame::SILENCE; 4], &mut output)
            .is_err());
    }
}
