//! Sub-millisecond delay lines for the Haas widening network.

use crate::StereoFrame;

/// Longest delay the lines are allocated for, in seconds.
const MAX_DELAY_SECONDS: f32 = 0.01;

/// Single-channel delay line with linear interpolation between samples.
#[derive(Debug, Clone)]
pub struct FractionalDelay {
    buffer: Vec<f32>,
    write_pos: usize,
    delay_samples: f32,
    sample_rate: f32,
}

impl FractionalDelay {
    pub fn new(sample_rate: u32) -> Self {
        let size = (MAX_DELAY_SECONDS * sample_rate as f32).ceil() as usize + 2;
        Self {
            buffer: vec![0.0; size],
            write_pos: 0,
            delay_samples: 0.0,
            sample_rate: sample_rate as f32,
        }
    }

    pub fn set_delay(&mut self, seconds: f32) {
        let max = (self.buffer.len() - 2) as f32;
        self.delay_samples = (seconds * self.sample_rate).clamp(0.0, max);
    }

    pub fn delay_seconds(&self) -> f32 {
        self.delay_samples / self.sample_rate
    }

    #[inline]
    pub fn tick(&mut self, input: f32) -> f32 {
        let len = self.buffer.len();
        self.buffer[self.write_pos] = input;

        let whole = self.delay_samples.floor() as usize;
        let fraction = self.delay_samples - whole as f32;
        let newer = (self.write_pos + len - whole) % len;
        let older = (newer + len - 1) % len;
        let output = self.buffer[newer] * (1.0 - fraction) + self.buffer[older] * fraction;

        self.write_pos = (self.write_pos + 1) % len;
        output
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Channel splitter, one delay line per channel, channel merger.
#[derive(Debug, Clone)]
pub struct HaasNetwork {
    left: FractionalDelay,
    right: FractionalDelay,
}

impl HaasNetwork {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            left: FractionalDelay::new(sample_rate),
            right: FractionalDelay::new(sample_rate),
        }
    }

    pub fn set_delays(&mut self, left: f32, right: f32) {
        self.left.set_delay(left);
        self.right.set_delay(right);
    }

    pub fn delays(&self) -> (f32, f32) {
        (self.left.delay_seconds(), self.right.delay_seconds())
    }

    pub fn process(&mut self, buffer: &mut [StereoFrame]) {
        for frame in buffer.iter_mut() {
            frame.left = self.left.tick(frame.left);
            frame.right = self.right.tick(frame.right);
        }
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}
