use std::{
    fmt,
    ops::{Add, AddAssign, Mul},
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{config::AudioConfig, EngineError, Result};

/// One stereo sample pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StereoFrame {
    pub left: f32,
    pub right: f32,
}

impl StereoFrame {
    pub const SILENCE: Self = Self {
        left: 0.0,
        right: 0.0,
    };

    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn mono(value: f32) -> Self {
        Self::new(value, value)
    }

    /// Average of both channels.
    pub fn mid(self) -> f32 {
        (self.left + self.right) * 0.5
    }
}

impl Add for StereoFrame {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.left + rhs.left, self.right + rhs.right)
    }
}

impl AddAssign for StereoFrame {
    fn add_assign(&mut self, rhs: Self) {
        self.left += rhs.left;
        self.right += rhs.right;
    }
}

impl Mul<f32> for StereoFrame {
    type Output = Self;

    fn mul(self, gain: f32) -> Self {
        Self::new(self.left * gain, self.right * gain)
    }
}

/// Process-unique identity of an [`AudioContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Lifecycle of an audio context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created but not yet unlocked by a user gesture. Renders silence.
    Suspended,
    Running,
    Closed,
}

/// Sample clock and lifecycle of the processing context the signal chain
/// lives in.
#[derive(Debug)]
pub struct AudioContext {
    id: ContextId,
    sample_rate: u32,
    block_size: usize,
    frames_rendered: u64,
    state: ContextState,
}

impl AudioContext {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            id: ContextId::next(),
            sample_rate,
            block_size,
            frames_rendered: 0,
            state: ContextState::Suspended,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Context time in seconds, derived from the number of rendered frames.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Unlocks the context. Calling it on a running context is a no-op.
    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            ContextState::Suspended => {
                self.state = ContextState::Running;
                tracing::info!(context = %self.id, "audio context resumed");
                Ok(())
            }
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(EngineError::EngineUnavailable(
                "audio context has been closed".to_string(),
            )),
        }
    }

    pub fn suspend(&mut self) {
        if self.state == ContextState::Running {
            self.state = ContextState::Suspended;
        }
    }

    pub fn close(&mut self) {
        self.state = ContextState::Closed;
    }

    pub fn is_running(&self) -> bool {
        self.state == ContextState::Running
    }

    /// Advances the clock after a block has been rendered.
    pub(crate) fn advance(&mut self, frames: usize) {
        self.frames_rendered += frames as u64;
    }
}

/// Seam between the engine and whatever provides the audio context.
pub trait AudioBackend {
    /// Opens a new processing context. Failure means the engine must fall back
    /// to undecorated playback.
    fn open_context(&self, config: &AudioConfig) -> Result<AudioContext>;
}

/// Lowest sample rate a backend will open a context at.
pub const MIN_SAMPLE_RATE: u32 = 1_000;

/// Deterministic backend whose clock advances only when the host renders.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineBackend;

impl AudioBackend for OfflineBackend {
    fn open_context(&self, config: &AudioConfig) -> Result<AudioContext> {
        if config.sample_rate < MIN_SAMPLE_RATE {
            return Err(EngineError::EngineUnavailable(format!(
                "sample rate {} Hz is below {MIN_SAMPLE_RATE} Hz",
                config.sample_rate
            )));
        }
        if config.block_size == 0 {
            return Err(EngineError::EngineUnavailable(
                "block size must be positive".to_string(),
            ));
        }

        Ok(AudioContext::new(config.sample_rate, config.block_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts_start_suspended_and_resume_idempotently() {
        let mut context = OfflineBackend
            .open_context(&AudioConfig::default())
            .unwrap();
        assert_eq!(context.state(), ContextState::Suspended);

        context.resume().unwrap();
        context.resume().unwrap();
        assert!(context.is_running());

        context.close();
        assert!(matches!(
            context.resume(),
            Err(EngineError::EngineUnavailable(_))
        ));
    }

    #[test]
    fn clock_follows_rendered_frames() {
        let mut context = AudioContext::new(1_000, 100);
        context.advance(250);
        assert!((context.current_time() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn offline_backend_rejects_implausible_sample_rates() {
        let config = AudioConfig {
            sample_rate: 16,
            block_size: 128,
        };
        assert!(matches!(
            OfflineBackend.open_context(&config),
            Err(EngineError::EngineUnavailable(_))
        ));
    }

    #[test]
    fn offline_backend_rejects_zero_sample_rate() {
        let config = AudioConfig {
            sample_rate: 0,
            block_size: 128,
        };
        assert!(matches!(
            OfflineBackend.open_context(&config),
            Err(EngineError::EngineUnavailable(_))
        ));
    }

    #[test]
    fn context_ids_are_unique() {
        let a = AudioContext::new(48_000, 128);
        let b = AudioContext::new(48_000, 128);
        assert_ne!(a.id(), b.id());
    }
}
