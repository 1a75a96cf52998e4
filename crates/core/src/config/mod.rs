use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub automation: AutomationConfig,
    pub analysis: AnalysisConfig,
    pub mood: MoodConfig,
    pub crossfade: CrossfadeConfig,
    pub display: DisplayConfig,
}

impl EngineConfig {
    /// Reads a JSON configuration file. Missing sections fall back to their
    /// defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Largest block the host will ask the engine to render at once.
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 512,
        }
    }
}

/// Genre-level parameter automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub ramp_ms: f64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self { ramp_ms: 500.0 }
    }
}

/// Spectrum analysis settings. `fft_size / 2` frequency bins are produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Tempo heuristic: `tempo_base + energy * tempo_span`.
    pub tempo_base: f32,
    pub tempo_span: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            tempo_base: 60.0,
            tempo_span: 80.0,
        }
    }
}

/// Thresholds and targets for the mood layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodConfig {
    pub calm_threshold: f32,
    pub energetic_threshold: f32,
    pub ramp_ms: f64,
    /// Extra bass gain (dB) applied on calm passages.
    pub calm_bass_boost: f32,
    /// Second Haas delay (seconds) used on calm passages.
    pub calm_haas_delay: f32,
    pub energetic_ratio_boost: f32,
    pub energetic_ratio_ceiling: f32,
    pub energetic_harmonic_blend: f32,
}

impl Default for MoodConfig {
    fn default() -> Self {
        Self {
            calm_threshold: 0.3,
            energetic_threshold: 0.7,
            ramp_ms: 100.0,
            calm_bass_boost: 1.0,
            calm_haas_delay: 0.001,
            energetic_ratio_boost: 1.0,
            energetic_ratio_ceiling: 6.0,
            energetic_harmonic_blend: 0.25,
        }
    }
}

/// Gapless transition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossfadeConfig {
    pub enabled: bool,
    pub duration_ms: u32,
    pub steps: u32,
    /// Seconds before a track's end at which the proactive trigger fires.
    pub trigger_threshold_secs: f64,
}

impl CrossfadeConfig {
    pub fn step_interval_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0 / self.steps.max(1) as f64
    }
}

impl Default for CrossfadeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_ms: 2_000,
            steps: 20,
            trigger_threshold_secs: 2.0,
        }
    }
}

/// Display refresh cadence used by hosts that drive ticks from rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub tick_interval_secs: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1.0 / 60.0,
        }
    }
}
