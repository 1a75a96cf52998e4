use serde::Serialize;

use crate::{
    analysis::AnalysisSample,
    automation::{haas_delay_for_width, ParamId, HARMONIC_BLEND_SCALE},
    chain::SignalChain,
    config::MoodConfig,
    GenreProfile,
};

/// Coarse classification of a sample's energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mood {
    Calm,
    Neutral,
    Energetic,
}

/// Targets for the parameters the mood layer may move. Always derived from
/// the genre baseline, never from previous targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoodTargets {
    pub mood: Mood,
    pub bass_gain: f32,
    pub haas_delay_right: f32,
    pub compressor_ratio: f32,
    pub harmonic_blend: f32,
}

impl MoodTargets {
    /// The genre baseline with no mood adjustment.
    pub fn baseline(profile: &GenreProfile) -> Self {
        Self {
            mood: Mood::Neutral,
            bass_gain: profile.bass.gain,
            haas_delay_right: haas_delay_for_width(profile.spatial_width),
            compressor_ratio: profile.compression_ratio,
            harmonic_blend: profile.harmonic_excitement * HARMONIC_BLEND_SCALE,
        }
    }

    fn params(&self) -> [(ParamId, f32); 4] {
        [
            (ParamId::BassGain, self.bass_gain),
            (ParamId::HaasDelayRight, self.haas_delay_right),
            (ParamId::CompressorRatio, self.compressor_ratio),
            (ParamId::HarmonicBlend, self.harmonic_blend),
        ]
    }
}

/// Fast secondary automation layered on the genre baseline.
#[derive(Debug, Clone)]
pub struct MoodAdaptiveController {
    config: MoodConfig,
    applied: Option<MoodTargets>,
}

impl MoodAdaptiveController {
    pub fn new(config: &MoodConfig) -> Self {
        Self {
            config: config.clone(),
            applied: None,
        }
    }

    pub fn classify(&self, energy: f32) -> Mood {
        if energy < self.config.calm_threshold {
            Mood::Calm
        } else if energy > self.config.energetic_threshold {
            Mood::Energetic
        } else {
            Mood::Neutral
        }
    }

    /// Targets for `sample` relative to `baseline`.
    pub fn evaluate(&self, sample: &AnalysisSample, baseline: &GenreProfile) -> MoodTargets {
        let mut targets = MoodTargets::baseline(baseline);
        targets.mood = self.classify(sample.energy);

        match targets.mood {
            Mood::Calm => {
                targets.bass_gain += self.config.calm_bass_boost;
                targets.haas_delay_right = targets.haas_delay_right.max(self.config.calm_haas_delay);
            }
            Mood::Energetic => {
                targets.compressor_ratio = (baseline.compression_ratio
                    + self.config.energetic_ratio_boost)
                    .min(self.config.energetic_ratio_ceiling);
                targets.harmonic_blend = self.config.energetic_harmonic_blend;
            }
            Mood::Neutral => {}
        }

        targets
    }

    /// Evaluates `sample` and ramps the chain toward the result. Parameters
    /// are only rescheduled when their target changed since the last call, so
    /// a steady mood does not restart ramps every tick.
    pub fn adapt(
        &mut self,
        sample: &AnalysisSample,
        baseline: &GenreProfile,
        chain: &mut SignalChain,
        now: f64,
    ) -> MoodTargets {
        let targets = self.evaluate(sample, baseline);
        let previous = self.applied.unwrap_or_else(|| MoodTargets::baseline(baseline));

        let changed: Vec<(ParamId, f32)> = targets
            .params()
            .into_iter()
            .zip(previous.params())
            .filter(|((_, next), (_, prev))| next != prev)
            .map(|(next, _)| next)
            .collect();

        if !changed.is_empty() && chain.ramp_params(&changed, now, self.config.ramp_ms / 1000.0) {
            if targets.mood != previous.mood {
                tracing::debug!(mood = ?targets.mood, energy = sample.energy, "mood changed");
            }
            self.applied = Some(targets);
        }

        targets
    }

    /// Forgets applied nudges. Called when the genre baseline is reapplied,
    /// which already puts every mood parameter back on its baseline.
    pub fn reset(&mut self) {
        self.applied = None;
    }

    pub fn applied(&self) -> Option<MoodTargets> {
        self.applied
    }
}
