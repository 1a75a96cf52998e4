//! Click-free parameter automation.
//!
//! Every automatable stage parameter is an [`AutomationParam`]: a held value
//! plus at most one linear ramp. Scheduling a new ramp replaces the old one and
//! starts from wherever the old one currently is, so there is only ever one
//! intended target per parameter.

use serde::Serialize;

use crate::{config::AutomationConfig, dsp::WaveShaper, GenreProfile};

/// Fixed delay of the first Haas line, in seconds.
pub const HAAS_BASE_DELAY: f32 = 0.000_3;
/// Additional delay of the second Haas line at full stereo width, in seconds.
pub const HAAS_WIDTH_SPAN: f32 = 0.000_7;
/// Harmonic blend gain at full excitement.
pub const HARMONIC_BLEND_SCALE: f32 = 0.3;
/// Early reflection send at full spatial depth.
pub const DEPTH_MIX_SCALE: f32 = 0.3;

/// Second Haas delay for a given stereo width.
pub fn haas_delay_for_width(width: f32) -> f32 {
    HAAS_BASE_DELAY + width.clamp(0.0, 1.0) * HAAS_WIDTH_SPAN
}

/// Named automatable parameters of the signal chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParamId {
    BassGain,
    BassFrequency,
    MidGain,
    MidFrequency,
    MidQ,
    HighGain,
    HighFrequency,
    CompressorRatio,
    CompressorAttack,
    CompressorRelease,
    HaasDelayLeft,
    HaasDelayRight,
    DepthMix,
    HarmonicBlend,
    MasterGain,
}

impl ParamId {
    pub const ALL: [ParamId; 15] = [
        ParamId::BassGain,
        ParamId::BassFrequency,
        ParamId::MidGain,
        ParamId::MidFrequency,
        ParamId::MidQ,
        ParamId::HighGain,
        ParamId::HighFrequency,
        ParamId::CompressorRatio,
        ParamId::CompressorAttack,
        ParamId::CompressorRelease,
        ParamId::HaasDelayLeft,
        ParamId::HaasDelayRight,
        ParamId::DepthMix,
        ParamId::HarmonicBlend,
        ParamId::MasterGain,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Value a freshly built chain starts from.
    pub fn default_value(self) -> f32 {
        match self {
            ParamId::MasterGain => 1.0,
            ParamId::BassGain | ParamId::MidGain | ParamId::HighGain => 0.0,
            ParamId::BassFrequency => 100.0,
            ParamId::MidFrequency => 1_000.0,
            ParamId::MidQ => 1.0,
            ParamId::HighFrequency => 8_000.0,
            ParamId::CompressorRatio => 1.0,
            ParamId::CompressorAttack => 0.003,
            ParamId::CompressorRelease => 0.25,
            ParamId::HaasDelayLeft => HAAS_BASE_DELAY,
            ParamId::HaasDelayRight => 0.000_5,
            ParamId::DepthMix | ParamId::HarmonicBlend => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    start_time: f64,
    start_value: f32,
    end_time: f64,
    target: f32,
}

impl Ramp {
    fn value_at(&self, time: f64) -> f32 {
        if time <= self.start_time {
            self.start_value
        } else if time >= self.end_time {
            self.target
        } else {
            let progress = ((time - self.start_time) / (self.end_time - self.start_time)) as f32;
            self.start_value + (self.target - self.start_value) * progress
        }
    }
}

/// A parameter holding either a fixed value or a single linear ramp.
///
/// A ramp scheduled for a later start leaves the current trajectory (`lead`)
/// in effect until it begins.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationParam {
    value: f32,
    lead: Option<Ramp>,
    ramp: Option<Ramp>,
}

impl AutomationParam {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            lead: None,
            ramp: None,
        }
    }

    /// Value the parameter has at context time `time`.
    pub fn value_at(&self, time: f64) -> f32 {
        match (self.ramp, self.lead) {
            (Some(ramp), _) if time >= ramp.start_time => ramp.value_at(time),
            (_, Some(lead)) => lead.value_at(time),
            _ => self.value,
        }
    }

    /// Value the parameter is heading for.
    pub fn target(&self) -> f32 {
        self.ramp.map(|ramp| ramp.target).unwrap_or(self.value)
    }

    pub fn is_ramping(&self) -> bool {
        self.ramp.is_some()
    }

    /// Jumps to `value`, cancelling any ramp in flight.
    pub fn set_value(&mut self, value: f32) {
        self.value = value;
        self.lead = None;
        self.ramp = None;
    }

    /// Schedules a linear ramp that starts at `start` from the value the
    /// parameter has at that instant and reaches `target` after `duration`.
    /// Any previous ramp is superseded from `start` on; before `start` the
    /// parameter keeps following it. A ramp that had not begun by `start` is
    /// dropped.
    pub fn ramp_to(&mut self, target: f32, start: f64, duration: f64) {
        let from = self.value_at(start);
        self.lead = match self.ramp {
            Some(ramp) if ramp.start_time <= start => Some(ramp),
            _ => self.lead,
        };
        self.ramp = Some(Ramp {
            start_time: start,
            start_value: from,
            end_time: start + duration.max(0.0),
            target,
        });
    }

    /// Folds a finished ramp into the held value.
    pub fn settle(&mut self, time: f64) {
        let Some(ramp) = self.ramp else {
            return;
        };
        if time >= ramp.start_time {
            self.lead = None;
            self.value = ramp.start_value;
        }
        if time >= ramp.end_time {
            self.value = ramp.target;
            self.ramp = None;
        }
    }
}

/// The full parameter set of one signal chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainParams {
    params: Vec<AutomationParam>,
}

impl ChainParams {
    pub fn new() -> Self {
        Self {
            params: ParamId::ALL
                .iter()
                .map(|id| AutomationParam::new(id.default_value()))
                .collect(),
        }
    }

    pub fn get(&self, id: ParamId) -> &AutomationParam {
        &self.params[id.index()]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut AutomationParam {
        &mut self.params[id.index()]
    }

    pub fn value_at(&self, id: ParamId, time: f64) -> f32 {
        self.get(id).value_at(time)
    }

    pub fn settle(&mut self, time: f64) {
        for param in &mut self.params {
            param.settle(time);
        }
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameter targets a genre profile implies.
pub fn profile_targets(profile: &GenreProfile) -> [(ParamId, f32); 14] {
    [
        (ParamId::BassGain, profile.bass.gain),
        (ParamId::BassFrequency, profile.bass.frequency),
        (ParamId::MidGain, profile.mids.gain),
        (ParamId::MidFrequency, profile.mids.frequency),
        (ParamId::MidQ, profile.mids.q),
        (ParamId::HighGain, profile.highs.gain),
        (ParamId::HighFrequency, profile.highs.frequency),
        (ParamId::CompressorRatio, profile.compression_ratio),
        (ParamId::CompressorAttack, profile.attack),
        (ParamId::CompressorRelease, profile.release),
        (ParamId::HaasDelayLeft, HAAS_BASE_DELAY),
        (ParamId::HaasDelayRight, haas_delay_for_width(profile.spatial_width)),
        (ParamId::DepthMix, profile.spatial_depth * DEPTH_MIX_SCALE),
        (
            ParamId::HarmonicBlend,
            profile.harmonic_excitement * HARMONIC_BLEND_SCALE,
        ),
    ]
}

/// Moves chain parameters toward targets with linear ramps.
#[derive(Debug, Clone)]
pub struct ParameterAutomator {
    ramp_secs: f64,
}

impl ParameterAutomator {
    pub fn new(config: &AutomationConfig) -> Self {
        Self {
            ramp_secs: config.ramp_ms / 1000.0,
        }
    }

    pub fn ramp_secs(&self) -> f64 {
        self.ramp_secs
    }

    /// Ramps every profile-driven parameter to the profile's value over the
    /// configured window starting at `when`, and swaps the shaping curve.
    pub fn apply_profile(
        &self,
        params: &mut ChainParams,
        shaper: &mut WaveShaper,
        profile: &GenreProfile,
        when: f64,
    ) {
        self.schedule(params, &profile_targets(profile), when, self.ramp_secs);
        shaper.set_excitement(profile.harmonic_excitement);
        tracing::debug!(genre = profile.genre, when, "genre profile scheduled");
    }

    /// Shared ramp path for every writer of chain parameters.
    pub fn schedule(
        &self,
        params: &mut ChainParams,
        targets: &[(ParamId, f32)],
        when: f64,
        duration: f64,
    ) {
        for &(id, target) in targets {
            params.get_mut(id).ramp_to(target, when, duration);
        }
    }
}

impl Default for ParameterAutomator {
    fn default() -> Self {
        Self::new(&AutomationConfig::default())
    }
}
