//! The fixed-topology processing graph.
//!
//! ```text
//! input gain -> bass shelf -> mid peak -> high shelf -> compressor
//!   -> channel split -> (left delay, right delay) -> channel merge
//!   -> { dry, early reflections (convolver), harmonic shaper } -> mix
//!   -> master gain -> analysis tap -> destination
//! ```
//!
//! The graph is allocated by [`SignalChain::ensure_built`] exactly once. Genre
//! and mood changes only move parameters.

use serde::Serialize;

use crate::{
    analysis::AnalysisTap,
    audio::{AudioContext, ContextState},
    automation::{ChainParams, ParamId, ParameterAutomator},
    config::EngineConfig,
    dsp::{
        synthesize_impulse, Biquad, Compressor, Convolver, FilterKind, HaasNetwork, WaveShaper,
        IMPULSE_SECONDS,
    },
    EngineError, GenreProfile, Result, StereoFrame,
};

const IMPULSE_SEED: u64 = 0x5f3a_91c7;

/// Processing nodes of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StageKind {
    /// Unity summing point fed by every chain-routed adapter.
    InputGain,
    BassShelf,
    MidPeak,
    HighShelf,
    Compressor,
    ChannelSplit,
    LeftDelay,
    RightDelay,
    ChannelMerge,
    EarlyReflections,
    HarmonicShaper,
    Mix,
    MasterGain,
    AnalysisTap,
    Destination,
}

/// Stage list and connections of a built chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub stages: Vec<StageKind>,
    pub edges: Vec<(StageKind, StageKind)>,
}

impl Topology {
    fn fixed() -> Self {
        use StageKind::*;

        let edges = vec![
            (InputGain, BassShelf),
            (BassShelf, MidPeak),
            (MidPeak, HighShelf),
            (HighShelf, Compressor),
            (Compressor, ChannelSplit),
            (ChannelSplit, LeftDelay),
            (ChannelSplit, RightDelay),
            (LeftDelay, ChannelMerge),
            (RightDelay, ChannelMerge),
            (ChannelMerge, Mix),
            (ChannelMerge, EarlyReflections),
            (ChannelMerge, HarmonicShaper),
            (EarlyReflections, Mix),
            (HarmonicShaper, Mix),
            (Mix, MasterGain),
            (MasterGain, AnalysisTap),
            (AnalysisTap, Destination),
        ];
        let stages = vec![
            InputGain,
            BassShelf,
            MidPeak,
            HighShelf,
            Compressor,
            ChannelSplit,
            LeftDelay,
            RightDelay,
            ChannelMerge,
            EarlyReflections,
            HarmonicShaper,
            Mix,
            MasterGain,
            AnalysisTap,
            Destination,
        ];

        Self { stages, edges }
    }

    /// Position of `stage` in processing order.
    pub fn position(&self, stage: StageKind) -> Option<usize> {
        self.stages.iter().position(|kind| *kind == stage)
    }
}

/// Every stage object of a built chain plus its scratch buffers.
#[derive(Debug)]
pub struct ChainStages {
    sample_rate: u32,
    topology: Topology,
    params: ChainParams,
    bass: Biquad,
    mids: Biquad,
    highs: Biquad,
    compressor: Compressor,
    haas: HaasNetwork,
    reflections: Convolver,
    shaper: WaveShaper,
    tap: AnalysisTap,
    wet: Vec<StereoFrame>,
    harmonics: Vec<StereoFrame>,
}

impl ChainStages {
    fn build(context: &AudioContext, config: &EngineConfig) -> Result<Self> {
        let sample_rate = context.sample_rate();
        let impulse = synthesize_impulse(sample_rate, IMPULSE_SECONDS, IMPULSE_SEED);
        let block = context.block_size();

        Ok(Self {
            sample_rate,
            topology: Topology::fixed(),
            params: ChainParams::new(),
            bass: Biquad::new(FilterKind::LowShelf, sample_rate),
            mids: Biquad::new(FilterKind::Peaking, sample_rate),
            highs: Biquad::new(FilterKind::HighShelf, sample_rate),
            compressor: Compressor::new(sample_rate),
            haas: HaasNetwork::new(sample_rate),
            reflections: Convolver::new(impulse, block)?,
            shaper: WaveShaper::new(0.0),
            tap: AnalysisTap::new(config.analysis.fft_size),
            wet: vec![StereoFrame::SILENCE; block],
            harmonics: vec![StereoFrame::SILENCE; block],
        })
    }

    /// Runs one block through every stage. `time` is the context time of the
    /// first frame; parameters are sampled once per block.
    fn process(&mut self, buffer: &mut [StereoFrame], time: f64) {
        let p = &self.params;
        self.bass.set_params(
            p.value_at(ParamId::BassFrequency, time),
            1.0,
            p.value_at(ParamId::BassGain, time),
        );
        self.mids.set_params(
            p.value_at(ParamId::MidFrequency, time),
            p.value_at(ParamId::MidQ, time),
            p.value_at(ParamId::MidGain, time),
        );
        self.highs.set_params(
            p.value_at(ParamId::HighFrequency, time),
            1.0,
            p.value_at(ParamId::HighGain, time),
        );
        self.compressor.set_params(
            p.value_at(ParamId::CompressorRatio, time),
            p.value_at(ParamId::CompressorAttack, time),
            p.value_at(ParamId::CompressorRelease, time),
        );
        self.haas.set_delays(
            p.value_at(ParamId::HaasDelayLeft, time),
            p.value_at(ParamId::HaasDelayRight, time),
        );
        let depth_mix = p.value_at(ParamId::DepthMix, time);
        let harmonic_blend = p.value_at(ParamId::HarmonicBlend, time);
        let master = p.value_at(ParamId::MasterGain, time);

        self.bass.process(buffer);
        self.mids.process(buffer);
        self.highs.process(buffer);
        self.compressor.process(buffer);
        self.haas.process(buffer);

        if self.wet.len() < buffer.len() {
            self.wet.resize(buffer.len(), StereoFrame::SILENCE);
            self.harmonics.resize(buffer.len(), StereoFrame::SILENCE);
        }
        let wet = &mut self.wet[..buffer.len()];
        let harmonics = &mut self.harmonics[..buffer.len()];

        if let Err(err) = self.reflections.process(buffer, wet) {
            tracing::error!(error = %err, "early reflection stage failed; dropping wet signal");
            wet.fill(StereoFrame::SILENCE);
        }
        self.shaper.process(buffer, harmonics);

        for ((frame, wet), harmonic) in buffer.iter_mut().zip(wet.iter()).zip(harmonics.iter()) {
            *frame = (*frame + *wet * depth_mix + *harmonic * harmonic_blend) * master;
        }

        self.tap.capture(buffer);
        self.params.settle(time);
    }
}

/// Build state of the chain.
#[derive(Debug)]
pub enum ChainState {
    Uninitialized,
    Ready(Box<ChainStages>),
}

/// Owner of the processing graph and its automation.
#[derive(Debug)]
pub struct SignalChain {
    state: ChainState,
    automator: ParameterAutomator,
    builds: usize,
}

impl SignalChain {
    pub fn new(automator: ParameterAutomator) -> Self {
        Self {
            state: ChainState::Uninitialized,
            automator,
            builds: 0,
        }
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ChainState::Ready(_))
    }

    /// Number of times the graph has been allocated. Repeated `ensure_built`
    /// calls do not add to it; only a rebuild after `teardown` does.
    pub fn build_count(&self) -> usize {
        self.builds
    }

    /// Allocates and wires the graph unless it already exists.
    pub fn ensure_built(&mut self, context: &AudioContext, config: &EngineConfig) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        if context.state() == ContextState::Closed {
            return Err(EngineError::EngineUnavailable(
                "cannot build the signal chain on a closed context".to_string(),
            ));
        }

        let stages = ChainStages::build(context, config).map_err(|err| {
            EngineError::EngineUnavailable(format!("signal chain construction failed: {err}"))
        })?;
        self.state = ChainState::Ready(Box::new(stages));
        self.builds += 1;
        tracing::info!(context = %context.id(), sample_rate = context.sample_rate(), "signal chain built");
        Ok(())
    }

    /// Ramps toward a genre profile starting at `when`. Returns `false` when
    /// the chain has not been built.
    pub fn set_genre(&mut self, profile: &GenreProfile, when: f64) -> bool {
        match &mut self.state {
            ChainState::Ready(stages) => {
                let stages = stages.as_mut();
                self.automator
                    .apply_profile(&mut stages.params, &mut stages.shaper, profile, when);
                true
            }
            ChainState::Uninitialized => false,
        }
    }

    /// Ramps the given parameters over `duration` through the same
    /// superseding path the genre automation uses.
    pub fn ramp_params(&mut self, targets: &[(ParamId, f32)], when: f64, duration: f64) -> bool {
        match &mut self.state {
            ChainState::Ready(stages) => {
                self.automator
                    .schedule(&mut stages.params, targets, when, duration);
                true
            }
            ChainState::Uninitialized => false,
        }
    }

    /// Sets the master output gain without a ramp.
    pub fn set_master_volume(&mut self, volume: f32) {
        if let ChainState::Ready(stages) = &mut self.state {
            stages
                .params
                .get_mut(ParamId::MasterGain)
                .set_value(volume.clamp(0.0, 1.0));
        }
    }

    pub fn param_value(&self, id: ParamId, time: f64) -> Option<f32> {
        match &self.state {
            ChainState::Ready(stages) => Some(stages.params.value_at(id, time)),
            ChainState::Uninitialized => None,
        }
    }

    pub fn param_target(&self, id: ParamId) -> Option<f32> {
        match &self.state {
            ChainState::Ready(stages) => Some(stages.params.get(id).target()),
            ChainState::Uninitialized => None,
        }
    }

    pub fn topology(&self) -> Option<&Topology> {
        match &self.state {
            ChainState::Ready(stages) => Some(&stages.topology),
            ChainState::Uninitialized => None,
        }
    }

    pub fn tap(&self) -> Option<&AnalysisTap> {
        match &self.state {
            ChainState::Ready(stages) => Some(&stages.tap),
            ChainState::Uninitialized => None,
        }
    }

    pub fn harmonic_excitement(&self) -> Option<f32> {
        match &self.state {
            ChainState::Ready(stages) => Some(stages.shaper.excitement()),
            ChainState::Uninitialized => None,
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        match &self.state {
            ChainState::Ready(stages) => Some(stages.sample_rate),
            ChainState::Uninitialized => None,
        }
    }

    /// Processes `buffer` in place. An unbuilt chain passes audio through.
    pub fn process(&mut self, buffer: &mut [StereoFrame], time: f64) {
        if let ChainState::Ready(stages) = &mut self.state {
            stages.process(buffer, time);
        }
    }

    /// Releases every stage.
    pub fn teardown(&mut self) {
        if self.is_ready() {
            tracing::info!("signal chain torn down");
        }
        self.state = ChainState::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::GenreProfileStore;

    fn built_chain() -> (SignalChain, AudioContext) {
        let context = AudioContext::new(48_000, 256);
        let mut chain = SignalChain::new(ParameterAutomator::default());
        chain.ensure_built(&context, &EngineConfig::default()).unwrap();
        (chain, context)
    }

    #[test]
    fn ensure_built_is_idempotent() {
        let (mut chain, context) = built_chain();
        chain.ensure_built(&context, &EngineConfig::default()).unwrap();
        chain.ensure_built(&context, &EngineConfig::default()).unwrap();
        assert_eq!(chain.build_count(), 1);
    }

    #[test]
    fn closed_context_is_unavailable() {
        let mut context = AudioContext::new(48_000, 256);
        context.close();
        let mut chain = SignalChain::new(ParameterAutomator::default());
        assert!(matches!(
            chain.ensure_built(&context, &EngineConfig::default()),
            Err(EngineError::EngineUnavailable(_))
        ));
        assert!(!chain.is_ready());
    }

    #[test]
    fn wiring_keeps_the_documented_order() {
        let (chain, _) = built_chain();
        let topology = chain.topology().unwrap();
        let order = [
            StageKind::InputGain,
            StageKind::BassShelf,
            StageKind::Compressor,
            StageKind::EarlyReflections,
            StageKind::Mix,
            StageKind::AnalysisTap,
            StageKind::Destination,
        ];
        let positions: Vec<_> = order
            .iter()
            .map(|stage| topology.position(*stage).unwrap())
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(
            topology.position(StageKind::HarmonicShaper).unwrap()
                < topology.position(StageKind::Mix).unwrap()
        );
        for (from, to) in &topology.edges {
            assert!(topology.position(*from).unwrap() < topology.position(*to).unwrap());
        }
    }

    #[test]
    fn genre_changes_leave_topology_untouched() {
        let (mut chain, _) = built_chain();
        let before = chain.topology().unwrap().clone();
        let store = GenreProfileStore::builtin();

        for (step, profile) in store.iter().enumerate() {
            chain.set_genre(profile, step as f64 * 0.1);
        }

        assert_eq!(chain.topology().unwrap(), &before);
        assert_eq!(chain.build_count(), 1);
    }

    #[test]
    fn set_genre_swaps_curve_and_ramps_parameters() {
        let (mut chain, _) = built_chain();
        let afro = GenreProfileStore::builtin().get("afro").unwrap();
        assert!(chain.set_genre(afro, 0.0));

        assert_eq!(chain.harmonic_excitement(), Some(afro.harmonic_excitement));
        let bass = |time| chain.param_value(ParamId::BassGain, time).unwrap();
        assert_abs_diff_eq!(bass(0.25), 1.75, epsilon = 1e-5);
        assert_abs_diff_eq!(bass(0.5), 3.5, epsilon = 1e-6);
    }

    #[test]
    fn master_volume_is_clamped_and_immediate() {
        let (mut chain, _) = built_chain();
        chain.set_master_volume(1.7);
        assert_eq!(chain.param_value(ParamId::MasterGain, 0.0), Some(1.0));
        chain.set_master_volume(-0.2);
        assert_eq!(chain.param_value(ParamId::MasterGain, 0.0), Some(0.0));
    }

    #[test]
    fn processing_feeds_the_analysis_tap() {
        let (mut chain, _) = built_chain();
        let mut buffer = vec![StereoFrame::mono(0.25); 256];
        chain.process(&mut buffer, 0.0);

        let mut snapshot = vec![0.0; 256];
        chain.tap().unwrap().snapshot(&mut snapshot);
        assert!(snapshot.iter().any(|value| value.abs() > 0.0));
    }

    #[test]
    fn muted_master_silences_output() {
        let (mut chain, _) = built_chain();
        chain.set_master_volume(0.0);
        let mut buffer = vec![StereoFrame::mono(0.5); 256];
        chain.process(&mut buffer, 0.0);
        assert!(buffer.iter().all(|frame| *frame == StereoFrame::SILENCE));
    }

    #[test]
    fn unbuilt_chain_passes_audio_and_has_no_tap() {
        let mut chain = SignalChain::new(ParameterAutomator::default());
        let mut buffer = vec![StereoFrame::mono(0.5); 8];
        chain.process(&mut buffer, 0.0);

        assert!(buffer.iter().all(|frame| *frame == StereoFrame::mono(0.5)));
        assert!(chain.tap().is_none());
        assert!(!chain.set_genre(GenreProfileStore::builtin().get("pop").unwrap(), 0.0));
    }

    #[test]
    fn teardown_releases_stages() {
        let (mut chain, _) = built_chain();
        chain.teardown();
        assert!(!chain.is_ready());
        assert!(chain.topology().is_none());
    }

    #[test]
    fn rebuild_after_teardown_counts_as_a_new_build() {
        let (mut chain, context) = built_chain();
        let config = EngineConfig::default();
        chain.ensure_built(&context, &config).unwrap();
        assert_eq!(chain.build_count(), 1);

        chain.teardown();
        chain.ensure_built(&context, &config).unwrap();
        assert_eq!(chain.build_count(), 2);
    }
}
