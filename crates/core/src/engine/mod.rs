//! The owning engine handle and its playback control surface.
//!
//! One [`Engine`] holds every component. The audio context and signal chain
//! are created on the first play request and released by [`Engine::destroy`].
//! All work runs on the caller's thread: hosts call [`Engine::render`] for
//! audio blocks and [`Engine::display_tick`] on display refresh, and both feed
//! the same event queue, which is drained in arrival order.

use std::fmt;

use crate::{
    analysis::{AnalysisSample, SpectrumAnalyzer, Subscription},
    audio::{AudioBackend, AudioContext, ContextState, OfflineBackend},
    automation::ParameterAutomator,
    chain::SignalChain,
    config::EngineConfig,
    crossfade::{CrossfadeScheduler, CrossfadeState, Trigger},
    mixer::MultiSourceInputMixer,
    mood::MoodAdaptiveController,
    session::{PlaybackSessionManager, SourceBinding, Track},
    source::{DefaultLoader, MediaEvent, SourceId, SourceLoader},
    timeline::{EngineEvent, EventQueue, Timers},
    AudioConfig, EngineError, GenreProfile, GenreProfileStore, Result, StereoFrame,
};

pub struct Engine {
    config: EngineConfig,
    backend: Box<dyn AudioBackend>,
    loader: Box<dyn SourceLoader>,
    profiles: GenreProfileStore,
    context: Option<AudioContext>,
    chain: SignalChain,
    analyzer: SpectrumAnalyzer,
    mood: MoodAdaptiveController,
    mixer: MultiSourceInputMixer,
    session: PlaybackSessionManager,
    crossfade: CrossfadeScheduler,
    timers: Timers,
    events: EventQueue,
    genre: Option<&'static GenreProfile>,
    volume: f32,
    degradations: Vec<EngineError>,
    destroyed: bool,
    chain_bus: Vec<StereoFrame>,
    direct_bus: Vec<StereoFrame>,
}

impl Engine {
    /// Engine on the offline backend with the default source loader.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_components(config, Box::new(OfflineBackend), Box::new(DefaultLoader))
    }

    pub fn with_components(
        config: EngineConfig,
        backend: Box<dyn AudioBackend>,
        loader: Box<dyn SourceLoader>,
    ) -> Result<Self> {
        let analyzer = SpectrumAnalyzer::new(&config.analysis)?;

        Ok(Self {
            backend,
            loader,
            profiles: GenreProfileStore::builtin(),
            context: None,
            chain: SignalChain::new(ParameterAutomator::new(&config.automation)),
            analyzer,
            mood: MoodAdaptiveController::new(&config.mood),
            mixer: MultiSourceInputMixer::new(),
            session: PlaybackSessionManager::new(),
            crossfade: CrossfadeScheduler::new(&config.crossfade),
            timers: Timers::new(),
            events: EventQueue::new(),
            genre: None,
            volume: 1.0,
            degradations: Vec::new(),
            destroyed: false,
            chain_bus: Vec::new(),
            direct_bus: Vec::new(),
            config,
        })
    }

    // ---- lifecycle -------------------------------------------------------

    /// Unlocks a suspended context. Hosts call this from a user gesture.
    pub fn resume_context(&mut self) -> Result<()> {
        if !self.is_live("resume_context") {
            return Ok(());
        }
        self.ensure_ready();
        match &mut self.context {
            Some(context) => context.resume(),
            None => Ok(()),
        }
    }

    /// Releases every stage, subscription, timer and binding. Later calls on
    /// the engine are ignored.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        self.cancel_crossfade();
        self.timers.clear_all();
        self.events.clear();
        for binding in self.session.release_bindings() {
            binding.source.borrow_mut().stop();
        }
        self.mixer.unbind_all();
        self.analyzer.clear_subscribers();
        self.chain.teardown();
        if let Some(context) = &mut self.context {
            context.close();
        }
        tracing::info!("engine destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Degradation conditions recorded since the last call.
    pub fn take_degradations(&mut self) -> Vec<EngineError> {
        std::mem::take(&mut self.degradations)
    }

    // ---- control surface -------------------------------------------------

    /// Plays `track`, appending it to the queue when it is not queued yet.
    /// Asking for the active track resumes it. While something is playing the
    /// change goes through a crossfade when crossfading is enabled.
    pub fn play_song(&mut self, track: Track) -> Result<()> {
        if !self.is_live("play_song") {
            return Ok(());
        }
        self.ensure_ready();

        let is_current = self
            .session
            .current_track()
            .map(|current| current.id == track.id)
            .unwrap_or(false);
        if is_current && self.session.active().is_some() {
            self.play();
            return Ok(());
        }

        let index = self.session.locate_or_enqueue(track);
        if self.is_playing() && self.crossfade.is_enabled() {
            self.start_crossfade(index)
        } else {
            self.hard_switch(index)
        }
    }

    pub fn toggle_play(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn play(&mut self) {
        if !self.is_live("play") {
            return;
        }
        self.ensure_ready();

        if self.session.active().is_none() {
            let index = self
                .session
                .current_index()
                .or_else(|| self.session.resolve_next());
            if let Some(index) = index {
                if let Err(err) = self.hard_switch(index) {
                    tracing::warn!(error = %err, "could not start playback");
                }
            }
            return;
        }

        let Some(active) = self.session.active() else {
            return;
        };
        let restarted = active.source.borrow().has_ended();
        active.source.borrow_mut().play();
        if let Some(staged) = self.session.staging() {
            staged.source.borrow_mut().play();
        }
        if restarted {
            self.crossfade.rearm();
        }
    }

    pub fn pause(&mut self) {
        if !self.is_live("pause") {
            return;
        }
        for binding in [self.session.active(), self.session.staging()]
            .into_iter()
            .flatten()
        {
            binding.source.borrow_mut().pause();
        }
    }

    pub fn seek_to(&mut self, seconds: f64) {
        if !self.is_live("seek_to") {
            return;
        }
        let Some(active) = self.session.active() else {
            return;
        };
        active.source.borrow_mut().seek(seconds);
        let position = active.source.borrow().position();
        let duration = self.duration();
        self.crossfade.rearm_before_window(position, duration);
    }

    /// Sets the playback volume in `[0, 1]`. A running crossfade keeps its
    /// progress and rescales both sides.
    pub fn set_volume(&mut self, volume: f32) {
        if !self.is_live("set_volume") || !volume.is_finite() {
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);

        let transition = self.crossfade.transition().copied();
        match (transition, self.crossfade.current_gains(self.volume)) {
            (Some(transition), Some(gains)) => {
                self.mixer.set_gain(transition.from, gains.outgoing);
                self.mixer.set_gain(transition.to, gains.incoming);
            }
            _ => {
                if let Some(active) = self.session.active() {
                    self.mixer.set_gain(active.adapter, self.volume);
                }
            }
        }
    }

    /// Output trim of the signal chain, applied after the mix stage.
    pub fn set_master_output(&mut self, gain: f32) {
        self.chain.set_master_volume(gain);
    }

    pub fn next(&mut self) -> Result<()> {
        if !self.is_live("next") {
            return Ok(());
        }
        self.ensure_ready();
        match self.session.resolve_next() {
            Some(index) => self.switch_to(index),
            None => Ok(()),
        }
    }

    pub fn previous(&mut self) -> Result<()> {
        if !self.is_live("previous") {
            return Ok(());
        }
        self.ensure_ready();
        match self.session.resolve_previous() {
            Some(index) => self.switch_to(index),
            None => Ok(()),
        }
    }

    pub fn add_to_queue(&mut self, track: Track) -> usize {
        self.session.add_to_queue(track)
    }

    pub fn set_crossfade_enabled(&mut self, enabled: bool) {
        self.crossfade.set_enabled(enabled);
    }

    // ---- observables -----------------------------------------------------

    pub fn current_track(&self) -> Option<&Track> {
        self.session.current_track()
    }

    pub fn is_playing(&self) -> bool {
        self.session
            .active()
            .map(|active| active.source.borrow().is_playing())
            .unwrap_or(false)
    }

    /// Playback position of the active track in seconds.
    pub fn current_time(&self) -> f64 {
        self.session
            .active()
            .map(|active| active.source.borrow().position())
            .unwrap_or(0.0)
    }

    /// Duration reported by the active source, or the track's hint.
    pub fn duration(&self) -> Option<f64> {
        let reported = self
            .session
            .active()
            .and_then(|active| active.source.borrow().duration());
        reported.or_else(|| self.current_track().and_then(|track| track.duration_hint))
    }

    pub fn queue(&self) -> &[Track] {
        self.session.queue()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn crossfade_state(&self) -> CrossfadeState {
        self.crossfade.state()
    }

    pub fn context_state(&self) -> Option<ContextState> {
        self.context.as_ref().map(AudioContext::state)
    }

    /// Context time in seconds.
    pub fn context_time(&self) -> f64 {
        self.context
            .as_ref()
            .map(AudioContext::current_time)
            .unwrap_or(0.0)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn chain(&self) -> &SignalChain {
        &self.chain
    }

    pub fn mixer(&self) -> &MultiSourceInputMixer {
        &self.mixer
    }

    pub fn session(&self) -> &PlaybackSessionManager {
        &self.session
    }

    pub fn subscribe_to_analysis(
        &mut self,
        callback: impl FnMut(&AnalysisSample) + 'static,
    ) -> Subscription {
        self.analyzer.subscribe(callback)
    }

    /// Most recent analysis sample.
    pub fn analysis(&self) -> AnalysisSample {
        self.analyzer.latest()
    }

    pub fn current_genre(&self) -> Option<&'static str> {
        self.genre.map(|profile| profile.genre)
    }

    // ---- host driven ticks -----------------------------------------------

    /// Renders the next `out.len()` frames. Produces silence until the
    /// context is running.
    pub fn render(&mut self, out: &mut [StereoFrame]) {
        out.fill(StereoFrame::SILENCE);
        if self.destroyed {
            return;
        }
        let running = self
            .context
            .as_ref()
            .map(AudioContext::is_running)
            .unwrap_or(false);
        if !running {
            return;
        }

        let block = self.config.audio.block_size.max(1);
        for chunk in out.chunks_mut(block) {
            self.render_block(chunk);
        }
    }

    /// Display refresh: analysis runs before mood adaptation.
    pub fn display_tick(&mut self) {
        if self.destroyed {
            return;
        }
        self.events.push(EngineEvent::DisplayTick);
        self.pump();
    }

    // ---- internals -------------------------------------------------------

    fn is_live(&self, operation: &'static str) -> bool {
        if self.destroyed {
            tracing::warn!(operation, "engine destroyed; ignoring call");
        }
        !self.destroyed
    }

    /// Opens the context and builds the chain on first use. Failures leave
    /// the engine on the direct route.
    fn ensure_ready(&mut self) {
        if self.context.is_some() {
            return;
        }

        let context = match self.backend.open_context(&self.config.audio) {
            Ok(context) => context,
            Err(err) => {
                tracing::warn!(error = %err, "audio engine unavailable; playing without processing");
                self.degradations.push(err);
                self.context = Some(Self::fallback_context(&self.config.audio));
                return;
            }
        };

        if let Err(err) = self.chain.ensure_built(&context, &self.config) {
            tracing::warn!(error = %err, "signal chain unavailable; playing without processing");
            self.degradations.push(err);
        }
        self.context = Some(context);
    }

    /// Clock for direct playback when no processing context can be opened.
    /// It is not subject to the autoplay lock, so it starts running.
    fn fallback_context(audio: &AudioConfig) -> AudioContext {
        let defaults = AudioConfig::default();
        let sample_rate = if audio.sample_rate == 0 {
            defaults.sample_rate
        } else {
            audio.sample_rate
        };
        let block_size = if audio.block_size == 0 {
            defaults.block_size
        } else {
            audio.block_size
        };

        let mut context = AudioContext::new(sample_rate, block_size);
        if let Err(err) = context.resume() {
            tracing::error!(error = %err, "fallback clock could not start");
        }
        context
    }

    fn now(&self) -> f64 {
        self.context_time()
    }

    fn render_block(&mut self, out: &mut [StereoFrame]) {
        let Some(context) = self.context.as_ref() else {
            return;
        };
        let (time, sample_rate) = (context.current_time(), context.sample_rate());
        let frames = out.len();

        self.chain_bus.resize(frames, StereoFrame::SILENCE);
        self.direct_bus.resize(frames, StereoFrame::SILENCE);
        self.mixer
            .render(&mut self.chain_bus, &mut self.direct_bus, sample_rate);
        self.chain.process(&mut self.chain_bus, time);
        for ((out, processed), direct) in out
            .iter_mut()
            .zip(self.chain_bus.iter())
            .zip(self.direct_bus.iter())
        {
            *out = *processed + *direct;
        }

        if let Some(context) = &mut self.context {
            context.advance(frames);
        }
        for (source, event) in self.mixer.drain_events() {
            self.events.push(EngineEvent::Media { source, event });
        }
        let now = self.now();
        self.timers.collect_due(now, &mut self.events);
        self.pump();
    }

    fn pump(&mut self) {
        while let Some(event) = self.events.pop() {
            match event {
                EngineEvent::DisplayTick => self.on_display_tick(),
                EngineEvent::CrossfadeStep => self.on_crossfade_step(),
                EngineEvent::Media { source, event } => self.on_media_event(source, event),
            }
        }
    }

    fn on_display_tick(&mut self) {
        let sample = match self.analyzer.tick(self.chain.tap()) {
            Ok(sample) => sample,
            Err(err) => {
                tracing::error!(error = %err, "analysis tick failed");
                return;
            }
        };
        self.analyzer.publish(&sample);

        if let Some(genre) = self.genre {
            let now = self.now();
            self.mood.adapt(&sample, genre, &mut self.chain, now);
        }
    }

    fn on_media_event(&mut self, source: SourceId, event: MediaEvent) {
        let active = self
            .session
            .active()
            .map(|active| active.source.borrow().id());
        if active != Some(source) {
            return;
        }

        match event {
            MediaEvent::MetadataLoaded { duration } => {
                tracing::debug!(%source, ?duration, "metadata loaded");
                self.crossfade.rearm();
            }
            MediaEvent::TimeUpdate { position } => {
                let duration = self.duration();
                if let Some(trigger) = self.crossfade.on_time_update(position, duration) {
                    self.on_track_ending(trigger);
                }
            }
            MediaEvent::Ended => {
                if let Some(trigger) = self.crossfade.on_ended() {
                    self.on_track_ending(trigger);
                }
            }
        }
    }

    fn on_track_ending(&mut self, trigger: Trigger) {
        if self.crossfade.is_busy() {
            tracing::debug!(?trigger, "transition already running");
            return;
        }
        let (Some(current), Some(next)) = (self.session.current_index(), self.session.resolve_next())
        else {
            return;
        };
        if next == current {
            tracing::debug!(?trigger, "no other track queued");
            return;
        }

        tracing::info!(?trigger, next, "advancing to next track");
        let result = if self.crossfade.is_enabled() {
            self.start_crossfade(next)
        } else {
            self.hard_switch(next)
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, "automatic advance failed");
        }
    }

    fn on_crossfade_step(&mut self) {
        let Some(gains) = self.crossfade.step(self.volume) else {
            return;
        };
        if let Some(transition) = self.crossfade.transition().copied() {
            self.mixer.set_gain(transition.from, gains.outgoing);
            self.mixer.set_gain(transition.to, gains.incoming);
        }
        tracing::trace!(step = gains.step, progress = gains.progress, "crossfade step");

        if self.crossfade.state() == CrossfadeState::Swapping {
            self.finish_crossfade();
        }
    }

    fn finish_crossfade(&mut self) {
        let timer = self.crossfade.timer();
        if self.crossfade.complete().is_none() {
            return;
        }
        if let Some(timer) = timer {
            self.timers.clear(timer);
        }
        self.session.set_crossfade_in_progress(false);
        if let Some(outgoing) = self.session.promote_staging() {
            self.release_replaced(outgoing);
        }
    }

    /// Abandons a running crossfade: stops and releases the staged track and
    /// restores the active track's gain.
    fn cancel_crossfade(&mut self) {
        let Some((transition, timer)) = self.crossfade.cancel() else {
            return;
        };
        if let Some(timer) = timer {
            self.timers.clear(timer);
        }
        self.session.set_crossfade_in_progress(false);
        if let Some(staged) = self.session.take_staging() {
            self.release(staged);
        }
        self.mixer.set_gain(transition.from, self.volume);
    }

    fn switch_to(&mut self, index: usize) -> Result<()> {
        let is_current = self.session.current_index() == Some(index);
        if self.is_playing() && self.crossfade.is_enabled() && !is_current {
            self.start_crossfade(index)
        } else {
            self.hard_switch(index)
        }
    }

    /// Replaces the active track immediately and starts it.
    fn hard_switch(&mut self, index: usize) -> Result<()> {
        self.cancel_crossfade();
        let binding = self.load_and_bind(index, self.volume)?;
        self.activate(binding);
        Ok(())
    }

    /// Makes `binding` the active track and starts it from the top when its
    /// source was already playing as the previous track.
    fn activate(&mut self, binding: SourceBinding) {
        let (index, adapter) = (binding.track_index, binding.adapter);
        let source = binding.source.clone();

        if let Some(previous) = self.session.set_active(binding) {
            if previous.adapter == adapter {
                source.borrow_mut().seek(0.0);
            } else {
                self.release(previous);
            }
        }
        self.mixer.set_gain(adapter, self.volume);
        self.crossfade.rearm();
        self.apply_genre_of(index);
        source.borrow_mut().play();
        tracing::info!(index, %adapter, "switched track");
    }

    /// Stages `index` silently and starts the ramp toward it.
    fn start_crossfade(&mut self, index: usize) -> Result<()> {
        if let Err(err) = self.crossfade.check_idle() {
            tracing::warn!(error = %err, "crossfade request ignored");
            return Ok(());
        }
        let Some(from) = self.session.active().map(|active| active.adapter) else {
            return self.hard_switch(index);
        };

        let binding = self.load_and_bind(index, 0.0)?;
        let to = binding.adapter;
        if to == from {
            tracing::debug!(index, adapter = %to, "next track shares the active source");
            self.activate(binding);
            return Ok(());
        }
        binding.source.borrow_mut().play();
        self.session.set_staging(binding);
        self.session.set_crossfade_in_progress(true);

        let now = self.now();
        self.crossfade.begin(from, to, now)?;
        self.apply_genre_of(index);
        let timer = self.timers.set_interval(
            now,
            self.crossfade.step_interval(),
            EngineEvent::CrossfadeStep,
        );
        self.crossfade.start_ramp(timer);
        Ok(())
    }

    fn load_and_bind(&mut self, index: usize, gain: f32) -> Result<SourceBinding> {
        let track = self
            .session
            .track(index)
            .cloned()
            .ok_or(EngineError::InvalidInput("queue index out of range"))?;
        let context = self
            .context
            .as_ref()
            .map(AudioContext::id)
            .ok_or_else(|| EngineError::EngineUnavailable("no audio context".to_string()))?;

        let source = self.loader.load(&track, &self.config.audio)?;
        let outcome = self
            .mixer
            .bind(&source, context, self.chain.is_ready(), gain);
        if let Some(degradation) = outcome.degradation {
            self.degradations.push(degradation);
        }

        Ok(SourceBinding {
            track_index: index,
            source,
            adapter: outcome.adapter,
        })
    }

    fn release(&mut self, binding: SourceBinding) {
        binding.source.borrow_mut().stop();
        self.mixer.unbind(binding.adapter);
    }

    /// Releases a binding the active track replaced, unless both share one
    /// adapter.
    fn release_replaced(&mut self, outgoing: SourceBinding) {
        let active = self.session.active().map(|active| active.adapter);
        if active != Some(outgoing.adapter) {
            self.release(outgoing);
        }
    }

    fn apply_genre_of(&mut self, index: usize) {
        let Some(tag) = self.session.track(index).map(|track| track.genre.clone()) else {
            return;
        };
        match self.profiles.require(&tag) {
            Ok(profile) => {
                let now = self.now();
                self.chain.set_genre(profile, now);
                self.mood.reset();
                self.genre = Some(profile);
            }
            Err(err) => {
                tracing::warn!(error = %err, "keeping previous genre profile");
            }
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("context", &self.context)
            .field("chain", &self.chain.state())
            .field("session", &self.session)
            .field("crossfade", &self.crossfade.state())
            .field("genre", &self.current_genre())
            .field("volume", &self.volume)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
