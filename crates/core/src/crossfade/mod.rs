//! Two-source volume handoff between consecutive tracks.
//!
//! The scheduler is a pure state machine: it decides when a transition may
//! start, what gains each step implies and when ownership swaps. The engine
//! performs the matching side effects on the mixer and the session.
//!
//! ```text
//! Idle -> Staging -> Ramping -> Swapping -> Idle
//! ```

use serde::Serialize;

use crate::{config::CrossfadeConfig, mixer::AdapterId, timeline::TimerId, EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrossfadeState {
    Idle,
    Staging,
    Ramping,
    Swapping,
}

/// Why a transition toward the next track was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    /// Playback came within the threshold of a known duration.
    Proactive,
    /// The source ended without a proactive trigger.
    Reactive,
}

/// The transition currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CrossfadeTransition {
    pub from: AdapterId,
    pub to: AdapterId,
    pub start_time: f64,
    pub duration: f64,
    pub step_count: u32,
    pub current_step: u32,
}

impl CrossfadeTransition {
    /// Fraction of the ramp completed. Exactly `1.0` on the final step.
    pub fn progress(&self) -> f32 {
        if self.current_step >= self.step_count {
            1.0
        } else {
            self.current_step as f32 / self.step_count as f32
        }
    }
}

/// Gains for both sides of a transition at one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepGains {
    pub step: u32,
    pub progress: f32,
    pub outgoing: f32,
    pub incoming: f32,
}

impl StepGains {
    fn at(step: u32, progress: f32, master_volume: f32) -> Self {
        Self {
            step,
            progress,
            outgoing: master_volume * (1.0 - progress),
            incoming: master_volume * progress,
        }
    }
}

#[derive(Debug)]
pub struct CrossfadeScheduler {
    config: CrossfadeConfig,
    state: CrossfadeState,
    transition: Option<CrossfadeTransition>,
    timer: Option<TimerId>,
    triggered: bool,
}

impl CrossfadeScheduler {
    pub fn new(config: &CrossfadeConfig) -> Self {
        Self {
            config: config.clone(),
            state: CrossfadeState::Idle,
            transition: None,
            timer: None,
            triggered: false,
        }
    }

    pub fn state(&self) -> CrossfadeState {
        self.state
    }

    pub fn transition(&self) -> Option<&CrossfadeTransition> {
        self.transition.as_ref()
    }

    pub fn timer(&self) -> Option<TimerId> {
        self.timer
    }

    pub fn is_busy(&self) -> bool {
        self.state != CrossfadeState::Idle
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn step_interval(&self) -> f64 {
        self.config.step_interval_secs()
    }

    /// Whether the current track has already produced its trigger.
    pub fn has_triggered(&self) -> bool {
        self.triggered
    }

    /// Clears the per-track trigger flag. Called when a new track becomes
    /// active or announces its metadata.
    pub fn rearm(&mut self) {
        self.triggered = false;
    }

    /// Rearms when playback was moved back before the trigger window.
    pub fn rearm_before_window(&mut self, position: f64, duration: Option<f64>) {
        if let Some(duration) = duration {
            if position < duration - self.config.trigger_threshold_secs {
                self.triggered = false;
            }
        }
    }

    /// Checks a position update of the active track against the proactive
    /// threshold. Fires at most once per track.
    pub fn on_time_update(&mut self, position: f64, duration: Option<f64>) -> Option<Trigger> {
        if !self.config.enabled || self.triggered {
            return None;
        }
        let duration = duration.filter(|duration| duration.is_finite() && *duration > 0.0)?;
        if position >= duration - self.config.trigger_threshold_secs {
            self.triggered = true;
            return Some(Trigger::Proactive);
        }
        None
    }

    /// Reports the end of the active track. Only fires when no proactive
    /// trigger did.
    pub fn on_ended(&mut self) -> Option<Trigger> {
        if self.triggered {
            return None;
        }
        self.triggered = true;
        Some(Trigger::Reactive)
    }

    /// Fails with [`EngineError::CrossfadeBusy`] unless idle.
    pub fn check_idle(&self) -> Result<()> {
        if self.is_busy() {
            return Err(EngineError::CrossfadeBusy);
        }
        Ok(())
    }

    /// Enters `Staging` for a handoff from `from` to `to`.
    pub fn begin(&mut self, from: AdapterId, to: AdapterId, now: f64) -> Result<()> {
        self.check_idle()?;
        self.transition = Some(CrossfadeTransition {
            from,
            to,
            start_time: now,
            duration: self.config.duration_ms as f64 / 1000.0,
            step_count: self.config.steps.max(1),
            current_step: 0,
        });
        self.state = CrossfadeState::Staging;
        tracing::info!(%from, %to, "crossfade staging");
        Ok(())
    }

    /// Moves from `Staging` to `Ramping`, driven by `timer`.
    pub fn start_ramp(&mut self, timer: TimerId) -> bool {
        if self.state != CrossfadeState::Staging {
            return false;
        }
        self.timer = Some(timer);
        self.state = CrossfadeState::Ramping;
        true
    }

    /// Advances one step and returns the gains it implies. The final step
    /// moves the scheduler to `Swapping`.
    pub fn step(&mut self, master_volume: f32) -> Option<StepGains> {
        if self.state != CrossfadeState::Ramping {
            return None;
        }
        let transition = self.transition.as_mut()?;
        transition.current_step = (transition.current_step + 1).min(transition.step_count);
        let gains = StepGains::at(transition.current_step, transition.progress(), master_volume);
        if transition.current_step == transition.step_count {
            self.state = CrossfadeState::Swapping;
        }
        Some(gains)
    }

    /// Gains of the current step at `master_volume`, without advancing.
    pub fn current_gains(&self, master_volume: f32) -> Option<StepGains> {
        self.transition.as_ref().map(|transition| {
            StepGains::at(transition.current_step, transition.progress(), master_volume)
        })
    }

    /// Leaves `Swapping` and returns the finished transition. The trigger
    /// flag is cleared for the promoted track.
    pub fn complete(&mut self) -> Option<CrossfadeTransition> {
        if self.state != CrossfadeState::Swapping {
            return None;
        }
        self.state = CrossfadeState::Idle;
        self.timer = None;
        self.triggered = false;
        let transition = self.transition.take();
        tracing::info!("crossfade complete");
        transition
    }

    /// Abandons whatever transition is in flight. Returns it together with
    /// the timer that must be cleared.
    pub fn cancel(&mut self) -> Option<(CrossfadeTransition, Option<TimerId>)> {
        if !self.is_busy() {
            return None;
        }
        self.state = CrossfadeState::Idle;
        let timer = self.timer.take();
        let transition = self.transition.take()?;
        tracing::info!(step = transition.current_step, "crossfade cancelled");
        Some((transition, timer))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::{
        audio::AudioContext,
        mixer::MultiSourceInputMixer,
        source::{share, ToneSource},
        timeline::{EngineEvent, Timers},
    };

    fn adapters() -> (AdapterId, AdapterId) {
        let context = AudioContext::new(48_000, 128);
        let mut mixer = MultiSourceInputMixer::new();
        let a = mixer.bind(&share(ToneSource::new(1.0, 1.0)), context.id(), true, 1.0);
        let b = mixer.bind(&share(ToneSource::new(1.0, 1.0)), context.id(), true, 0.0);
        (a.adapter, b.adapter)
    }

    fn ramping() -> CrossfadeScheduler {
        let (from, to) = adapters();
        let mut scheduler = CrossfadeScheduler::new(&CrossfadeConfig::default());
        let timer = Timers::new().set_interval(0.0, 0.1, EngineEvent::CrossfadeStep);
        scheduler.begin(from, to, 0.0).unwrap();
        assert!(scheduler.start_ramp(timer));
        scheduler
    }

    #[test]
    fn proactive_trigger_fires_once_per_track() {
        let mut scheduler = CrossfadeScheduler::new(&CrossfadeConfig::default());
        let duration = Some(30.0);
        let mut fired = 0;

        let mut position = 0.0;
        while position < 30.0 {
            if scheduler.on_time_update(position, duration).is_some() {
                fired += 1;
            }
            position += 0.25;
        }
        if scheduler.on_ended().is_some() {
            fired += 1;
        }

        assert_eq!(fired, 1);
    }

    #[test]
    fn unknown_duration_falls_back_to_reactive() {
        let mut scheduler = CrossfadeScheduler::new(&CrossfadeConfig::default());
        assert_eq!(scheduler.on_time_update(500.0, None), None);
        assert_eq!(scheduler.on_ended(), Some(Trigger::Reactive));
        assert_eq!(scheduler.on_ended(), None);

        scheduler.rearm();
        assert_eq!(scheduler.on_ended(), Some(Trigger::Reactive));
    }

    #[test]
    fn disabled_crossfade_never_triggers_proactively() {
        let mut scheduler = CrossfadeScheduler::new(&CrossfadeConfig::default());
        scheduler.set_enabled(false);
        assert_eq!(scheduler.on_time_update(29.0, Some(30.0)), None);
        assert_eq!(scheduler.on_ended(), Some(Trigger::Reactive));
    }

    #[test]
    fn seeking_back_rearms_the_trigger() {
        let mut scheduler = CrossfadeScheduler::new(&CrossfadeConfig::default());
        assert_eq!(scheduler.on_time_update(28.5, Some(30.0)), Some(Trigger::Proactive));

        scheduler.rearm_before_window(28.9, Some(30.0));
        assert!(scheduler.has_triggered());

        scheduler.rearm_before_window(10.0, Some(30.0));
        assert_eq!(scheduler.on_time_update(28.5, Some(30.0)), Some(Trigger::Proactive));
    }

    #[test]
    fn every_step_conserves_master_volume() {
        let mut scheduler = ramping();
        let volume = 0.8;
        let mut last = None;

        while let Some(gains) = scheduler.step(volume) {
            assert_abs_diff_eq!(gains.outgoing + gains.incoming, volume, epsilon = 1e-6);
            last = Some(gains);
        }

        let last = last.unwrap();
        assert_eq!(last.step, 20);
        assert_eq!(last.progress, 1.0);
        assert_eq!(last.outgoing, 0.0);
        assert_eq!(last.incoming, volume);
        assert_eq!(scheduler.state(), CrossfadeState::Swapping);
    }

    #[test]
    fn second_request_is_rejected_while_busy() {
        let mut scheduler = ramping();
        let (from, to) = adapters();
        assert!(matches!(
            scheduler.begin(from, to, 1.0),
            Err(EngineError::CrossfadeBusy)
        ));

        while scheduler.step(1.0).is_some() {}
        assert!(matches!(
            scheduler.begin(from, to, 1.0),
            Err(EngineError::CrossfadeBusy)
        ));

        let finished = scheduler.complete().unwrap();
        assert_eq!(finished.current_step, 20);
        assert_eq!(scheduler.state(), CrossfadeState::Idle);
        scheduler.begin(from, to, 2.0).unwrap();
    }

    #[test]
    fn cancel_abandons_without_swapping() {
        let mut scheduler = ramping();
        scheduler.step(1.0);
        scheduler.step(1.0);

        let (transition, timer) = scheduler.cancel().unwrap();
        assert_eq!(transition.current_step, 2);
        assert!(timer.is_some());
        assert_eq!(scheduler.state(), CrossfadeState::Idle);
        assert!(scheduler.complete().is_none());
        assert!(scheduler.cancel().is_none());
    }

    #[test]
    fn steps_are_ignored_outside_ramping() {
        let mut scheduler = CrossfadeScheduler::new(&CrossfadeConfig::default());
        assert!(scheduler.step(1.0).is_none());

        let (from, to) = adapters();
        scheduler.begin(from, to, 0.0).unwrap();
        assert!(scheduler.step(1.0).is_none());
        assert_eq!(scheduler.current_gains(1.0).unwrap().outgoing, 1.0);
    }
}
