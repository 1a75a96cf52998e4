use serde::{Deserialize, Serialize};

use crate::{mixer::AdapterId, source::SharedSource};

/// A queue entry as handed over by the playback layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    /// Where the audio comes from, resolved by a `SourceLoader`.
    pub locator: String,
    pub genre: String,
    /// Duration known ahead of loading, used until the source reports one.
    #[serde(default)]
    pub duration_hint: Option<f64>,
}

impl Track {
    pub fn new(id: impl Into<String>, locator: impl Into<String>, genre: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            genre: genre.into(),
            duration_hint: None,
        }
    }

    pub fn with_duration_hint(mut self, seconds: f64) -> Self {
        self.duration_hint = Some(seconds);
        self
    }
}

/// A loaded track attached to the mixer.
#[derive(Clone)]
pub struct SourceBinding {
    pub track_index: usize,
    pub source: SharedSource,
    pub adapter: AdapterId,
}

impl std::fmt::Debug for SourceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBinding")
            .field("track_index", &self.track_index)
            .field("source", &self.source.borrow().id())
            .field("adapter", &self.adapter)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct PlaybackSession {
    queue: Vec<Track>,
    current_index: Option<usize>,
    active: Option<SourceBinding>,
    staging: Option<SourceBinding>,
    crossfade_in_progress: bool,
}

/// Single owner of the queue and the current position in it.
#[derive(Debug, Default)]
pub struct PlaybackSessionManager {
    session: PlaybackSession,
}

impl PlaybackSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &[Track] {
        &self.session.queue
    }

    pub fn current_index(&self) -> Option<usize> {
        self.session.current_index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.session
            .current_index
            .and_then(|index| self.session.queue.get(index))
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.session.queue.get(index)
    }

    /// Appends without reordering or removing duplicates. Returns the index.
    pub fn add_to_queue(&mut self, track: Track) -> usize {
        self.session.queue.push(track);
        self.session.queue.len() - 1
    }

    pub fn position_of(&self, track_id: &str) -> Option<usize> {
        self.session
            .queue
            .iter()
            .position(|track| track.id == track_id)
    }

    /// Index of `track` in the queue, appending it first when absent.
    pub fn locate_or_enqueue(&mut self, track: Track) -> usize {
        match self.position_of(&track.id) {
            Some(index) => index,
            None => self.add_to_queue(track),
        }
    }

    /// Makes `index` the current position. Out-of-range indices are ignored.
    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.session.queue.len() {
            return false;
        }
        self.session.current_index = Some(index);
        true
    }

    /// `(current + 1) mod len`. Starts at the head when nothing is current.
    pub fn resolve_next(&self) -> Option<usize> {
        let len = self.session.queue.len();
        if len == 0 {
            return None;
        }
        Some(match self.session.current_index {
            Some(index) => (index + 1) % len,
            None => 0,
        })
    }

    /// `(current - 1) mod len`. Starts at the tail when nothing is current.
    pub fn resolve_previous(&self) -> Option<usize> {
        let len = self.session.queue.len();
        if len == 0 {
            return None;
        }
        Some(match self.session.current_index {
            Some(index) => (index + len - 1) % len,
            None => len - 1,
        })
    }

    pub fn active(&self) -> Option<&SourceBinding> {
        self.session.active.as_ref()
    }

    pub fn staging(&self) -> Option<&SourceBinding> {
        self.session.staging.as_ref()
    }

    /// Installs a new active binding and selects its track. Returns the
    /// binding it replaced.
    pub fn set_active(&mut self, binding: SourceBinding) -> Option<SourceBinding> {
        self.session.current_index = Some(binding.track_index);
        self.session.active.replace(binding)
    }

    pub fn take_active(&mut self) -> Option<SourceBinding> {
        self.session.active.take()
    }

    pub fn set_staging(&mut self, binding: SourceBinding) -> Option<SourceBinding> {
        self.session.staging.replace(binding)
    }

    pub fn take_staging(&mut self) -> Option<SourceBinding> {
        self.session.staging.take()
    }

    /// Moves the staged binding into the active slot and returns the old
    /// active binding. Nothing happens when no binding is staged.
    pub fn promote_staging(&mut self) -> Option<SourceBinding> {
        let staged = self.session.staging.take()?;
        self.set_active(staged)
    }

    pub fn crossfade_in_progress(&self) -> bool {
        self.session.crossfade_in_progress
    }

    pub fn set_crossfade_in_progress(&mut self, in_progress: bool) {
        self.session.crossfade_in_progress = in_progress;
    }

    /// Drops every binding. The queue is kept.
    pub fn release_bindings(&mut self) -> Vec<SourceBinding> {
        self.session.crossfade_in_progress = false;
        [self.session.staging.take(), self.session.active.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::AudioContext,
        mixer::MultiSourceInputMixer,
        source::{share, ToneSource},
    };

    fn manager_with(len: usize) -> PlaybackSessionManager {
        let mut manager = PlaybackSessionManager::new();
        for index in 0..len {
            manager.add_to_queue(Track::new(format!("t{index}"), "tone:440:10", "pop"));
        }
        manager
    }

    fn binding(track_index: usize) -> SourceBinding {
        let context = AudioContext::new(48_000, 128);
        let source = share(ToneSource::new(440.0, 1.0));
        let adapter = MultiSourceInputMixer::new()
            .bind(&source, context.id(), true, 1.0)
            .adapter;
        SourceBinding {
            track_index,
            source,
            adapter,
        }
    }

    #[test]
    fn next_wraps_from_the_last_track() {
        let mut manager = manager_with(4);
        manager.select(3);
        assert_eq!(manager.resolve_next(), Some(0));
    }

    #[test]
    fn previous_wraps_from_the_first_track() {
        let mut manager = manager_with(4);
        manager.select(0);
        assert_eq!(manager.resolve_previous(), Some(3));
    }

    #[test]
    fn empty_queue_resolves_nothing() {
        let manager = PlaybackSessionManager::new();
        assert_eq!(manager.resolve_next(), None);
        assert_eq!(manager.resolve_previous(), None);
    }

    #[test]
    fn single_track_queue_resolves_to_itself() {
        let mut manager = manager_with(1);
        manager.select(0);
        assert_eq!(manager.resolve_next(), Some(0));
        assert_eq!(manager.resolve_previous(), Some(0));
    }

    #[test]
    fn add_to_queue_keeps_duplicates() {
        let mut manager = PlaybackSessionManager::new();
        let track = Track::new("same", "tone:440:10", "pop");
        manager.add_to_queue(track.clone());
        manager.add_to_queue(track.clone());
        assert_eq!(manager.queue().len(), 2);
        assert_eq!(manager.locate_or_enqueue(track), 0);
        assert_eq!(manager.queue().len(), 2);
    }

    #[test]
    fn unknown_tracks_are_appended_when_located() {
        let mut manager = manager_with(2);
        let index = manager.locate_or_enqueue(Track::new("new", "tone:220:5", "jazz"));
        assert_eq!(index, 2);
        assert!(!manager.select(7));
    }

    #[test]
    fn promotion_swaps_active_and_selects_the_staged_track() {
        let mut manager = manager_with(3);
        assert!(manager.set_active(binding(0)).is_none());
        manager.set_staging(binding(1));

        let old = manager.promote_staging().unwrap();
        assert_eq!(old.track_index, 0);
        assert_eq!(manager.current_index(), Some(1));
        assert!(manager.staging().is_none());
        assert_eq!(manager.current_track().unwrap().id, "t1");
    }
}
