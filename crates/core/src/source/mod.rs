//! Playable media sources.
//!
//! A source plays the role of a media element: it owns its transport state,
//! renders frames on demand and queues media events (`MetadataLoaded`,
//! `TimeUpdate`, `Ended`) that the engine drains after every render block.

use std::{
    cell::RefCell,
    f32::consts::TAU,
    fmt,
    path::Path,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{audio::ContextId, session::Track, AudioConfig, EngineError, Result, StereoFrame};

/// Single-threaded shared handle to a source. The mixer and the session both
/// hold one while the track is bound.
pub type SharedSource = Rc<RefCell<dyn MediaSource>>;

/// Identity of a concrete media source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src#{}", self.0)
    }
}

/// Notifications a source raises while it renders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaEvent {
    MetadataLoaded { duration: Option<f64> },
    TimeUpdate { position: f64 },
    Ended,
}

/// Transport state shared by every source implementation.
#[derive(Debug)]
pub struct Transport {
    id: SourceId,
    playing: bool,
    position: f64,
    ended: bool,
    metadata_sent: bool,
    owner: Option<ContextId>,
    events: Vec<MediaEvent>,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            id: SourceId::next(),
            playing: false,
            position: 0.0,
            ended: false,
            metadata_sent: false,
            owner: None,
            events: Vec::new(),
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

/// A playable media object.
///
/// Implementors provide the transport accessors, the length they report and
/// the content itself; everything else is shared.
pub trait MediaSource {
    fn transport(&self) -> &Transport;

    fn transport_mut(&mut self) -> &mut Transport;

    /// Duration reported to listeners. `None` when the length is unknown.
    fn duration(&self) -> Option<f64>;

    /// Actual content length in seconds, used to detect the end of playback.
    /// `None` for endless content.
    fn length(&self) -> Option<f64> {
        self.duration()
    }

    /// Writes the content at `time` (seconds) for one output frame.
    fn frame_at(&self, time: f64) -> StereoFrame;

    fn id(&self) -> SourceId {
        self.transport().id
    }

    fn play(&mut self) {
        let transport = self.transport_mut();
        if transport.ended {
            transport.position = 0.0;
            transport.ended = false;
        }
        transport.playing = true;
    }

    fn pause(&mut self) {
        self.transport_mut().playing = false;
    }

    /// Pauses and rewinds to the start.
    fn stop(&mut self) {
        let transport = self.transport_mut();
        transport.playing = false;
        transport.position = 0.0;
        transport.ended = false;
    }

    fn seek(&mut self, seconds: f64) {
        let length = self.length();
        let transport = self.transport_mut();
        let mut target = seconds.max(0.0);
        if let Some(length) = length {
            target = target.min(length);
        }
        transport.position = target;
        transport.ended = false;
    }

    fn is_playing(&self) -> bool {
        self.transport().playing
    }

    fn position(&self) -> f64 {
        self.transport().position
    }

    fn has_ended(&self) -> bool {
        self.transport().ended
    }

    /// Marks the source as owned by `context`. Claiming again from the same
    /// context is allowed; claiming from another one is not.
    fn claim_context(&mut self, context: ContextId) -> Result<()> {
        let id = self.id();
        let transport = self.transport_mut();
        match transport.owner {
            Some(owner) if owner != context => {
                Err(EngineError::SourceBindAmbiguous { source_id: id })
            }
            _ => {
                transport.owner = Some(context);
                Ok(())
            }
        }
    }

    fn release_context(&mut self, context: ContextId) {
        let transport = self.transport_mut();
        if transport.owner == Some(context) {
            transport.owner = None;
        }
    }

    /// Renders one block into `out`, overwriting it. Returns the number of
    /// frames that carried content; the remainder is silence.
    fn read(&mut self, out: &mut [StereoFrame], sample_rate: u32) -> usize {
        out.fill(StereoFrame::SILENCE);

        if !self.transport().metadata_sent {
            let duration = self.duration();
            let transport = self.transport_mut();
            transport.metadata_sent = true;
            transport.events.push(MediaEvent::MetadataLoaded { duration });
        }

        if !self.transport().playing {
            return 0;
        }

        let step = 1.0 / sample_rate as f64;
        let length = self.length();
        let start = self.transport().position;
        let mut written = 0;

        for (index, frame) in out.iter_mut().enumerate() {
            let time = start + index as f64 * step;
            if length.map(|length| time >= length).unwrap_or(false) {
                break;
            }
            *frame = self.frame_at(time);
            written += 1;
        }

        let transport = self.transport_mut();
        transport.position = start + written as f64 * step;
        if written < out.len() {
            if let Some(length) = length {
                transport.position = length;
            }
            transport.playing = false;
            transport.ended = true;
            let position = transport.position;
            transport.events.push(MediaEvent::TimeUpdate { position });
            transport.events.push(MediaEvent::Ended);
        } else {
            let position = transport.position;
            transport.events.push(MediaEvent::TimeUpdate { position });
        }

        written
    }

    fn drain_events(&mut self) -> Vec<MediaEvent> {
        std::mem::take(&mut self.transport_mut().events)
    }
}

/// Wraps a concrete source into a [`SharedSource`].
pub fn share<S: MediaSource + 'static>(source: S) -> SharedSource {
    Rc::new(RefCell::new(source))
}

/// Synthesised sine tone, mostly used for demos and tests.
#[derive(Debug)]
pub struct ToneSource {
    transport: Transport,
    frequency: f32,
    amplitude: f32,
    length: Option<f64>,
    reports_duration: bool,
}

impl ToneSource {
    pub fn new(frequency: f32, seconds: f64) -> Self {
        Self {
            transport: Transport::new(),
            frequency,
            amplitude: 0.5,
            length: Some(seconds),
            reports_duration: true,
        }
    }

    /// A tone that never ends.
    pub fn endless(frequency: f32) -> Self {
        Self {
            length: None,
            reports_duration: false,
            ..Self::new(frequency, 0.0)
        }
    }

    /// Keeps the real length but reports it as unknown, like a live stream.
    pub fn with_hidden_duration(mut self) -> Self {
        self.reports_duration = false;
        self
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }
}

impl MediaSource for ToneSource {
    fn transport(&self) -> &Transport {
        &self.transport
    }

    fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    fn duration(&self) -> Option<f64> {
        if self.reports_duration {
            self.length
        } else {
            None
        }
    }

    fn length(&self) -> Option<f64> {
        self.length
    }

    fn frame_at(&self, time: f64) -> StereoFrame {
        let phase = (time * self.frequency as f64).fract() as f32;
        StereoFrame::mono((phase * TAU).sin() * self.amplitude)
    }
}

/// Fully decoded audio held in memory.
#[derive(Debug)]
pub struct BufferSource {
    transport: Transport,
    frames: Vec<StereoFrame>,
    sample_rate: u32,
}

impl BufferSource {
    pub fn new(frames: Vec<StereoFrame>, sample_rate: u32) -> Self {
        Self {
            transport: Transport::new(),
            frames,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Decodes a WAV file. Mono files are duplicated to both channels and
    /// extra channels beyond the second are ignored.
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self> {
        let reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let max = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / max))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        let frames = samples
            .chunks_exact(channels)
            .map(|chunk| {
                let left = chunk[0];
                let right = if channels > 1 { chunk[1] } else { left };
                StereoFrame::new(left, right)
            })
            .collect();

        Ok(Self::new(frames, spec.sample_rate))
    }
}

impl MediaSource for BufferSource {
    fn transport(&self) -> &Transport {
        &self.transport
    }

    fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    fn duration(&self) -> Option<f64> {
        Some(self.frames.len() as f64 / self.sample_rate as f64)
    }

    fn frame_at(&self, time: f64) -> StereoFrame {
        // Linear interpolation covers sample rate mismatches with the context.
        let position = time * self.sample_rate as f64;
        let index = position.floor() as usize;
        let fraction = (position - index as f64) as f32;
        match (self.frames.get(index), self.frames.get(index + 1)) {
            (Some(a), Some(b)) => *a * (1.0 - fraction) + *b * fraction,
            (Some(a), None) => *a,
            _ => StereoFrame::SILENCE,
        }
    }
}

/// Resolves a track's playable locator into a source.
pub trait SourceLoader {
    fn load(&mut self, track: &Track, audio: &AudioConfig) -> Result<SharedSource>;
}

/// Understands `tone:<hz>:<seconds>`, `stream:<hz>:<seconds>` (duration not
/// reported) and WAV file paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLoader;

impl SourceLoader for DefaultLoader {
    fn load(&mut self, track: &Track, _audio: &AudioConfig) -> Result<SharedSource> {
        let locator = track.locator.as_str();

        if let Some(spec) = locator
            .strip_prefix("tone:")
            .or_else(|| locator.strip_prefix("stream:"))
        {
            let (frequency, seconds) = parse_tone(spec)
                .ok_or_else(|| EngineError::SourceLoad(format!("malformed locator `{locator}`")))?;
            let tone = ToneSource::new(frequency, seconds);
            let tone = if locator.starts_with("stream:") {
                tone.with_hidden_duration()
            } else {
                tone
            };
            return Ok(share(tone));
        }

        let path = Path::new(locator);
        if path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false)
        {
            return Ok(share(BufferSource::from_wav(path)?));
        }

        Err(EngineError::SourceLoad(format!(
            "unsupported locator `{locator}`"
        )))
    }
}

fn parse_tone(spec: &str) -> Option<(f32, f64)> {
    let (frequency, seconds) = spec.split_once(':')?;
    let frequency: f32 = frequency.trim().parse().ok()?;
    let seconds: f64 = seconds.trim().parse().ok()?;
    (frequency > 0.0 && seconds > 0.0).then_some((frequency, seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioContext;

    #[test]
    fn emits_metadata_then_time_updates() {
        let mut tone = ToneSource::new(440.0, 1.0);
        let mut block = vec![StereoFrame::SILENCE; 100];

        tone.read(&mut block, 1_000);
        assert_eq!(
            tone.drain_events(),
            vec![MediaEvent::MetadataLoaded {
                duration: Some(1.0)
            }]
        );

        tone.play();
        assert_eq!(tone.read(&mut block, 1_000), 100);
        let events = tone.drain_events();
        assert!(matches!(events[..], [MediaEvent::TimeUpdate { position }] if (position - 0.1).abs() < 1e-9));
    }

    #[test]
    fn reaching_the_end_raises_ended_once() {
        let mut tone = ToneSource::new(440.0, 0.15);
        let mut block = vec![StereoFrame::SILENCE; 100];
        tone.play();

        tone.read(&mut block, 1_000);
        tone.drain_events();
        assert_eq!(tone.read(&mut block, 1_000), 50);
        assert!(tone.has_ended());
        assert!(!tone.is_playing());
        assert!(tone.drain_events().contains(&MediaEvent::Ended));

        tone.read(&mut block, 1_000);
        assert!(tone.drain_events().is_empty());
    }

    #[test]
    fn hidden_duration_still_ends() {
        let tone = ToneSource::new(220.0, 2.0).with_hidden_duration();
        assert_eq!(tone.duration(), None);
        assert_eq!(tone.length(), Some(2.0));
    }

    #[test]
    fn second_context_cannot_claim_a_source() {
        let first = AudioContext::new(48_000, 128);
        let second = AudioContext::new(48_000, 128);
        let mut tone = ToneSource::new(440.0, 1.0);

        tone.claim_context(first.id()).unwrap();
        tone.claim_context(first.id()).unwrap();
        assert!(matches!(
            tone.claim_context(second.id()),
            Err(EngineError::SourceBindAmbiguous { .. })
        ));

        tone.release_context(first.id());
        tone.claim_context(second.id()).unwrap();
    }

    #[test]
    fn seek_clamps_to_length() {
        let mut tone = ToneSource::new(440.0, 3.0);
        tone.seek(10.0);
        assert_eq!(tone.position(), 3.0);
        tone.seek(-1.0);
        assert_eq!(tone.position(), 0.0);
    }

    #[test]
    fn loads_wav_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..8_000 {
            writer.write_sample(i16::MAX / 2).unwrap();
        }
        writer.finalize().unwrap();

        let track = Track::new("clip", path.to_string_lossy(), "pop");
        let source = DefaultLoader.load(&track, &AudioConfig::default()).unwrap();
        let source = source.borrow();
        assert!((source.duration().unwrap() - 1.0).abs() < 1e-9);
        assert!((source.frame_at(0.5).left - 0.5).abs() < 1e-3);
    }

    #[test]
    fn rejects_unknown_locators() {
        let track = Track::new("x", "ftp://example", "pop");
        assert!(matches!(
            DefaultLoader.load(&track, &AudioConfig::default()),
            Err(EngineError::SourceLoad(_))
        ));
        let track = Track::new("y", "tone:abc:2", "pop");
        assert!(DefaultLoader.load(&track, &AudioConfig::default()).is_err());
    }

    #[test]
    fn stream_locators_hide_duration() {
        let track = Track::new("s", "stream:330:4", "pop");
        let source = DefaultLoader.load(&track, &AudioConfig::default()).unwrap();
        assert_eq!(source.borrow().duration(), None);
    }
}
