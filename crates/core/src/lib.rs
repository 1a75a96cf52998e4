//! Core library for the SonicFlow playback engine.
//!
//! Tracks are played through a fixed chain of processing stages whose
//! parameters follow the track's genre and the measured energy of the
//! output. Consecutive tracks hand over through timed crossfades. Each module
//! owns one subsystem; [`Engine`] ties them together behind a single handle.

pub mod analysis;
pub mod audio;
pub mod automation;
pub mod chain;
pub mod config;
pub mod crossfade;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod mood;
pub mod profile;
pub mod session;
pub mod source;
pub mod timeline;

pub use analysis::{AnalysisSample, SpectrumAnalyzer, Subscription};
pub use audio::{AudioBackend, AudioContext, ContextState, OfflineBackend, StereoFrame};
pub use automation::{ParamId, ParameterAutomator};
pub use chain::{SignalChain, StageKind, Topology};
pub use config::{AudioConfig, EngineConfig};
pub use crossfade::{CrossfadeScheduler, CrossfadeState};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use mixer::{AdapterId, MultiSourceInputMixer, Route};
pub use mood::{Mood, MoodAdaptiveController};
pub use profile::{GenreProfile, GenreProfileStore};
pub use session::{PlaybackSessionManager, Track};
pub use source::{BufferSource, DefaultLoader, MediaSource, SharedSource, SourceLoader, ToneSource};
pub use timeline::{EngineEvent, EventQueue, Timers};
